use anyhow::{bail, Context};
use clap::{ArgAction, Args, Parser, Subcommand};
use kmerset_lib::container::{create_container, open_container};
use kmerset_lib::kmer::decode;
use kmerset_lib::parse::TextRecordSource;
use kmerset_lib::sequences::scan_fastx;
use kmerset_lib::{
    merge_containers, run_set_operation, sort_containers, split_containers, ContainerHeader, OutputPolicy,
    ParentTaxonomy, RecordSource, RootTaxonomy, SetConfiguration, SetOperation, SortConfiguration,
    StrategyChoice, StreamInfo, Taxonomy,
};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "kmerset")]
#[command(version = "0.1.0")]
#[command(about = "Sort, merge and combine k-mer containers", long_about = None)]
struct Cli {
    /// Taxonomy parent table (`child<TAB>parent` lines or NCBI nodes.dmp)
    #[arg(long, global = true)]
    taxonomy: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a k-mer list or a FASTA/FASTQ file into a container
    Encode {
        /// Input: text list (one k-mer or hash per line) or FASTA/FASTQ
        input: PathBuf,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,

        /// K-mer length
        #[arg(short, long)]
        k: usize,

        /// Use canonical k-mers (k-mer or reverse complement, whichever is smaller)
        #[arg(long, default_value = "false")]
        canonical: bool,

        /// Taxid assigned to every record without one
        #[arg(long)]
        taxid: Option<u32>,

        /// Store codes in the minimum number of bytes for k
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        compact: bool,
    },

    /// Sort containers into one sorted container
    Sort {
        /// Input containers
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        resources: SortArgs,
    },

    /// Split containers into sorted chunk containers
    Split {
        /// Input containers
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Directory receiving the chunks
        #[arg(short = 'd', long)]
        out_dir: PathBuf,

        #[command(flatten)]
        resources: SortArgs,
    },

    /// Merge sorted containers into one sorted container
    Merge {
        /// Input containers (must be sorted)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output container
        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        resources: SortArgs,
    },

    /// Codes present in any input
    Union(SetArgs),

    /// Codes present in every input
    Intersect(SetArgs),

    /// Codes of the first input absent from all others
    Diff(SetArgs),

    /// Codes present in at least two inputs
    Repeated(SetArgs),

    /// Codes present in exactly one input
    Unique(SetArgs),

    /// Print records as text
    Dump {
        /// Input container
        input: PathBuf,

        /// Stop after this many records
        #[arg(short = 'n', long)]
        limit: Option<u64>,
    },

    /// Print the header of a container
    Info {
        /// Input container
        input: PathBuf,
    },
}

#[derive(Args)]
struct PolicyArgs {
    /// Emit one record per distinct code
    #[arg(long, conflicts_with = "repeated")]
    unique: bool,

    /// Emit only codes occurring more than once
    #[arg(long)]
    repeated: bool,
}

impl PolicyArgs {
    fn policy(&self) -> OutputPolicy {
        if self.unique {
            OutputPolicy::Unique
        } else if self.repeated {
            OutputPolicy::RepeatedOnly
        } else {
            OutputPolicy::All
        }
    }
}

#[derive(Args)]
struct SortArgs {
    /// Memory per in-memory chunk in MiB (0 = sort entirely in memory)
    #[arg(long, default_value = "1024")]
    chunk_size: usize,

    /// Root directory for temporary chunk files
    #[arg(long)]
    tmp_dir: Option<PathBuf>,

    /// Maximum number of chunk files merged at once
    #[arg(long, default_value = "256")]
    max_open_files: usize,

    /// Number of threads (0 = all available cores)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,

    /// Keep temporary chunk files
    #[arg(long, default_value = "false")]
    keep_temp: bool,

    /// Accept inputs that disagree on taxid presence
    #[arg(long, default_value = "false")]
    mixed_taxid: bool,

    /// Store codes in the minimum number of bytes for k
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    compact: bool,
}

impl SortArgs {
    fn configuration(&self, policy: OutputPolicy) -> SortConfiguration {
        let mut config = SortConfiguration::from_chunk_mib(self.chunk_size).with_policy(policy);
        if let Some(tmp_dir) = &self.tmp_dir {
            config = config.with_tmp_dir(tmp_dir);
        }
        config.max_open_files = self.max_open_files;
        config.num_threads = self.threads;
        config.keep_temp = self.keep_temp;
        config.mixed_taxid = self.mixed_taxid;
        config.compact = self.compact;
        config
    }
}

#[derive(Args)]
struct SetArgs {
    /// Input containers
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output container
    #[arg(short, long)]
    output: PathBuf,

    /// Sort hash-join output
    #[arg(long, default_value = "false")]
    sort_output: bool,

    /// Accept inputs that disagree on taxid presence
    #[arg(long, default_value = "false")]
    mixed_taxid: bool,

    /// Join strategy: auto, hash or merge
    #[arg(long, default_value = "auto")]
    strategy: StrategyChoice,

    /// Store codes in the minimum number of bytes for k
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    compact: bool,
}

impl SetArgs {
    fn configuration(&self) -> SetConfiguration {
        SetConfiguration {
            sort_output: self.sort_output,
            mixed_taxid: self.mixed_taxid,
            strategy: self.strategy,
            compact: self.compact,
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let taxonomy = load_taxonomy(cli.taxonomy.as_deref())?;
    let taxonomy = taxonomy.as_ref();

    match cli.command {
        Commands::Encode { input, output, k, canonical, taxid, compact } => {
            encode_command(&input, &output, k, canonical, taxid.unwrap_or(0), compact)?;
        }
        Commands::Sort { inputs, output, policy, resources } => {
            let config = resources.configuration(policy.policy());
            let stats = sort_containers(&inputs, &output, &config, taxonomy)
                .with_context(|| format!("sorting into {}", output.display()))?;
            if stats.cleanup_failures > 0 {
                tracing::warn!("{} temporary files could not be removed", stats.cleanup_failures);
            }
        }
        Commands::Split { inputs, out_dir, resources } => {
            let config = resources.configuration(OutputPolicy::All);
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("creating {}", out_dir.display()))?;
            let chunks = split_containers(&inputs, &out_dir, &config, taxonomy)
                .with_context(|| format!("splitting into {}", out_dir.display()))?;
            for chunk in &chunks {
                println!("{}", chunk.display());
            }
        }
        Commands::Merge { inputs, output, policy, resources } => {
            let config = resources.configuration(policy.policy());
            merge_containers(&inputs, &output, &config, taxonomy)
                .with_context(|| format!("merging into {}", output.display()))?;
        }
        Commands::Union(args) => set_command(SetOperation::Union, &args, taxonomy)?,
        Commands::Intersect(args) => set_command(SetOperation::Intersection, &args, taxonomy)?,
        Commands::Diff(args) => set_command(SetOperation::Difference, &args, taxonomy)?,
        Commands::Repeated(args) => set_command(SetOperation::Repeated, &args, taxonomy)?,
        Commands::Unique(args) => set_command(SetOperation::Unique, &args, taxonomy)?,
        Commands::Dump { input, limit } => dump_command(&input, limit)?,
        Commands::Info { input } => info_command(&input)?,
    }

    Ok(())
}

fn load_taxonomy(path: Option<&Path>) -> anyhow::Result<Box<dyn Taxonomy>> {
    match path {
        Some(path) => {
            let taxonomy = ParentTaxonomy::from_path(path)
                .with_context(|| format!("loading taxonomy {}", path.display()))?;
            info!("Loaded taxonomy with {} nodes", taxonomy.len());
            Ok(Box::new(taxonomy))
        }
        None => Ok(Box::new(RootTaxonomy)),
    }
}

fn is_sequence_file(path: &Path) -> bool {
    let name = path.to_string_lossy();
    // Strip .gz suffix for extension check
    let name = name.strip_suffix(".gz").unwrap_or(&name);
    [".fa", ".fasta", ".fna", ".fq", ".fastq"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

/// Encode text or FASTA/FASTQ input into a new container
fn encode_command(
    input: &Path,
    output: &Path,
    k: usize,
    canonical: bool,
    taxid: u32,
    compact: bool,
) -> anyhow::Result<()> {
    info!("Encoding {} (k = {}, canonical = {})", input.display(), k, canonical);

    if is_sequence_file(input) {
        let info = StreamInfo {
            canonical,
            ..StreamInfo::kmers(k)
        };
        let header = ContainerHeader::for_stream(&info, compact).with_global_taxid(taxid);
        let mut writer = create_container(output, header)?;
        let summary = scan_fastx(input, k, canonical, taxid, |record| writer.write_record(record))
            .with_context(|| format!("scanning {}", input.display()))?;
        writer.finish_seekable()?;
        info!(
            "Read {} sequences ({} bases), wrote {} k-mers to {}",
            summary.sequences,
            summary.bases,
            summary.kmers,
            output.display()
        );
        return Ok(());
    }

    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let mut source = TextRecordSource::new(BufReader::new(file), k, canonical, input)?;
    let info = source.stream_info();
    let mut header = ContainerHeader::for_stream(&info, compact);
    if !info.has_taxid {
        header = header.with_global_taxid(taxid);
    }
    let mut writer = create_container(output, header)?;
    while let Some(mut record) = source.next_record()? {
        if record.taxid == 0 {
            record.taxid = taxid;
        }
        writer.write_record(record)?;
    }
    let written = writer.records_written();
    writer.finish_seekable()?;
    info!("Wrote {} records to {}", written, output.display());
    Ok(())
}

fn set_command(op: SetOperation, args: &SetArgs, taxonomy: &dyn Taxonomy) -> anyhow::Result<()> {
    if op == SetOperation::Difference && args.inputs.len() < 2 {
        bail!("diff needs at least two inputs");
    }
    let config = args.configuration();
    let outcome = run_set_operation(op, &args.inputs, &args.output, &config, taxonomy)
        .with_context(|| format!("computing {} into {}", op, args.output.display()))?;
    info!(
        "{}: {} records ({} strategy, sorted = {})",
        op, outcome.records, outcome.strategy, outcome.sorted
    );
    Ok(())
}

/// Print records as `<k-mer or hash>\t<taxid>`
fn dump_command(input: &Path, limit: Option<u64>) -> anyhow::Result<()> {
    let mut reader = open_container(input)?;
    let k = reader.k();
    let hashed = reader.is_hashed();

    let stdout = std::io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut printed = 0u64;
    while let Some(record) = reader.read_record()? {
        if limit.is_some_and(|n| printed >= n) {
            break;
        }
        if hashed {
            writeln!(out, "{}\t{}", record.code, record.taxid)?;
        } else {
            writeln!(out, "{}\t{}", decode(record.code, k)?, record.taxid)?;
        }
        printed += 1;
    }
    out.flush()?;
    Ok(())
}

fn info_command(input: &Path) -> anyhow::Result<()> {
    let reader = open_container(input)?;
    let header = reader.header();
    println!("file:         {}", input.display());
    println!("version:      {}.{}", header.version_major, header.version_minor);
    println!("k:            {}", header.k);
    println!("flags:        {}", header.flags);
    match header.record_count {
        Some(n) => println!("records:      {}", n),
        None => println!("records:      unknown"),
    }
    println!("global taxid: {}", header.global_taxid);
    println!("max taxid:    {}", header.max_taxid);
    println!("record width: {} bytes", header.record_width());
    Ok(())
}
