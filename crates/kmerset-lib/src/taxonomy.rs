//! Taxonomy collaborator: lowest-common-ancestor queries
//!
//! The engines only need `LCA(a, b)`. Loading a real tree is the caller's
//! business; [`ParentTaxonomy`] covers the common parent-table case and
//! [`RootTaxonomy`] is the fallback when no tree is supplied.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use ahash::{AHashMap, AHashSet};

use crate::constants::{ROOT_TAXID, UNKNOWN_TAXID};
use crate::error::{KmerSetError, Result};

/// Source of lowest-common-ancestor answers; must be pure
pub trait Taxonomy: Send + Sync {
    /// Lowest common ancestor of two taxa
    fn lca(&self, a: u32, b: u32) -> u32;
}

/// Fold two taxids of the same code
///
/// `0` is the absorbing "unknown" identity: combining it with any value
/// yields that value unchanged.
#[inline]
pub fn fold_taxid(taxonomy: &dyn Taxonomy, a: u32, b: u32) -> u32 {
    if a == UNKNOWN_TAXID {
        b
    } else if b == UNKNOWN_TAXID || a == b {
        a
    } else {
        taxonomy.lca(a, b)
    }
}

/// Flat taxonomy: any two distinct taxa meet at the root
#[derive(Debug, Clone, Copy, Default)]
pub struct RootTaxonomy;

impl Taxonomy for RootTaxonomy {
    fn lca(&self, a: u32, b: u32) -> u32 {
        if a == b {
            a
        } else {
            ROOT_TAXID
        }
    }
}

/// Taxonomy backed by a child -> parent table
#[derive(Debug, Clone, Default)]
pub struct ParentTaxonomy {
    parents: AHashMap<u32, u32>,
}

impl ParentTaxonomy {
    /// Build from (child, parent) pairs; the root is its own parent
    pub fn from_pairs<I: IntoIterator<Item = (u32, u32)>>(pairs: I) -> Self {
        Self {
            parents: pairs.into_iter().collect(),
        }
    }

    /// Parse `child<sep>parent` lines
    ///
    /// Accepts whitespace-separated pairs and NCBI `nodes.dmp` rows
    /// (`child\t|\tparent\t|\t...`). Blank lines and `#` comments are skipped.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut parents = AHashMap::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| KmerSetError::Parse {
                line: idx + 1,
                message: e.to_string(),
            })?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let mut fields = trimmed
                .split(|c: char| c == '|' || c.is_whitespace())
                .filter(|f| !f.is_empty());
            let mut next_id = |what: &str| -> Result<u32> {
                let field = fields.next().ok_or_else(|| KmerSetError::Parse {
                    line: idx + 1,
                    message: format!("missing {what} taxid"),
                })?;
                field.parse().map_err(|_| KmerSetError::Parse {
                    line: idx + 1,
                    message: format!("invalid {what} taxid '{field}'"),
                })
            };
            let child = next_id("child")?;
            let parent = next_id("parent")?;
            parents.insert(child, parent);
        }
        Ok(Self { parents })
    }

    /// Load a parent table from a file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| KmerSetError::io(path, "open taxonomy", e))?;
        Self::from_reader(BufReader::new(file))
    }

    /// Number of taxa with a recorded parent
    pub fn len(&self) -> usize {
        self.parents.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }

    /// Parent of a taxon, `None` at the root or for unknown taxa
    pub fn parent(&self, taxid: u32) -> Option<u32> {
        match self.parents.get(&taxid) {
            Some(&p) if p != taxid => Some(p),
            _ => None,
        }
    }
}

impl Taxonomy for ParentTaxonomy {
    fn lca(&self, a: u32, b: u32) -> u32 {
        if a == b {
            return a;
        }
        // Bounded walks guard against cycles in malformed tables
        let limit = self.parents.len() + 1;
        let mut ancestors = AHashSet::new();
        let mut node = a;
        ancestors.insert(node);
        for _ in 0..limit {
            match self.parent(node) {
                Some(p) => {
                    node = p;
                    ancestors.insert(node);
                }
                None => break,
            }
        }
        let mut node = b;
        for _ in 0..=limit {
            if ancestors.contains(&node) {
                return node;
            }
            match self.parent(node) {
                Some(p) => node = p,
                None => break,
            }
        }
        ROOT_TAXID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ParentTaxonomy {
        //        1
        //        |
        //        3
        //      /   \
        //     9     7
        //           |
        //           33
        ParentTaxonomy::from_pairs([(1, 1), (3, 1), (9, 3), (7, 3), (33, 7)])
    }

    #[test]
    fn test_parent_lca() {
        let t = tree();
        assert_eq!(t.lca(9, 33), 3);
        assert_eq!(t.lca(33, 9), 3);
        assert_eq!(t.lca(7, 33), 7);
        assert_eq!(t.lca(33, 33), 33);
        assert_eq!(t.lca(1, 9), 1);
        // Unknown taxa meet at the root
        assert_eq!(t.lca(9, 1000), 1);
    }

    #[test]
    fn test_fold_taxid_zero_is_absorbing() {
        let t = tree();
        assert_eq!(fold_taxid(&t, 0, 9), 9);
        assert_eq!(fold_taxid(&t, 9, 0), 9);
        assert_eq!(fold_taxid(&t, 0, 0), 0);
        assert_eq!(fold_taxid(&t, 9, 33), 3);
    }

    #[test]
    fn test_root_taxonomy() {
        assert_eq!(RootTaxonomy.lca(5, 5), 5);
        assert_eq!(RootTaxonomy.lca(5, 6), ROOT_TAXID);
    }

    #[test]
    fn test_from_reader_nodes_dmp() {
        let text = "1\t|\t1\t|\tno rank\t|\n3\t|\t1\t|\tgenus\t|\n# comment\n\n9 3\n";
        let t = ParentTaxonomy::from_reader(text.as_bytes()).unwrap();
        assert_eq!(t.len(), 3);
        assert_eq!(t.parent(9), Some(3));
        assert_eq!(t.parent(1), None);
    }

    #[test]
    fn test_from_reader_rejects_garbage() {
        let err = ParentTaxonomy::from_reader("9 x\n".as_bytes()).unwrap_err();
        assert!(matches!(err, KmerSetError::Parse { line: 1, .. }));
    }

    #[test]
    fn test_cycle_terminates() {
        let t = ParentTaxonomy::from_pairs([(5, 6), (6, 5), (8, 8)]);
        assert_eq!(t.lca(5, 8), ROOT_TAXID);
    }
}
