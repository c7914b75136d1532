//! Multi-behavior interaction dataset.
//!
//! A dataset directory holds one training file per behavior and one file of
//! held-out test interactions:
//!
//! ```text
//! data/
//!   trn_pv.txt      # "user item" per line, one file per behavior
//!   trn_fav.txt
//!   trn_cart.txt
//!   trn_buy.txt     # last behavior = target behavior (training label)
//!   tst_int.txt     # "user item": one held-out item per test user
//! ```
//!
//! Fields may be separated by whitespace, commas or tabs; a third column
//! (interaction value) is accepted and ignored since matrices are binarised.
//! Lines starting with `#` are comments. Entity counts are derived from the
//! largest id seen in any file.

use crate::error::{Error, Result};
use crate::sparse::SparseMatrix;
use std::path::Path;

/// Training interactions for every behavior plus the held-out test items.
#[derive(Debug, Clone)]
pub struct Dataset {
    behaviors: Vec<String>,
    trn_mats: Vec<SparseMatrix>,
    adj: SparseMatrix,
    tp_adj: SparseMatrix,
    trn_label: SparseMatrix,
    tst_int: Vec<Option<usize>>,
    tst_users: Vec<usize>,
}

impl Dataset {
    /// Build from in-memory `(user, item)` pairs.
    ///
    /// `behaviors` is ordered; the last entry is the target behavior.
    pub fn from_interactions(
        user_count: usize,
        item_count: usize,
        behaviors: Vec<(String, Vec<(usize, usize)>)>,
        test: &[(usize, usize)],
    ) -> Result<Self> {
        if behaviors.is_empty() {
            return Err(Error::InvalidConfig("at least one behavior is required".into()));
        }

        let mut names = Vec::with_capacity(behaviors.len());
        let mut trn_mats = Vec::with_capacity(behaviors.len());
        for (name, pairs) in behaviors {
            trn_mats.push(SparseMatrix::from_pairs(user_count, item_count, pairs)?);
            names.push(name);
        }

        let mut adj = SparseMatrix::zeros(user_count, item_count);
        for mat in &trn_mats {
            adj = adj.add(mat)?;
        }
        let tp_adj = adj.transpose();
        let trn_label = trn_mats[trn_mats.len() - 1].binarize();

        let mut tst_int = vec![None; user_count];
        for &(u, i) in test {
            if u >= user_count {
                return Err(Error::IndexOutOfBounds {
                    index: u,
                    bound: user_count,
                    context: "test users",
                });
            }
            if i >= item_count {
                return Err(Error::IndexOutOfBounds {
                    index: i,
                    bound: item_count,
                    context: "test items",
                });
            }
            if tst_int[u].replace(i).is_some() {
                return Err(Error::Sampling(format!(
                    "user {u} has more than one held-out test item"
                )));
            }
        }
        let tst_users = tst_int
            .iter()
            .enumerate()
            .filter_map(|(u, i)| i.map(|_| u))
            .collect();

        Ok(Self {
            behaviors: names,
            trn_mats,
            adj,
            tp_adj,
            trn_label,
            tst_int,
            tst_users,
        })
    }

    /// Load `trn_<behavior>.txt` for each behavior and `tst_int.txt` from `dir`.
    pub fn load(dir: impl AsRef<Path>, behaviors: &[String]) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::with_capacity(behaviors.len());
        let mut user_count = 0;
        let mut item_count = 0;
        for name in behaviors {
            let pairs = read_pairs(&dir.join(format!("trn_{name}.txt")))?;
            for &(u, i) in &pairs {
                user_count = user_count.max(u + 1);
                item_count = item_count.max(i + 1);
            }
            files.push((name.clone(), pairs));
        }
        let test = read_pairs(&dir.join("tst_int.txt"))?;
        for &(u, i) in &test {
            user_count = user_count.max(u + 1);
            item_count = item_count.max(i + 1);
        }

        let dataset = Self::from_interactions(user_count, item_count, files, &test)?;
        tracing::info!(
            users = user_count,
            items = item_count,
            behaviors = dataset.beh_num(),
            test_users = dataset.tst_users.len(),
            "dataset loaded from {}",
            dir.display()
        );
        Ok(dataset)
    }

    pub fn user_count(&self) -> usize {
        self.adj.nrows()
    }

    pub fn item_count(&self) -> usize {
        self.adj.ncols()
    }

    pub fn beh_num(&self) -> usize {
        self.trn_mats.len()
    }

    pub fn behaviors(&self) -> &[String] {
        &self.behaviors
    }

    /// Binarised `users × items` matrix per behavior.
    pub fn trn_mats(&self) -> &[SparseMatrix] {
        &self.trn_mats
    }

    /// Sum of all behavior matrices (`users × items`).
    pub fn adj(&self) -> &SparseMatrix {
        &self.adj
    }

    /// Transpose of [`adj`](Self::adj) (`items × users`).
    pub fn tp_adj(&self) -> &SparseMatrix {
        &self.tp_adj
    }

    /// Target-behavior label matrix.
    pub fn trn_label(&self) -> &SparseMatrix {
        &self.trn_label
    }

    /// Held-out item per user, if any.
    pub fn tst_int(&self) -> &[Option<usize>] {
        &self.tst_int
    }

    /// Users that have a held-out item, ascending.
    pub fn tst_users(&self) -> &[usize] {
        &self.tst_users
    }
}

fn read_pairs(path: &Path) -> Result<Vec<(usize, usize)>> {
    let text = std::fs::read_to_string(path)?;
    let shown = path.display().to_string();
    let mut pairs = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|f| !f.is_empty());
        let mut next_id = |what: &str| -> Result<usize> {
            let field = fields.next().ok_or_else(|| Error::Parse {
                path: shown.clone(),
                line: lineno + 1,
                message: format!("missing {what} id"),
            })?;
            field.parse().map_err(|_| Error::Parse {
                path: shown.clone(),
                line: lineno + 1,
                message: format!("invalid {what} id {field:?}"),
            })
        };
        let user = next_id("user")?;
        let item = next_id("item")?;
        pairs.push((user, item));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy() -> Dataset {
        Dataset::from_interactions(
            3,
            4,
            vec![
                ("pv".into(), vec![(0, 0), (0, 1), (1, 2), (2, 3)]),
                ("buy".into(), vec![(0, 1), (2, 3)]),
            ],
            &[(0, 2), (1, 3)],
        )
        .unwrap()
    }

    #[test]
    fn test_combined_adjacency() {
        let data = toy();
        assert_eq!(data.user_count(), 3);
        assert_eq!(data.item_count(), 4);
        assert_eq!(data.adj().get(0, 1), 2.0);
        assert_eq!(data.adj().get(0, 0), 1.0);
        assert_eq!(data.tp_adj().get(1, 0), 2.0);
    }

    #[test]
    fn test_label_is_last_behavior() {
        let data = toy();
        assert_eq!(data.trn_label().row_indices(0), &[1]);
        assert!(data.trn_label().row_indices(1).is_empty());
    }

    #[test]
    fn test_test_users() {
        let data = toy();
        assert_eq!(data.tst_users(), &[0, 1]);
        assert_eq!(data.tst_int()[2], None);
    }

    #[test]
    fn test_duplicate_test_item_rejected() {
        let err = Dataset::from_interactions(
            2,
            2,
            vec![("buy".into(), vec![(0, 0)])],
            &[(0, 1), (0, 0)],
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trn_pv.txt"), "# user item\n0 1\n1,2\n").unwrap();
        std::fs::write(dir.path().join("trn_buy.txt"), "0\t1\t1.0\n").unwrap();
        std::fs::write(dir.path().join("tst_int.txt"), "1 0\n").unwrap();

        let data = Dataset::load(dir.path(), &["pv".to_string(), "buy".to_string()]).unwrap();
        assert_eq!(data.user_count(), 2);
        assert_eq!(data.item_count(), 3);
        assert_eq!(data.behaviors(), &["pv".to_string(), "buy".to_string()]);
        assert_eq!(data.tst_int()[1], Some(0));
    }

    #[test]
    fn test_parse_error_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("trn_buy.txt"), "0 1\nx 2\n").unwrap();
        std::fs::write(dir.path().join("tst_int.txt"), "").unwrap();
        let err = Dataset::load(dir.path(), &["buy".to_string()]).unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
    }
}
