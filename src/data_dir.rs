//! Where a knowledge base lives on disk.
//!
//! A data directory holds the engine settings (`config.json`), the
//! documents to index (`corpus.jsonl`) and the warm-start cache snapshot
//! (`cache.redb`). Indexes are rebuilt in memory from the corpus on every
//! start, so nothing else is stored.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "KBFUSE_DATA_DIR";

const CONFIG_FILE: &str = "config.json";
const CORPUS_FILE: &str = "corpus.jsonl";
const CACHE_FILE: &str = "cache.redb";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Pick the knowledge base directory: `--data-dir`, then
    /// `KBFUSE_DATA_DIR`, then `$XDG_DATA_HOME/kbfuse`. The directory is
    /// created if missing.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = match explicit {
            Some(path) => path.to_path_buf(),
            None => match std::env::var_os(DATA_DIR_ENV) {
                Some(val) => PathBuf::from(val),
                None => xdg::BaseDirectories::with_prefix("kbfuse")
                    .get_data_home()
                    .ok_or_else(|| {
                        Error::Config("no XDG data home for the knowledge base".into())
                    })?,
            },
        };

        std::fs::create_dir_all(&root).map_err(|_| Error::DataDir(root.clone()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Engine settings. A missing file means all defaults.
    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Documents to index, one JSON object per line.
    pub fn corpus_file(&self) -> PathBuf {
        self.root.join(CORPUS_FILE)
    }

    /// Snapshot of the result, hypothetical-answer and rerank caches,
    /// reloaded on start and rewritten after each CLI search.
    pub fn cache_db(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn knowledge_base_files_sit_in_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::resolve(Some(tmp.path())).unwrap();

        assert_eq!(dir.root(), tmp.path());
        assert_eq!(dir.config_file(), tmp.path().join("config.json"));
        assert_eq!(dir.corpus_file(), tmp.path().join("corpus.jsonl"));
        assert_eq!(dir.cache_db(), tmp.path().join("cache.redb"));
    }

    #[test]
    fn explicit_directory_is_created() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("notes").join("kb");
        let dir = DataDir::resolve(Some(&nested)).unwrap();

        assert!(dir.root().is_dir());
        assert!(!dir.corpus_file().exists());
    }

    #[test]
    fn file_in_the_way_is_a_data_dir_error() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("kb");
        std::fs::write(&blocker, "not a directory").unwrap();

        let err = DataDir::resolve(Some(&blocker)).unwrap_err();
        assert!(matches!(err, Error::DataDir(path) if path == blocker));
    }
}
