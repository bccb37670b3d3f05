use std::path::Path;

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition,
};

use crate::error::Result;

const RESULTS: TableDefinition<&str, &str> = TableDefinition::new("results");
const HYPOTHETICAL: TableDefinition<&str, &str> =
    TableDefinition::new("hypothetical");
const RERANK: TableDefinition<&str, &str> = TableDefinition::new("rerank");

/// The logical caches that have their own snapshot table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTable {
    Results,
    Hypothetical,
    Rerank,
}

impl CacheTable {
    pub const ALL: [CacheTable; 3] =
        [CacheTable::Results, CacheTable::Hypothetical, CacheTable::Rerank];

    fn definition(self) -> TableDefinition<'static, &'static str, &'static str> {
        match self {
            CacheTable::Results => RESULTS,
            CacheTable::Hypothetical => HYPOTHETICAL,
            CacheTable::Rerank => RERANK,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CacheTable::Results => "results",
            CacheTable::Hypothetical => "hypothetical",
            CacheTable::Rerank => "rerank",
        }
    }
}

/// On-disk warm-start snapshot of the in-memory caches.
///
/// Rows are opaque JSON strings; decoding and expiry checks happen in
/// [`crate::cache::CacheService`].
pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        for table in CacheTable::ALL {
            txn.open_table(table.definition())?;
        }
        txn.commit()?;

        Ok(Self { db })
    }

    /// Replace the contents of `table` with `rows` in one transaction.
    pub fn replace(
        &self,
        table: CacheTable,
        rows: &[(String, String)],
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(table.definition())?;
        {
            let mut t = txn.open_table(table.definition())?;
            for (key, value) in rows {
                t.insert(key.as_str(), value.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn load(&self, table: CacheTable) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table.definition())?;
        let mut result = Vec::new();
        for entry in t.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    pub fn count(&self, table: CacheTable) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let t = txn.open_table(table.definition())?;
        Ok(t.len()?)
    }

    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        for table in CacheTable::ALL {
            txn.delete_table(table.definition())?;
            txn.open_table(table.definition())?;
        }
        txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn open_creates_empty_tables() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();
        for table in CacheTable::ALL {
            assert_eq!(store.count(table).unwrap(), 0);
        }
    }

    #[test]
    fn replace_overwrites_previous_rows() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();

        store
            .replace(CacheTable::Results, &rows(&[("a", "1"), ("b", "2")]))
            .unwrap();
        store
            .replace(CacheTable::Results, &rows(&[("c", "3")]))
            .unwrap();

        assert_eq!(
            store.load(CacheTable::Results).unwrap(),
            rows(&[("c", "3")])
        );
    }

    #[test]
    fn tables_are_independent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();

        store
            .replace(CacheTable::Hypothetical, &rows(&[("q", "answer")]))
            .unwrap();

        assert_eq!(store.count(CacheTable::Hypothetical).unwrap(), 1);
        assert_eq!(store.count(CacheTable::Results).unwrap(), 0);
        assert_eq!(store.count(CacheTable::Rerank).unwrap(), 0);
    }

    #[test]
    fn data_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cache.redb");
        {
            let store = CacheStore::open(&path).unwrap();
            store
                .replace(CacheTable::Rerank, &rows(&[("k", "[\"d1\"]")]))
                .unwrap();
        }
        let store = CacheStore::open(&path).unwrap();
        assert_eq!(
            store.load(CacheTable::Rerank).unwrap(),
            rows(&[("k", "[\"d1\"]")])
        );
    }

    #[test]
    fn clear_empties_every_table() {
        let tmp = tempfile::tempdir().unwrap();
        let store = CacheStore::open(&tmp.path().join("cache.redb")).unwrap();
        for table in CacheTable::ALL {
            store.replace(table, &rows(&[("x", "y")])).unwrap();
        }

        store.clear().unwrap();

        for table in CacheTable::ALL {
            assert_eq!(store.count(table).unwrap(), 0);
        }
    }
}
