use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use vigil_core::{ImmutableLog, PartitionKey, VigilError, VigilResult};

const FILE_PREFIX: &str = "vigil_audit_";
const FILE_SUFFIX: &str = ".jsonl";

/// Append-only newline-delimited JSON log, one file per partition.
///
/// Files are only ever opened for append; nothing in this type can rewrite
/// or truncate an existing line. Every append is synced to disk before
/// returning, which is what lets the trail treat a returned `Ok` as a
/// committed record.
pub struct JsonlLog {
    dir: PathBuf,
}

impl JsonlLog {
    pub fn open(dir: impl Into<PathBuf>) -> VigilResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            VigilError::Storage(format!(
                "failed to create audit log directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    fn partition_path(&self, partition: &PartitionKey) -> PathBuf {
        self.dir.join(format!(
            "{}{}_{}{}",
            FILE_PREFIX, partition.environment, partition.date, FILE_SUFFIX
        ))
    }

    fn partition_from_path(path: &Path) -> Option<PartitionKey> {
        let name = path.file_name()?.to_str()?;
        let stem = name.strip_prefix(FILE_PREFIX)?.strip_suffix(FILE_SUFFIX)?;
        // The date is the trailing segment; the environment may itself
        // contain underscores.
        let (environment, date) = stem.rsplit_once('_')?;
        Some(PartitionKey::new(environment, date))
    }
}

impl ImmutableLog for JsonlLog {
    fn append(&self, partition: &PartitionKey, line: &str) -> VigilResult<()> {
        let path = self.partition_path(partition);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| {
                VigilError::Storage(format!("failed to open {}: {}", path.display(), e))
            })?;

        file.write_all(line.as_bytes())
            .and_then(|_| file.write_all(b"\n"))
            .and_then(|_| file.sync_data())
            .map_err(|e| {
                VigilError::Storage(format!("failed to append to {}: {}", path.display(), e))
            })
    }

    fn read_all(&self, partition: &PartitionKey) -> VigilResult<Vec<String>> {
        let path = self.partition_path(partition);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| VigilError::Storage(format!("failed to read {}: {}", path.display(), e)))?;
        Ok(contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.to_string())
            .collect())
    }

    fn partitions(&self) -> VigilResult<Vec<PartitionKey>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            VigilError::Storage(format!("failed to list {}: {}", self.dir.display(), e))
        })?;

        let mut keys: Vec<PartitionKey> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::partition_from_path(&entry.path()))
            .collect();
        keys.sort_by(|a, b| (&a.environment, &a.date).cmp(&(&b.environment, &b.date)));
        Ok(keys)
    }
}

/// In-memory log for tests and ephemeral runs.
#[derive(Default)]
pub struct MemoryLog {
    lines: Mutex<HashMap<PartitionKey, Vec<String>>>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImmutableLog for MemoryLog {
    fn append(&self, partition: &PartitionKey, line: &str) -> VigilResult<()> {
        self.lines
            .lock()
            .map_err(|e| VigilError::Storage(format!("log lock poisoned: {}", e)))?
            .entry(partition.clone())
            .or_default()
            .push(line.to_string());
        Ok(())
    }

    fn read_all(&self, partition: &PartitionKey) -> VigilResult<Vec<String>> {
        Ok(self
            .lines
            .lock()
            .map_err(|e| VigilError::Storage(format!("log lock poisoned: {}", e)))?
            .get(partition)
            .cloned()
            .unwrap_or_default())
    }

    fn partitions(&self) -> VigilResult<Vec<PartitionKey>> {
        let mut keys: Vec<PartitionKey> = self
            .lines
            .lock()
            .map_err(|e| VigilError::Storage(format!("log lock poisoned: {}", e)))?
            .keys()
            .cloned()
            .collect();
        keys.sort_by(|a, b| (&a.environment, &a.date).cmp(&(&b.environment, &b.date)));
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    fn test_dir() -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "vigil-test-log-{:?}-{}",
            std::thread::current().id(),
            id
        ))
    }

    #[test]
    fn test_jsonl_append_and_read_in_order() {
        let dir = test_dir();
        let log = JsonlLog::open(&dir).unwrap();
        let partition = PartitionKey::new("production", "2026-08-05");

        log.append(&partition, r#"{"n":1}"#).unwrap();
        log.append(&partition, r#"{"n":2}"#).unwrap();
        log.append(&partition, r#"{"n":3}"#).unwrap();

        let lines = log.read_all(&partition).unwrap();
        assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":2}"#, r#"{"n":3}"#]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_jsonl_empty_partition_reads_empty() {
        let dir = test_dir();
        let log = JsonlLog::open(&dir).unwrap();
        let lines = log
            .read_all(&PartitionKey::new("production", "1970-01-01"))
            .unwrap();
        assert!(lines.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_jsonl_partitions_are_separate_files() {
        let dir = test_dir();
        let log = JsonlLog::open(&dir).unwrap();
        let day1 = PartitionKey::new("production", "2026-08-04");
        let day2 = PartitionKey::new("production", "2026-08-05");

        log.append(&day1, "a").unwrap();
        log.append(&day2, "b").unwrap();
        log.append(&day2, "c").unwrap();

        assert_eq!(log.read_all(&day1).unwrap().len(), 1);
        assert_eq!(log.read_all(&day2).unwrap().len(), 2);
        assert_eq!(log.partitions().unwrap(), vec![day1, day2]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_jsonl_partition_key_with_underscored_environment() {
        let dir = test_dir();
        let log = JsonlLog::open(&dir).unwrap();
        let partition = PartitionKey::new("staging_eu", "2026-08-05");
        log.append(&partition, "x").unwrap();
        assert_eq!(log.partitions().unwrap(), vec![partition]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_memory_log_roundtrip() {
        let log = MemoryLog::new();
        let partition = PartitionKey::new("test", "2026-08-05");
        log.append(&partition, "one").unwrap();
        log.append(&partition, "two").unwrap();
        assert_eq!(log.read_all(&partition).unwrap(), vec!["one", "two"]);
        assert_eq!(log.partitions().unwrap().len(), 1);
    }
}
