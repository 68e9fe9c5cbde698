//! Append-only record of completed seeds.
//!
//! Each completed seed is one line:
//!
//! ```text
//! SEED_COMPLETE,<index>,<elapsed_nanos>,<artifact_bytes>,<rate>
//! ```
//!
//! Lines are only ever appended, so a crash loses at most the seed that was in
//! flight. Lines with any other shape are skipped on load.

use crate::error::{BenchError, Result};
use crate::result::BenchmarkResult;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default progress file name, next to the config.
pub const PROGRESS_FILE: &str = "benchmark-progress.txt";

const RECORD_TAG: &str = "SEED_COMPLETE";

/// Completed seeds of the current session, backed by a file.
#[derive(Debug)]
pub struct ProgressStore {
    path: PathBuf,
    records: BTreeMap<usize, BenchmarkResult>,
}

impl ProgressStore {
    /// Open the store at `path`, loading any records already there.
    ///
    /// A missing file is an empty store. When an index appears twice the later
    /// line wins.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut records = BTreeMap::new();

        match File::open(&path) {
            Ok(file) => {
                for (lineno, line) in BufReader::new(file).lines().enumerate() {
                    let line = line.map_err(|e| BenchError::io(&path, e))?;
                    match parse_record(&line) {
                        Some((index, result)) => {
                            records.insert(index, result);
                        }
                        None if line.trim().is_empty() => {}
                        None => {
                            tracing::debug!(line = lineno + 1, "skipping unrecognised progress line");
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BenchError::io(&path, e)),
        }

        if !records.is_empty() {
            tracing::info!(
                path = %path.display(),
                completed = records.len(),
                "loaded benchmark progress"
            );
        }
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&BenchmarkResult> {
        self.records.get(&index)
    }

    /// Completed records in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BenchmarkResult)> {
        self.records.iter().map(|(i, r)| (*i, r))
    }

    /// First index in `0..seed_count` without a record, or `None` if all are done.
    pub fn resume_index(&self, seed_count: usize) -> Option<usize> {
        (0..seed_count).find(|i| !self.records.contains_key(i))
    }

    /// Append one completed seed and sync it to disk before returning.
    pub fn append(&mut self, index: usize, result: &BenchmarkResult) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| BenchError::io(&self.path, e))?;
        writeln!(file, "{}", format_record(index, result))
            .and_then(|()| file.sync_data())
            .map_err(|e| BenchError::io(&self.path, e))?;

        self.records.insert(index, result.clone());
        Ok(())
    }

    /// Forget every record and remove the file.
    pub fn clear(&mut self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::info!(path = %self.path.display(), "cleared benchmark progress"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(BenchError::io(&self.path, e)),
        }
        self.records.clear();
        Ok(())
    }
}

fn format_record(index: usize, result: &BenchmarkResult) -> String {
    format!(
        "{RECORD_TAG},{index},{},{},{}",
        result.elapsed_nanos(),
        result.artifact_bytes,
        result.rate
    )
}

fn parse_record(line: &str) -> Option<(usize, BenchmarkResult)> {
    let mut fields = line.trim().split(',');
    if fields.next()? != RECORD_TAG {
        return None;
    }
    let index = fields.next()?.trim().parse().ok()?;
    let nanos: u64 = fields.next()?.trim().parse().ok()?;
    let artifact_bytes = fields.next()?.trim().parse().ok()?;
    let rate: f64 = fields.next()?.trim().parse().ok()?;
    if fields.next().is_some() || !rate.is_finite() {
        return None;
    }

    let elapsed = (nanos > 0).then(|| Duration::from_nanos(nanos));
    Some((
        index,
        BenchmarkResult {
            elapsed,
            artifact_bytes,
            rate,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(secs: u64, bytes: u64) -> BenchmarkResult {
        BenchmarkResult::new(Some(Duration::from_secs(secs)), bytes, 16)
    }

    #[test]
    fn should_start_empty_when_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = ProgressStore::open(dir.path().join(PROGRESS_FILE)).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.resume_index(5), Some(0));
    }

    #[test]
    fn should_reload_appended_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);

        let mut store = ProgressStore::open(&path).unwrap();
        store.append(0, &result(10, 1000)).unwrap();
        store.append(1, &result(20, 2000)).unwrap();
        store.append(2, &BenchmarkResult::new(None, 3000, 16)).unwrap();

        let reloaded = ProgressStore::open(&path).unwrap();
        assert_eq!(reloaded.len(), 3);
        assert_eq!(reloaded.get(0), Some(&result(10, 1000)));
        assert_eq!(reloaded.get(1).unwrap().artifact_bytes, 2000);
        assert!(reloaded.get(2).unwrap().is_anomalous());
        assert_eq!(reloaded.resume_index(5), Some(3));
        assert_eq!(reloaded.resume_index(3), None);
    }

    #[test]
    fn should_write_one_tagged_line_per_seed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);

        let mut store = ProgressStore::open(&path).unwrap();
        store.append(0, &result(1, 5)).unwrap();
        store.append(1, &result(2, 6)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("SEED_COMPLETE,0,1000000000,5,"));
        assert!(lines[1].starts_with("SEED_COMPLETE,1,2000000000,6,"));
    }

    #[test]
    fn should_skip_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        std::fs::write(
            &path,
            "# header\n\
             SEED_COMPLETE,0,5000,10,1.5\n\
             SEED_COMPLETE,1,notanumber,10,1.5\n\
             SEED_COMPLETE,2,5000\n\
             SEED_COMPLETE,3,5000,10,1.5,extra\n\
             SEED_STARTED,4,0,0,0\n\
             \n\
             SEED_COMPLETE,5,7000,20,2.5\n",
        )
        .unwrap();

        let store = ProgressStore::open(&path).unwrap();
        let indices: Vec<_> = store.iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 5]);
        assert_eq!(store.resume_index(6), Some(1));
    }

    #[test]
    fn should_let_later_duplicate_win() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);
        std::fs::write(
            &path,
            "SEED_COMPLETE,0,1000,1,1\nSEED_COMPLETE,0,2000,2,2\n",
        )
        .unwrap();

        let store = ProgressStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).unwrap().artifact_bytes, 2);
    }

    #[test]
    fn should_clear_file_and_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PROGRESS_FILE);

        let mut store = ProgressStore::open(&path).unwrap();
        store.append(0, &result(1, 1)).unwrap();
        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(!path.exists());

        // Clearing again is fine.
        store.clear().unwrap();
        assert!(ProgressStore::open(&path).unwrap().is_empty());
    }
}
