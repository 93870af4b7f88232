//! Append-only sample log (JSON lines)
//!
//! **Append-Only Write Pattern**:
//! - One writer (the optimizer) appends one newline-terminated line per sample
//! - A record is complete iff its line ends in `\n`
//! - Readers bound themselves to the byte length seen at open, so a log that
//!   grows during a scan yields a consistent prefix
//! - An unterminated tail is a torn write: readers ignore it, the writer
//!   truncates it away before resuming

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::sample::SampleRecord;
use crate::{Error, Result};

/// Writer side of the sample log.
#[derive(Debug)]
pub struct SampleLog {
    path: PathBuf,
    file: File,
    bytes: u64,
    records: u64,
    sync: bool,
}

impl SampleLog {
    /// Create a new, empty log. Fails if the file already exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>, sync: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            bytes: 0,
            records: 0,
            sync,
        })
    }

    /// Open an existing log for appending, returning its complete records.
    ///
    /// A torn tail left by an interrupted writer is truncated away.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StorageError`] for malformed complete lines, or
    /// [`Error::Io`] on filesystem failures.
    pub fn open_append(path: impl AsRef<Path>, sync: bool) -> Result<(Self, Vec<SampleRecord>)> {
        let path = path.as_ref().to_path_buf();
        let snapshot = scan(&path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        if snapshot.torn_bytes > 0 {
            warn!(
                path = %path.display(),
                torn_bytes = snapshot.torn_bytes,
                "truncating incomplete trailing sample record"
            );
            file.set_len(snapshot.complete_bytes)?;
        }

        let log = Self {
            path,
            file,
            bytes: snapshot.complete_bytes,
            records: snapshot.records.len() as u64,
            sync,
        };
        Ok((log, snapshot.records))
    }

    /// Append one record. Its index must equal the current record count.
    ///
    /// On a failed write the file is cut back to the last complete record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] for an out-of-sequence index,
    /// or [`Error::Io`] / [`Error::Json`] if the record cannot be written.
    pub fn append(&mut self, record: &SampleRecord) -> Result<()> {
        if record.index() != self.records {
            return Err(Error::InvariantViolation(format!(
                "appending sample {} to a log holding {} records",
                record.index(),
                self.records
            )));
        }

        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&line) {
            if let Err(truncate_err) = self.file.set_len(self.bytes) {
                warn!(
                    path = %self.path.display(),
                    error = %truncate_err,
                    "could not roll back partial sample record"
                );
            }
            return Err(e.into());
        }

        self.bytes += line.len() as u64;
        self.records += 1;
        Ok(())
    }

    fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// Number of complete records in the log.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.records
    }

    /// Whether the log holds no records.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every complete record present when the file was opened.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, or
/// [`Error::StorageError`] for malformed or out-of-sequence records.
pub fn read_records(path: impl AsRef<Path>) -> Result<Vec<SampleRecord>> {
    Ok(scan(path.as_ref())?.records)
}

struct Snapshot {
    records: Vec<SampleRecord>,
    complete_bytes: u64,
    torn_bytes: u64,
}

fn scan(path: &Path) -> Result<Snapshot> {
    let file = File::open(path)?;
    let observed = file.metadata()?.len();

    let mut bytes = Vec::new();
    file.take(observed).read_to_end(&mut bytes)?;

    let complete = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |p| p + 1);
    let mut records = Vec::new();
    for (lineno, line) in bytes[..complete].split(|b| *b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        let record: SampleRecord = serde_json::from_slice(line).map_err(|e| {
            Error::StorageError(format!(
                "{} line {}: malformed sample record: {e}",
                path.display(),
                lineno + 1
            ))
        })?;
        if record.index() != records.len() as u64 {
            return Err(Error::StorageError(format!(
                "{} line {}: expected sample {}, found {}",
                path.display(),
                lineno + 1,
                records.len(),
                record.index()
            )));
        }
        records.push(record);
    }

    Ok(Snapshot {
        records,
        complete_bytes: complete as u64,
        torn_bytes: (bytes.len() - complete) as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::MisfitVector;
    use tempfile::TempDir;

    fn record(index: u64) -> SampleRecord {
        #[allow(clippy::cast_precision_loss)]
        let x = index as f64;
        SampleRecord::evaluated(index, vec![x], MisfitVector::new(vec![x, x + 1.0]), vec![])
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");

        let mut log = SampleLog::create(&path, false).unwrap();
        for i in 0..5 {
            log.append(&record(i)).unwrap();
        }
        assert_eq!(log.len(), 5);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 5);
        assert_eq!(records[3], record(3));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        SampleLog::create(&path, false).unwrap();
        assert!(SampleLog::create(&path, false).is_err());
    }

    #[test]
    fn test_append_rejects_out_of_sequence() {
        let dir = TempDir::new().unwrap();
        let mut log = SampleLog::create(dir.path().join("s.jsonl"), false).unwrap();
        assert!(matches!(
            log.append(&record(1)),
            Err(Error::InvariantViolation(_))
        ));
        assert!(log.is_empty());
    }

    #[test]
    fn test_torn_tail_ignored_then_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        {
            let mut log = SampleLog::create(&path, false).unwrap();
            log.append(&record(0)).unwrap();
            log.append(&record(1)).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"index":2,"model":[2.0"#).unwrap();
        drop(file);

        assert_eq!(read_records(&path).unwrap().len(), 2);

        let (mut log, records) = SampleLog::open_append(&path, false).unwrap();
        assert_eq!(records.len(), 2);
        log.append(&record(2)).unwrap();
        drop(log);

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[2], record(2));
    }

    #[test]
    fn test_malformed_complete_line_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        std::fs::write(&path, b"not json\n").unwrap();
        assert!(matches!(read_records(&path), Err(Error::StorageError(_))));
    }

    #[test]
    fn test_gap_in_indices_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("samples.jsonl");
        let mut text = serde_json::to_string(&record(0)).unwrap();
        text.push('\n');
        text.push_str(&serde_json::to_string(&record(2)).unwrap());
        text.push('\n');
        std::fs::write(&path, text).unwrap();
        let err = read_records(&path).unwrap_err();
        assert!(err.to_string().contains("expected sample 1"));
    }
}
