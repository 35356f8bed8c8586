//! # Transaction Log
//!
//! Append-only journal of store mutations. One record per line, a one-digit
//! kind followed by a space and the payload:
//!
//! ```text
//! 0 <entry line>    ADD
//! 1 <key>           DELETE
//! 2 <key>           TOUCH
//! 3 <version tag>   VERSION
//! ```
//!
//! Replaying the file from the start rebuilds the entry index and LRU order.
//! A checkpoint rewrites the log as a version record plus one `ADD` per live
//! entry, written to `CHECKPOINT` and renamed over `LOG`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::store::StoreId;
use crate::store::entry::CacheEntry;
use crate::store::lru::LruOrder;

pub const LOG_FILE: &str = "LOG";
pub const CHECKPOINT_FILE: &str = "CHECKPOINT";
pub const LOG_VERSION: &str = "1.3";
pub const ACCEPTED_VERSIONS: &[&str] = &["1.2", "1.3"];

/// One journal record.
#[derive(Debug, Clone, PartialEq)]
pub enum LogRecord {
    Add(CacheEntry),
    Delete(CacheKey),
    Touch(CacheKey),
    Version(String),
}

impl LogRecord {
    pub fn encode(&self) -> String {
        match self {
            LogRecord::Add(entry) => format!("0 {}", entry.to_log_line()),
            LogRecord::Delete(key) => format!("1 {key}"),
            LogRecord::Touch(key) => format!("2 {key}"),
            LogRecord::Version(tag) => format!("3 {tag}"),
        }
    }

    /// Decode one line (without its newline). Malformed lines yield `None`.
    pub fn decode(line: &str, store: StoreId) -> Option<Self> {
        let (kind, payload) = line.split_at_checked(2)?;
        match kind {
            "0 " => CacheEntry::parse_log_line(payload, store).map(LogRecord::Add),
            "1 " => Some(LogRecord::Delete(CacheKey::from_normalized(payload))),
            "2 " => Some(LogRecord::Touch(CacheKey::from_normalized(payload))),
            "3 " => Some(LogRecord::Version(payload.trim().to_string())),
            _ => None,
        }
    }
}

/// State rebuilt from a log file.
#[derive(Debug, Default)]
pub struct Replay {
    pub entries: HashMap<CacheKey, CacheEntry>,
    pub lru: LruOrder,
    pub size: u64,
    /// Lines that could not be decoded or referred to unknown keys
    pub skipped: usize,
    /// Set when an unsupported version tag threw away everything read
    pub discarded: bool,
}

impl Replay {
    fn apply(&mut self, record: LogRecord) -> bool {
        match record {
            LogRecord::Add(entry) => {
                let key = entry.key.clone();
                self.size += entry.size;
                if let Some(previous) = self.entries.insert(key.clone(), entry) {
                    self.size -= previous.size;
                }
                self.lru.insert_if_absent(&key);
            }
            LogRecord::Delete(key) => match self.entries.remove(&key) {
                Some(entry) => {
                    self.size -= entry.size;
                    self.lru.remove(&key);
                }
                None => self.skipped += 1,
            },
            LogRecord::Touch(key) => {
                if self.entries.contains_key(&key) {
                    self.lru.touch(&key);
                } else {
                    self.skipped += 1;
                }
            }
            LogRecord::Version(tag) => {
                if !ACCEPTED_VERSIONS.contains(&tag.as_str()) {
                    warn!(version = %tag, "Unsupported transaction log version, starting empty");
                    self.entries.clear();
                    self.lru.clear();
                    self.size = 0;
                    self.discarded = true;
                    return false;
                }
            }
        }
        true
    }
}

/// Handle on a store directory's `LOG` file.
#[derive(Debug)]
pub struct TransactionLog {
    dir: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl TransactionLog {
    /// Open `LOG` in `dir` for appending, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let mut log = Self {
            dir: dir.into(),
            writer: None,
        };
        log.reopen()?;
        Ok(log)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(LOG_FILE)
    }

    fn reopen(&mut self) -> CacheResult<()> {
        let path = self.path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| CacheError::Log {
                path: path.clone(),
                source,
            })?;
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    /// Rebuild store state from the log in `dir`. A missing log replays as empty.
    pub fn replay(dir: &Path, store: StoreId) -> CacheResult<Replay> {
        let path = dir.join(LOG_FILE);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "No transaction log yet");
                return Ok(Replay::default());
            }
            Err(source) => return Err(CacheError::Log { path, source }),
        };

        let mut replay = Replay::default();
        for line in BufReader::new(file).split(b'\n') {
            let line = line.map_err(|source| CacheError::Log {
                path: path.clone(),
                source,
            })?;
            let Ok(line) = std::str::from_utf8(&line) else {
                replay.skipped += 1;
                continue;
            };
            let line = line.trim_end_matches('\r');
            if line.is_empty() {
                continue;
            }
            match LogRecord::decode(line, store) {
                Some(record) => {
                    if !replay.apply(record) {
                        break;
                    }
                }
                None => {
                    debug!(line = %line, "Skipping malformed log line");
                    replay.skipped += 1;
                }
            }
        }

        debug!(
            path = ?path,
            entries = replay.entries.len(),
            size = replay.size,
            skipped = replay.skipped,
            "Replayed transaction log"
        );
        Ok(replay)
    }

    /// Append one record and flush it.
    pub fn append(&mut self, record: &LogRecord) -> CacheResult<()> {
        let path = self.path();
        let writer = self.writer.as_mut().ok_or(CacheError::Closed)?;
        writeln!(writer, "{}", record.encode())
            .and_then(|_| writer.flush())
            .map_err(|source| CacheError::Log { path, source })
    }

    /// Replace the log with a version record and one `ADD` per entry, oldest
    /// first. On failure the previous log stays in place and stays open.
    pub fn checkpoint<'a>(
        &mut self,
        entries: impl IntoIterator<Item = &'a CacheEntry>,
    ) -> CacheResult<()> {
        let temp_path = self.dir.join(CHECKPOINT_FILE);
        let log_path = self.path();

        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }

        let written = write_checkpoint(&temp_path, entries).and_then(|count| {
            fs::rename(&temp_path, &log_path)?;
            Ok(count)
        });

        let result = match written {
            Ok(count) => {
                info!(path = ?log_path, entries = count, "Checkpointed transaction log");
                Ok(())
            }
            Err(source) => {
                warn!(path = ?temp_path, error = %source, "Checkpoint failed, keeping previous log");
                let _ = fs::remove_file(&temp_path);
                Err(CacheError::Log {
                    path: temp_path,
                    source,
                })
            }
        };

        self.reopen()?;
        result
    }

    /// Flush and release the file handle.
    pub fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                warn!(path = ?self.path(), error = %e, "Failed to flush transaction log");
            }
        }
    }
}

impl Drop for TransactionLog {
    fn drop(&mut self) {
        self.close();
    }
}

fn write_checkpoint<'a>(
    path: &Path,
    entries: impl IntoIterator<Item = &'a CacheEntry>,
) -> io::Result<usize> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "{}", LogRecord::Version(LOG_VERSION.to_string()).encode())?;
    let mut count = 0;
    for entry in entries {
        writeln!(writer, "0 {}", entry.to_log_line())?;
        count += 1;
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(count)
}
