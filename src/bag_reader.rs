//! Lazy line-by-line reader over one bag file.

use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::record::{Record, TopicKind};

/// A bag line that was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineWarning {
    pub path: PathBuf,
    /// 1-based line number.
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for LineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.path.display(), self.line, self.reason)
    }
}

/// Forward-only iterator of records from one bag.
///
/// Malformed lines are skipped and kept as [`LineWarning`]s. Reopen the file
/// to restart.
pub struct BagReader {
    path: PathBuf,
    topic: String,
    kind: TopicKind,
    reader: BufReader<File>,
    buf: Vec<u8>,
    line: usize,
    done: bool,
    warnings: Vec<LineWarning>,
}

impl BagReader {
    /// Opens a bag. The topic is the file stem.
    pub fn open(path: &Path, kind: TopicKind) -> io::Result<Self> {
        let file = File::open(path)?;
        let topic = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Self {
            path: path.to_path_buf(),
            topic,
            kind,
            reader: BufReader::new(file),
            buf: Vec::new(),
            line: 0,
            done: false,
            warnings: Vec::new(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// 1-based number of the last line read.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn warnings(&self) -> &[LineWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<LineWarning> {
        self.warnings
    }

    fn skip(&mut self, reason: String) {
        warn!("{}:{}: skipping line: {}", self.path.display(), self.line, reason);
        self.warnings.push(LineWarning {
            path: self.path.clone(),
            line: self.line,
            reason,
        });
    }
}

impl Iterator for BagReader {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        while !self.done {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => self.done = true,
                Ok(_) => {
                    self.line += 1;
                    let text = match std::str::from_utf8(&self.buf) {
                        Ok(text) => text.trim(),
                        Err(e) => {
                            self.skip(format!("invalid UTF-8: {e}"));
                            continue;
                        }
                    };
                    if text.is_empty() {
                        continue;
                    }

                    match Record::parse_line(text, &self.topic, self.kind) {
                        Ok(record) => {
                            debug!(
                                "{}:{}: record seq {} at {}",
                                self.path.display(),
                                self.line,
                                record.header.seq,
                                record.header.stamp
                            );
                            return Some(record);
                        }
                        Err(e) => self.skip(e.to_string()),
                    }
                }
                Err(e) => {
                    self.line += 1;
                    self.skip(format!("read error, stopping: {e}"));
                    self.done = true;
                }
            }
        }
        None
    }
}
