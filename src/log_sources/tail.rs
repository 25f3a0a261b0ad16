//! Lazy line reader over a log file.
//!
//! In batch mode the reader stops at end of file. In follow mode it keeps
//! polling for appended data the way `tail -F` does, until the shutdown
//! flag is raised. Only complete lines are yielded while following, so a
//! line still being written is never split in two.
//!
//! Rotation: at end of file the path is checked again. If it now names a
//! different file (renamed away and recreated) or the file became smaller
//! than our read offset (truncated in place), reading restarts from the
//! beginning of whatever the path names now.
//!
//! Invalid UTF-8 is replaced, never an error: auth logs occasionally carry
//! attacker-supplied bytes in user names.

use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::WatchResult;

/// Settings for follow mode.
#[derive(Debug, Clone)]
pub struct FollowOptions {
    /// Sleep between polls once the end of file is reached.
    pub poll_interval: Duration,

    /// Raised by the signal handler; the reader ends its iteration when set.
    pub shutdown: Arc<AtomicBool>,
}

/// Iterator over the lines of one file. See the module docs.
pub struct TailLines {
    path: PathBuf,
    reader: BufReader<File>,

    /// Byte offset just past the last complete line handed out.
    offset: u64,

    /// Bytes of a line whose newline has not been written yet.
    pending: Vec<u8>,

    follow: Option<FollowOptions>,
}

impl TailLines {
    /// Open `path` for reading from the start. A missing or unreadable file
    /// is an error; nothing is read yet.
    pub fn open(path: &Path, follow: Option<FollowOptions>) -> WatchResult<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            offset: 0,
            pending: Vec::new(),
            follow,
        })
    }

    /// Skip everything currently in the file so only lines written from now
    /// on are returned.
    pub fn seek_to_end(&mut self) -> WatchResult<()> {
        let end = self.reader.seek(SeekFrom::End(0))?;
        self.offset = end;
        self.pending.clear();
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn shutdown_requested(&self) -> bool {
        self.follow
            .as_ref()
            .is_some_and(|f| f.shutdown.load(Ordering::SeqCst))
    }

    /// Reopen from offset 0 if the path now names a different file (rename
    /// rotation, logrotate `create`) or the file shrank below what we have
    /// read (truncation, `copytruncate`).
    fn check_rotation(&mut self) {
        let on_disk = match std::fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) => {
                // Rotated away and not recreated yet; keep the old handle.
                log::debug!("Cannot stat log file {}: {}", self.path.display(), e);
                return;
            }
        };

        let replaced = match self.reader.get_ref().metadata() {
            Ok(open) => !same_file(&open, &on_disk),
            Err(e) => {
                log::warn!("Cannot stat open log file {}: {}", self.path.display(), e);
                false
            }
        };
        let truncated = on_disk.len() < self.offset;
        if !replaced && !truncated {
            return;
        }

        if replaced {
            log::info!("File rotation detected for {} (replaced), reopening", self.path.display());
        } else {
            log::info!(
                "File rotation detected for {} (size {} < offset {}), resetting",
                self.path.display(),
                on_disk.len(),
                self.offset,
            );
        }
        match File::open(&self.path) {
            Ok(file) => {
                self.reader = BufReader::new(file);
                self.offset = 0;
                self.pending.clear();
            }
            Err(e) => {
                log::warn!("Cannot reopen log file {}: {}", self.path.display(), e);
            }
        }
    }

    fn into_line(mut bytes: Vec<u8>) -> String {
        while matches!(bytes.last(), Some(b'\n' | b'\r')) {
            bytes.pop();
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    match (a.created(), b.created()) {
        (Ok(x), Ok(y)) => x == y,
        _ => true,
    }
}

impl Iterator for TailLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let mut chunk = Vec::new();
            match self.reader.read_until(b'\n', &mut chunk) {
                Ok(0) => {
                    let Some(poll_interval) = self.follow.as_ref().map(|f| f.poll_interval) else {
                        // Batch mode: a final unterminated line still counts.
                        if self.pending.is_empty() {
                            return None;
                        }
                        let rest = std::mem::take(&mut self.pending);
                        self.offset += rest.len() as u64;
                        return Some(Self::into_line(rest));
                    };

                    if self.shutdown_requested() {
                        return None;
                    }
                    self.check_rotation();
                    std::thread::sleep(poll_interval);
                }
                Ok(_) => {
                    let complete = chunk.last() == Some(&b'\n');
                    self.pending.extend_from_slice(&chunk);
                    if complete {
                        let line = std::mem::take(&mut self.pending);
                        self.offset += line.len() as u64;
                        return Some(Self::into_line(line));
                    }
                }
                Err(e) => {
                    log::warn!("Read error in {}: {}", self.path.display(), e);
                    return None;
                }
            }
        }
    }
}
