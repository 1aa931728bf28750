//! Daily-rotating access log file.
//!
//! Writers never block on a rotation: while a rotation is in progress the
//! writer redirects whole lines into an in-memory buffer, and the buffer is
//! flushed to the freshly opened file, in order, before the rotation flag
//! clears. A single write is atomic with respect to the file switch; it
//! lands entirely in the old file or entirely in the new one.
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{Days, Local, NaiveDate};
use eyre::{Context, Result};
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct RotatingLogWriter {
    inner: Arc<Inner>,
}

struct Inner {
    path: PathBuf,
    state: Mutex<WriterState>,
}

struct WriterState {
    /// Taken out while a rotation renames and reopens; `None` also after close.
    file: Option<File>,
    buffer: Vec<u8>,
    rotating: bool,
}

impl RotatingLogWriter {
    /// Open (or create) the log file at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = open_append(&path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                path,
                state: Mutex::new(WriterState {
                    file: Some(file),
                    buffer: Vec::new(),
                    rotating: false,
                }),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Append one record, with a trailing newline. Never splits the record
    /// across a rotation.
    pub fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if state.rotating || state.file.is_none() {
            state.buffer.extend_from_slice(line.as_bytes());
            state.buffer.push(b'\n');
            return Ok(());
        }
        // file checked above
        let file = state.file.as_mut().ok_or(std::io::ErrorKind::NotFound)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")
    }

    /// Rotate now, dating the closed file with yesterday's local date.
    pub fn rotate(&self) -> Result<()> {
        let yesterday = Local::now()
            .date_naive()
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| eyre::eyre!("date arithmetic underflow"))?;
        self.rotate_on(yesterday)
    }

    /// Rotate with an explicit backup date (`<path>.<YYYY-MM-DD>`).
    pub fn rotate_on(&self, backup_date: NaiveDate) -> Result<()> {
        // Redirect writers into the buffer, then do the filesystem work
        // without holding the lock so no writer ever stalls on a rename.
        let old_file = {
            let mut state = self
                .inner
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            state.rotating = true;
            state.file.take()
        };
        drop(old_file);

        let backup_path = PathBuf::from(format!(
            "{}.{}",
            self.inner.path.display(),
            backup_date.format("%Y-%m-%d")
        ));
        std::fs::rename(&self.inner.path, &backup_path).with_context(|| {
            format!(
                "could not rename {} to {}",
                self.inner.path.display(),
                backup_path.display()
            )
        })?;
        let mut new_file = open_append(&self.inner.path)?;

        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        new_file
            .write_all(&state.buffer)
            .with_context(|| format!("could not flush buffered records to {}", self.inner.path.display()))?;
        state.buffer.clear();
        state.file = Some(new_file);
        state.rotating = false;
        Ok(())
    }

    /// Background task: sleeps until the next local-day boundary, rotates,
    /// repeats. Returns on cancellation after closing the file; a failed
    /// rotation is an error that tears down the whole run.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        loop {
            let until_midnight = duration_until_next_midnight()?;
            tokio::select! {
                _ = tokio::time::sleep(until_midnight) => {
                    self.rotate()
                        .with_context(|| format!("could not rotate {}", self.inner.path.display()))?;
                    tracing::info!(path = %self.inner.path.display(), "rotated access log");
                }
                _ = token.cancelled() => {
                    self.close();
                    return Ok(());
                }
            }
        }
    }

    fn close(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        state.file.take();
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("could not open log file {}", path.display()))
}

fn duration_until_next_midnight() -> Result<std::time::Duration> {
    let now = Local::now();
    let midnight = now
        .date_naive()
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| eyre::eyre!("date arithmetic overflow"))?
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| eyre::eyre!("no representable local midnight"))?;
    Ok((midnight - now).to_std().unwrap_or_default())
}
