//! Durable storage for the queue.
//!
//! The whole [`QueueState`] lives in a single JSON file, and that file is the
//! only source of truth. Several handles, in one process or in several
//! `queuectl` processes, may point at the same file. Every operation takes an
//! advisory lock on a sidecar `<file>.lock` and re-reads the file under it:
//!
//! - [`JobStore::with_lock`] holds the lock exclusively while it reads the
//!   state, runs the closure on it, writes the result to a temporary file in
//!   the store directory and renames it over the real file. A failed closure
//!   or a failed write leaves the file as it was.
//! - [`JobStore::read`] holds the lock shared, so a status or list query
//!   never observes half of a transition.
//!
//! The lock lives on a separate file because the rename replaces the data
//! file's inode on every commit. Writers that ignore the lock are not
//! defended against.
//!
//! File locks are blocking calls. They are only ever held across synchronous
//! work, and handles in the same process first queue on an async mutex so at
//! most one runtime thread per handle waits on the file lock.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::error::{QueueError, Result};
use crate::scheduler::QueueState;

#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    lock_path: PathBuf,
    in_process: Mutex<()>,
}

/// Held for the duration of one store operation; dropping it closes the
/// file, which releases the lock.
struct FileLock {
    _file: File,
}

impl FileLock {
    fn exclusive(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }

    fn shared(path: &Path) -> Result<Self> {
        let file = open_lock_file(path)?;
        file.lock_shared()?;
        Ok(Self { _file: file })
    }
}

impl JobStore {
    /// Open the store at `path`. A missing file is created with an empty
    /// queue and default configuration; an unparsable one is an error.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        fs::create_dir_all(store_dir(&path))?;

        let store = Self {
            lock_path: lock_path_for(&path),
            path,
            in_process: Mutex::new(()),
        };

        let _lock = FileLock::exclusive(&store.lock_path)?;
        match read_state(&store.path)? {
            Some(state) => tracing::debug!(
                path = %store.path.display(),
                jobs = state.jobs.len(),
                dlq = state.dlq.len(),
                "Job store loaded"
            ),
            None => {
                persist(&store.path, &QueueState::default())?;
                tracing::info!(path = %store.path.display(), "Initialized new job store");
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` as one atomic read-modify-write unit against the current file
    /// contents.
    ///
    /// The new state is durably written before the lock is released and
    /// before `f`'s result is returned. If `f` leaves the state unchanged no
    /// write happens.
    pub async fn with_lock<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut QueueState) -> Result<R>,
    {
        let _guard = self.in_process.lock().await;
        let _lock = FileLock::exclusive(&self.lock_path)?;

        let current = read_state(&self.path)?.unwrap_or_default();
        let mut next = current.clone();
        let out = f(&mut next)?;

        if next != current {
            persist(&self.path, &next)?;
        }
        Ok(out)
    }

    /// Consistent read-only view of the current file contents.
    pub async fn read<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&QueueState) -> R,
    {
        let _guard = self.in_process.lock().await;
        let _lock = FileLock::shared(&self.lock_path)?;

        let state = read_state(&self.path)?.unwrap_or_default();
        Ok(f(&state))
    }
}

fn store_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| OsString::from("queue"));
    name.push(".lock");
    store_dir(path).join(name)
}

fn open_lock_file(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// `Ok(None)` when the file does not exist.
fn read_state(path: &Path) -> Result<Option<QueueState>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|source| QueueError::CorruptState {
            path: path.to_path_buf(),
            source,
        })
}

fn persist(path: &Path, state: &QueueState) -> Result<()> {
    let dir = store_dir(path);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, state)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| QueueError::Io(e.error))?;
    Ok(())
}
