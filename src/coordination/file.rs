//! File-backed coordination service.
//!
//! Executors in separate processes share one lease table by pointing at the same
//! directory. The table lives in `<dir>/coordination.json`; every operation takes an
//! exclusive `flock` on `<dir>/coordination.lock`, reads the table, changes it and
//! writes it back through a temp file and rename.
//!
//! Lease expiry is judged against each caller's clock, so hosts sharing the directory
//! need synchronised clocks. Waiters in other processes are not woken on release; they
//! find out on their next poll.

use super::service::CoordinationService;
use super::types::LeaseRecord;
use crate::clock::Clock;
use crate::error::{ExecutorError, Result};

use nix::fcntl::{FlockArg, flock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const STATE_FILE: &str = "coordination.json";
const LOCK_FILE: &str = "coordination.lock";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CoordinationState {
    #[serde(default)]
    leases: HashMap<String, LeaseRecord>,
    /// Name -> permits in use.
    #[serde(default)]
    permits: HashMap<String, usize>,
}

pub struct FileCoordinator {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    changes: Arc<Notify>,
}

impl FileCoordinator {
    pub fn open(root: impl AsRef<Path>, clock: Arc<dyn Clock>) -> Result<Arc<Self>> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            ExecutorError::Internal(format!("coordination directory {}: {}", root.display(), e))
        })?;
        tracing::info!("Coordinating through {}", root.display());
        Ok(Arc::new(Self {
            root,
            clock,
            changes: Arc::new(Notify::new()),
        }))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs `change` against the table under the directory lock. The table is written
    /// back only when `change` reports it dirty.
    fn update<T>(&self, change: impl FnOnce(&mut CoordinationState) -> (T, bool)) -> io::Result<T> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        flock(lock.as_raw_fd(), FlockArg::LockExclusive).map_err(io::Error::from)?;

        let mut state = self.read_state()?;
        let (value, dirty) = change(&mut state);
        if dirty {
            self.write_state(&state)?;
        }
        // Closing `lock` releases the flock.
        Ok(value)
    }

    fn read<T>(&self, view: impl FnOnce(&CoordinationState) -> T) -> io::Result<T> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.root.join(LOCK_FILE))?;
        flock(lock.as_raw_fd(), FlockArg::LockShared).map_err(io::Error::from)?;
        Ok(view(&self.read_state()?))
    }

    fn read_state(&self) -> io::Result<CoordinationState> {
        match fs::read(self.root.join(STATE_FILE)) {
            Ok(bytes) if bytes.is_empty() => Ok(CoordinationState::default()),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| io::Error::new(ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CoordinationState::default()),
            Err(e) => Err(e),
        }
    }

    fn write_state(&self, state: &CoordinationState) -> io::Result<()> {
        let bytes =
            serde_json::to_vec(state).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
        let path = self.root.join(STATE_FILE);
        let tmp = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, &path)
    }

    fn failed(&self, operation: &str, name: &str, e: io::Error) {
        tracing::warn!(
            "Coordination {} on {} failed in {}: {}",
            operation,
            name,
            self.root.display(),
            e
        );
    }
}

impl CoordinationService for FileCoordinator {
    fn try_acquire(&self, name: &str, holder: &str, lease: Duration) -> bool {
        let now = self.clock.now_ms();
        let expires_at = now + lease.as_millis() as u64;

        let result = self.update(|state| {
            if let Some(record) = state.leases.get_mut(name) {
                if record.holder == holder {
                    record.expires_at = expires_at;
                    return (true, true);
                }
                if !record.is_expired(now) {
                    return (false, false);
                }
                tracing::warn!(
                    "Lease on {} held by {} expired at {}, reassigning to {}",
                    name,
                    record.holder,
                    record.expires_at,
                    holder
                );
            }
            state.leases.insert(
                name.to_string(),
                LeaseRecord {
                    holder: holder.to_string(),
                    acquired_at: now,
                    expires_at,
                },
            );
            (true, true)
        });

        result.unwrap_or_else(|e| {
            self.failed("acquire", name, e);
            false
        })
    }

    fn renew(&self, name: &str, holder: &str, lease: Duration) -> bool {
        let now = self.clock.now_ms();
        let result = self.update(|state| match state.leases.get_mut(name) {
            Some(record) if record.holder == holder && !record.is_expired(now) => {
                record.expires_at = now + lease.as_millis() as u64;
                (true, true)
            }
            _ => (false, false),
        });

        result.unwrap_or_else(|e| {
            self.failed("renew", name, e);
            false
        })
    }

    fn release(&self, name: &str, holder: &str) -> bool {
        let result = self.update(|state| {
            let owned = state
                .leases
                .get(name)
                .map(|record| record.holder == holder)
                .unwrap_or(false);
            if owned {
                state.leases.remove(name);
            }
            (owned, owned)
        });

        match result {
            Ok(released) => {
                if released {
                    self.changes.notify_waiters();
                }
                released
            }
            Err(e) => {
                self.failed("release", name, e);
                false
            }
        }
    }

    fn lease(&self, name: &str) -> Option<LeaseRecord> {
        let now = self.clock.now_ms();
        self.read(|state| {
            state
                .leases
                .get(name)
                .filter(|record| !record.is_expired(now))
                .cloned()
        })
        .unwrap_or_else(|e| {
            self.failed("lease lookup", name, e);
            None
        })
    }

    fn try_acquire_permits(&self, name: &str, capacity: usize, permits: usize) -> bool {
        let result = self.update(|state| {
            let in_use = state.permits.entry(name.to_string()).or_insert(0);
            if *in_use + permits > capacity {
                return (false, false);
            }
            *in_use += permits;
            (true, true)
        });

        result.unwrap_or_else(|e| {
            self.failed("permit acquire", name, e);
            false
        })
    }

    fn release_permits(&self, name: &str, permits: usize) {
        let result = self.update(|state| {
            let Some(in_use) = state.permits.get_mut(name) else {
                return ((), false);
            };
            *in_use = in_use.saturating_sub(permits);
            if *in_use == 0 {
                state.permits.remove(name);
            }
            ((), true)
        });

        if let Err(e) = result {
            self.failed("permit release", name, e);
        }
        self.changes.notify_waiters();
    }

    fn drain_permits(&self, name: &str, capacity: usize) -> usize {
        let result = self.update(|state| {
            let in_use = state.permits.entry(name.to_string()).or_insert(0);
            let drained = capacity.saturating_sub(*in_use);
            *in_use += drained;
            (drained, drained > 0)
        });

        result.unwrap_or_else(|e| {
            self.failed("permit drain", name, e);
            0
        })
    }

    fn available_permits(&self, name: &str, capacity: usize) -> usize {
        let result = self.read(|state| {
            let in_use = state.permits.get(name).copied().unwrap_or(0);
            capacity.saturating_sub(in_use)
        });

        result.unwrap_or_else(|e| {
            self.failed("permit lookup", name, e);
            0
        })
    }

    fn changes(&self) -> Arc<Notify> {
        self.changes.clone()
    }
}
