//! Deadlock-free locking of overlapping sets of named resources.
//!
//! # Responsibility
//! - Let independent call sites hold several named locks (typically table
//!   names) at once without circular waits.
//!
//! # Invariants
//! - A request holds either all of its names or none of them; a failed pass
//!   rolls back every lock it took before anyone else can observe it.
//! - Passes visit names in sorted order, under one manager-wide mutex.
//! - Waiters sleep on a condition variable and are woken by `release`.
//! - The name table only grows; entries are created on first use.
//! - The manager does not track callers. Any caller may release any name.

use crate::cancel::CancelFlag;
use log::{debug, warn};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, Instant};

/// Longest sleep between cancellation checks in `acquire_cancellable`.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(20);

static GLOBAL_LOCK_MANAGER: Lazy<NamedLockManager> = Lazy::new(NamedLockManager::new);

/// Process-wide lock registry shared by every adapter in the process.
pub fn global_lock_manager() -> &'static NamedLockManager {
    &GLOBAL_LOCK_MANAGER
}

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    InvalidName(String),
    NotHeld(Vec<String>),
    TimedOut(Vec<String>),
    Cancelled(Vec<String>),
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidName(value) => write!(f, "lock name is invalid: `{value}`"),
            Self::NotHeld(names) => write!(f, "locks not held: {}", names.join(",")),
            Self::TimedOut(names) => {
                write!(f, "timed out acquiring locks: {}", names.join(","))
            }
            Self::Cancelled(names) => {
                write!(f, "cancelled while acquiring locks: {}", names.join(","))
            }
        }
    }
}

impl Error for LockError {}

#[derive(Debug, Default)]
struct NamedMutex {
    held: bool,
}

impl NamedMutex {
    fn try_lock(&mut self) -> bool {
        if self.held {
            return false;
        }
        self.held = true;
        true
    }

    fn unlock(&mut self) -> bool {
        std::mem::replace(&mut self.held, false)
    }
}

/// Registry of named mutexes acquired and released as sets.
#[derive(Debug, Default)]
pub struct NamedLockManager {
    table: Mutex<BTreeMap<String, NamedMutex>>,
    released: Condvar,
}

impl NamedLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until every name in `names` is held by this call.
    ///
    /// There is no timeout: a name that is never released blocks forever.
    pub fn acquire<I, S>(&self, names: I) -> LockResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        self.acquire_set(&names, None, None)
    }

    /// Like [`Self::acquire`], giving up with `TimedOut` after `timeout`.
    pub fn acquire_timeout<I, S>(&self, names: I, timeout: Duration) -> LockResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        self.acquire_set(&names, Some(Instant::now() + timeout), None)
    }

    /// Like [`Self::acquire`], giving up with `Cancelled` once `cancel` is
    /// set. No lock from the abandoned attempt stays held.
    pub fn acquire_cancellable<I, S>(&self, names: I, cancel: &CancelFlag) -> LockResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        self.acquire_set(&names, None, Some(cancel))
    }

    /// Makes a single all-or-nothing pass; `Ok(false)` if any name is taken.
    pub fn try_acquire<I, S>(&self, names: I) -> LockResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        let mut table = self.table.lock();
        Ok(try_lock_all(&mut table, &names))
    }

    /// Acquires `names` and returns a guard that releases them on drop.
    pub fn lock<I, S>(&self, names: I) -> LockResult<LockSetGuard<'_>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        self.acquire_set(&names, None, None)?;
        Ok(LockSetGuard {
            manager: self,
            names,
        })
    }

    /// Unlocks every name in `names` and wakes all waiters.
    ///
    /// Names that were not held are reported as `NotHeld` after the held
    /// ones have been released.
    pub fn release<I, S>(&self, names: I) -> LockResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = normalize_names(names)?;
        self.release_set(&names)
    }

    /// Whether `name` is currently held by anyone.
    pub fn is_held(&self, name: &str) -> bool {
        self.table
            .lock()
            .get(name)
            .is_some_and(|mutex| mutex.held)
    }

    /// Every name ever referenced, sorted.
    pub fn known_names(&self) -> Vec<String> {
        self.table.lock().keys().cloned().collect()
    }

    fn acquire_set(
        &self,
        names: &BTreeSet<String>,
        deadline: Option<Instant>,
        cancel: Option<&CancelFlag>,
    ) -> LockResult<()> {
        let started_at = Instant::now();
        let mut waits = 0_u32;
        let mut table = self.table.lock();

        loop {
            if cancel.is_some_and(CancelFlag::is_cancelled) {
                return Err(LockError::Cancelled(names.iter().cloned().collect()));
            }
            if try_lock_all(&mut table, names) {
                debug!(
                    "event=lock_acquire module=lock status=ok names={} waits={} duration_ms={}",
                    join_names(names),
                    waits,
                    started_at.elapsed().as_millis()
                );
                return Ok(());
            }

            waits += 1;
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return Err(LockError::TimedOut(names.iter().cloned().collect()));
            }
            let cancel_check = cancel.map(|_| now + CANCEL_CHECK_INTERVAL);
            match (deadline, cancel_check) {
                (None, None) => self.released.wait(&mut table),
                (Some(deadline), None) => {
                    self.released.wait_until(&mut table, deadline);
                }
                (None, Some(check)) => {
                    self.released.wait_until(&mut table, check);
                }
                (Some(deadline), Some(check)) => {
                    self.released.wait_until(&mut table, deadline.min(check));
                }
            }
        }
    }

    fn release_set(&self, names: &BTreeSet<String>) -> LockResult<()> {
        let mut not_held = Vec::new();
        {
            let mut table = self.table.lock();
            for name in names {
                let was_held = table.get_mut(name).is_some_and(NamedMutex::unlock);
                if !was_held {
                    not_held.push(name.clone());
                }
            }
        }
        self.released.notify_all();

        if not_held.is_empty() {
            debug!(
                "event=lock_release module=lock status=ok names={}",
                join_names(names)
            );
            Ok(())
        } else {
            warn!(
                "event=lock_release module=lock status=error error_code=not_held names={}",
                not_held.join(",")
            );
            Err(LockError::NotHeld(not_held))
        }
    }
}

/// Holds a set of named locks until dropped.
#[derive(Debug)]
pub struct LockSetGuard<'m> {
    manager: &'m NamedLockManager,
    names: BTreeSet<String>,
}

impl LockSetGuard<'_> {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl Drop for LockSetGuard<'_> {
    fn drop(&mut self) {
        // Only fails if someone released our names behind our back; that is
        // already logged by `release_set`.
        let _ = self.manager.release_set(&self.names);
    }
}

/// One all-or-nothing pass in sorted name order.
fn try_lock_all(table: &mut BTreeMap<String, NamedMutex>, names: &BTreeSet<String>) -> bool {
    let mut taken: Vec<&String> = Vec::with_capacity(names.len());
    for name in names {
        let mutex = table.entry(name.clone()).or_default();
        if mutex.try_lock() {
            taken.push(name);
            continue;
        }
        for name in taken {
            if let Some(mutex) = table.get_mut(name) {
                mutex.unlock();
            }
        }
        return false;
    }
    true
}

fn normalize_names<I, S>(names: I) -> LockResult<BTreeSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| {
            let name = name.as_ref();
            if name.trim().is_empty() {
                Err(LockError::InvalidName(name.to_string()))
            } else {
                Ok(name.to_string())
            }
        })
        .collect()
}

fn join_names(names: &BTreeSet<String>) -> String {
    names.iter().map(String::as_str).collect::<Vec<_>>().join(",")
}
