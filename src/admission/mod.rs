// src/admission/mod.rs

//! Named mutexes and counting semaphores shared across tasks.
//!
//! Guards are owned values: dropping one releases its slot, so every exit
//! path (success, error, cancellation, panic) gives the slot back.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::dag::Task;
use crate::errors::{KitError, Result};

/// Exclusive hold on a named mutex.
#[derive(Debug)]
pub struct MutexGuard {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl MutexGuard {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// One slot of a named semaphore.
#[derive(Debug)]
pub struct SemaphorePermit {
    name: String,
    _permit: OwnedSemaphorePermit,
}

impl SemaphorePermit {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Everything a task holds while it is admitted.
#[derive(Debug, Default)]
pub struct AdmissionGuard {
    mutex: Option<MutexGuard>,
    semaphore: Option<SemaphorePermit>,
}

impl AdmissionGuard {
    pub fn mutex(&self) -> Option<&str> {
        self.mutex.as_ref().map(MutexGuard::name)
    }

    pub fn semaphore(&self) -> Option<&str> {
        self.semaphore.as_ref().map(SemaphorePermit::name)
    }
}

/// Registry of mutexes (created on first use) and semaphores (declared up
/// front with a capacity).
#[derive(Debug, Default)]
pub struct AdmissionControl {
    mutexes: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    semaphores: HashMap<String, Arc<Semaphore>>,
}

impl AdmissionControl {
    pub fn new(semaphores: &BTreeMap<String, usize>) -> Self {
        let semaphores = semaphores
            .iter()
            .map(|(name, &capacity)| (name.clone(), Arc::new(Semaphore::new(capacity))))
            .collect();
        Self {
            mutexes: StdMutex::new(HashMap::new()),
            semaphores,
        }
    }

    fn mutex_for(&self, name: &str) -> Arc<Mutex<()>> {
        let mut map = self.mutexes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            map.entry(name.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    /// Wait (FIFO) for exclusive ownership of `name`.
    pub async fn acquire_mutex(&self, name: &str) -> MutexGuard {
        let guard = self.mutex_for(name).lock_owned().await;
        MutexGuard {
            name: name.to_string(),
            _guard: guard,
        }
    }

    /// Wait (FIFO) for one slot of the semaphore `name`.
    pub async fn acquire_semaphore(&self, name: &str) -> Result<SemaphorePermit> {
        let semaphore = self
            .semaphores
            .get(name)
            .ok_or_else(|| KitError::Admission(format!("semaphore '{name}' is not declared")))?;

        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|err| KitError::Admission(format!("semaphore '{name}': {err}")))?;

        Ok(SemaphorePermit {
            name: name.to_string(),
            _permit: permit,
        })
    }

    /// Acquire the task's mutex and then its semaphore slot.
    ///
    /// Returns [`KitError::Cancelled`] if `cancel` fires first; anything
    /// acquired so far is dropped before returning.
    pub async fn admit(&self, task: &Task, cancel: &CancellationToken) -> Result<AdmissionGuard> {
        let mut guard = AdmissionGuard::default();

        if let Some(name) = task.mutex() {
            debug!(task = %task.name(), mutex = %name, "waiting for mutex");
            guard.mutex = Some(tokio::select! {
                _ = cancel.cancelled() => return Err(KitError::Cancelled),
                g = self.acquire_mutex(name) => g,
            });
        }

        if let Some(name) = task.semaphore() {
            debug!(task = %task.name(), semaphore = %name, "waiting for semaphore slot");
            guard.semaphore = Some(tokio::select! {
                _ = cancel.cancelled() => return Err(KitError::Cancelled),
                p = self.acquire_semaphore(name) => p?,
            });
        }

        Ok(guard)
    }

    /// Give back everything held by `guard`.
    pub fn release(&self, guard: AdmissionGuard) {
        drop(guard);
    }

    /// Free slots of a semaphore, or `None` if undeclared.
    pub fn available_permits(&self, name: &str) -> Option<usize> {
        self.semaphores.get(name).map(|s| s.available_permits())
    }
}
