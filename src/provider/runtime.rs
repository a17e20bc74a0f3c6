//! Per-client runtime state: Idle → Busy → (Cancelling) → Idle.
//!
//! A one-permit semaphore is the admission slot. `try_begin` refuses
//! when it is taken; `begin` queues behind the holder without
//! spinning. The [`InFlight`] handle owns the permit and the request's
//! cancellation token, and returns the client to `Idle` on drop.

use std::sync::Mutex;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio_util::sync::CancellationToken;

use super::ProviderKind;
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderRuntimeState {
    Idle,
    Busy,
    Cancelling,
}

#[derive(Debug)]
struct Slot {
    state: ProviderRuntimeState,
    token: Option<CancellationToken>,
}

#[derive(Debug)]
pub struct RuntimeGuard {
    permit: Semaphore,
    slot: Mutex<Slot>,
}

impl Default for RuntimeGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeGuard {
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            slot: Mutex::new(Slot {
                state: ProviderRuntimeState::Idle,
                token: None,
            }),
        }
    }

    pub fn state(&self) -> ProviderRuntimeState {
        self.lock().state
    }

    /// Take the slot or fail with `ConcurrentUseConflict`.
    pub fn try_begin(&self, kind: ProviderKind) -> Result<InFlight<'_>, PipelineError> {
        let permit = self.permit.try_acquire().map_err(|_| {
            PipelineError::ConcurrentUseConflict(format!("{kind} is still processing a request"))
        })?;
        Ok(self.enter(permit))
    }

    /// Wait for the slot.
    pub async fn begin(&self) -> Result<InFlight<'_>, PipelineError> {
        let permit = self
            .permit
            .acquire()
            .await
            .map_err(|_| PipelineError::ConcurrentUseConflict("provider shut down".into()))?;
        Ok(self.enter(permit))
    }

    /// Resolve once no request holds the slot.
    pub async fn idle(&self) {
        let _ = self.permit.acquire().await;
    }

    /// Cancel the in-flight request. Returns `true` if one was running
    /// and had not already been cancelled.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        if slot.state != ProviderRuntimeState::Busy {
            return false;
        }
        if let Some(token) = &slot.token {
            token.cancel();
        }
        slot.state = ProviderRuntimeState::Cancelling;
        true
    }

    fn enter<'a>(&'a self, permit: SemaphorePermit<'a>) -> InFlight<'a> {
        let token = CancellationToken::new();
        let mut slot = self.lock();
        debug_assert_eq!(slot.state, ProviderRuntimeState::Idle);
        slot.state = ProviderRuntimeState::Busy;
        slot.token = Some(token.clone());
        InFlight {
            guard: self,
            token,
            _permit: permit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        // State is plain data; a poisoned lock still holds a valid value.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An admitted request. Dropping it cancels its token, so abandoned
/// work stops, and returns the client to `Idle`.
pub struct InFlight<'a> {
    guard: &'a RuntimeGuard,
    token: CancellationToken,
    _permit: SemaphorePermit<'a>,
}

impl InFlight<'_> {
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        let mut slot = self.guard.lock();
        slot.state = ProviderRuntimeState::Idle;
        slot.token = None;
    }
}
