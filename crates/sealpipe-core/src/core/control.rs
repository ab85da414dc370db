use std::sync::{Mutex, MutexGuard};

use crate::cancel::CancellationToken;
use crate::telemetry::tags;
use crate::{Result, SealError};

/// Shared fault slot and cancellation token for one pipeline run.
///
/// The first non-cancellation error wins; every later error is logged and
/// dropped. Recording a fault cancels the run so blocked threads wake up.
#[derive(Debug)]
pub struct RunControl {
    token: CancellationToken,
    fault: Mutex<Option<SealError>>,
}

impl RunControl {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            fault: Mutex::new(None),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Records `error` as the run fault unless one is already set, then cancels.
    pub fn fail(&self, error: SealError) {
        if !error.is_cancelled() {
            let mut fault = self.lock_fault();
            if fault.is_none() {
                tracing::warn!(target: tags::LOG_PIPELINE, %error, "pipeline run faulted");
                *fault = Some(error);
            } else {
                tracing::debug!(target: tags::LOG_PIPELINE, %error, "suppressed secondary fault");
            }
        }
        self.token.cancel();
    }

    pub fn has_fault(&self) -> bool {
        self.lock_fault().is_some()
    }

    /// Outcome of the run: the recorded fault, else `Cancelled` if the token fired.
    pub fn into_result(self) -> Result<()> {
        let fault = match self.fault.into_inner() {
            Ok(fault) => fault,
            Err(poisoned) => poisoned.into_inner(),
        };
        match fault {
            Some(error) => Err(error),
            None if self.token.is_cancelled() => Err(SealError::Cancelled),
            None => Ok(()),
        }
    }

    fn lock_fault(&self) -> MutexGuard<'_, Option<SealError>> {
        match self.fault.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
