//! Cooperative abort and cancellation flags.
//!
//! A [`TaskAbort`] is shared by the tasks of one batch (one `add_directory`
//! or `extract_all` call, or a whole writer). The first task that fails
//! records its message; siblings see the flag at their next check point and
//! stop with [`OxiZipError::Aborted`].
//!
//! A [`CancelToken`] is handed in by the caller. Tripping it makes tasks stop
//! with [`OxiZipError::Cancelled`] and does not set the abort flag, so
//! cancellation is never reported as a failure of some other entry.

use crate::error::{OxiZipError, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared abort flag carrying the first failure.
#[derive(Debug, Clone, Default)]
pub struct TaskAbort {
    inner: Arc<AbortState>,
}

#[derive(Debug, Default)]
struct AbortState {
    requested: AtomicBool,
    cause: Mutex<Option<String>>,
}

impl TaskAbort {
    /// Create a fresh, untripped flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `err` as the cause (first caller wins) and trip the flag.
    ///
    /// Cancellation and sibling aborts are not recorded.
    pub fn abort(&self, err: &OxiZipError) {
        if matches!(err.root(), OxiZipError::Cancelled | OxiZipError::Aborted { .. }) {
            return;
        }
        let mut cause = self.inner.cause.lock();
        if cause.is_none() {
            *cause = Some(err.to_string());
        }
        self.inner.requested.store(true, Ordering::Release);
    }

    /// True once any task has failed.
    pub fn is_requested(&self) -> bool {
        self.inner.requested.load(Ordering::Acquire)
    }

    /// Message of the original failure, if any.
    pub fn cause(&self) -> Option<String> {
        self.inner.cause.lock().clone()
    }

    /// Fail with [`OxiZipError::Aborted`] if the flag is set.
    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            return Err(OxiZipError::Aborted {
                cause: self.cause().unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Caller-owned cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an untripped token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Fail with [`OxiZipError::Cancelled`] if cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(OxiZipError::Cancelled);
        }
        Ok(())
    }
}

/// Check an optional cancel token and an abort flag, cancellation first.
pub fn check_point(cancel: Option<&CancelToken>, abort: &TaskAbort) -> Result<()> {
    if let Some(token) = cancel {
        token.check()?;
    }
    abort.check()
}

/// Collects the error a failed batch reports.
///
/// The first real failure wins. A sibling's [`OxiZipError::Aborted`] or a
/// cancellation is kept only until a real failure arrives.
#[derive(Debug, Default)]
pub struct FirstError {
    slot: Mutex<Option<OxiZipError>>,
}

impl FirstError {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer `err`.
    pub fn record(&self, err: OxiZipError) {
        let secondary =
            |e: &OxiZipError| matches!(e.root(), OxiZipError::Aborted { .. } | OxiZipError::Cancelled);
        let mut slot = self.slot.lock();
        let replace = match slot.as_ref() {
            None => true,
            Some(previous) => secondary(previous) && !secondary(&err),
        };
        if replace {
            *slot = Some(err);
        }
    }

    /// `Err` with the kept failure, or `Ok` if nothing was recorded.
    pub fn into_result(self) -> Result<()> {
        match self.slot.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_keeps_first_cause() {
        let abort = TaskAbort::new();
        assert!(abort.check().is_ok());

        abort.abort(&OxiZipError::crc_mismatch(1, 2));
        abort.abort(&OxiZipError::IncorrectPassword);

        match abort.check() {
            Err(OxiZipError::Aborted { cause }) => assert!(cause.contains("CRC mismatch")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cancel_does_not_poison_abort() {
        let abort = TaskAbort::new();
        abort.abort(&OxiZipError::Cancelled);
        assert!(!abort.is_requested());
    }

    #[test]
    fn test_first_error_prefers_real_failure() {
        let errors = FirstError::new();
        errors.record(OxiZipError::Aborted {
            cause: "sibling".into(),
        });
        errors.record(OxiZipError::IncorrectPassword);
        errors.record(OxiZipError::crc_mismatch(1, 2));
        assert!(matches!(
            errors.into_result(),
            Err(OxiZipError::IncorrectPassword)
        ));
        assert!(FirstError::new().into_result().is_ok());
    }

    #[test]
    fn test_check_point_order() {
        let abort = TaskAbort::new();
        abort.abort(&OxiZipError::IncorrectPassword);
        let token = CancelToken::new();
        token.cancel();
        assert!(matches!(
            check_point(Some(&token), &abort),
            Err(OxiZipError::Cancelled)
        ));
        assert!(matches!(
            check_point(None, &abort),
            Err(OxiZipError::Aborted { .. })
        ));
    }
}
