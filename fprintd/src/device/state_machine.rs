//! Operation State Machine: governs which operation may start from which
//! resting state, owns the cancellation token for whatever is in-flight,
//! and classifies driver errors as retry-class (operation keeps running)
//! or terminal (operation ends).

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::capability::{CapabilityError, RetryReason};
use crate::error::FprintError;

/// How long `stop` waits for a cancelled operation to actually finish
/// before returning anyway.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Device never opened, or fully closed again.
    None,
    /// Open and idle — the only state a new operation may start from.
    Open,
    Enroll,
    Verify,
    Identify,
    Delete,
}

impl OperationState {
    fn label(self) -> &'static str {
        match self {
            OperationState::None => "none",
            OperationState::Open => "open",
            OperationState::Enroll => "enroll",
            OperationState::Verify => "verify",
            OperationState::Identify => "identify",
            OperationState::Delete => "delete",
        }
    }
}

/// Classifies a driver error for the running operation (GLOSSARY
/// "Retry-class error" vs "Terminal error").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Reported to the client (e.g. an `EnrollStatus` retry signal); the
    /// operation keeps running.
    Retry(RetryReason),
    /// The operation ends and the state machine falls back to `Open`.
    Terminal,
}

pub fn classify(err: &CapabilityError) -> ErrorClass {
    match err {
        CapabilityError::Retry(reason) => ErrorClass::Retry(*reason),
        _ => ErrorClass::Terminal,
    }
}

/// Owns the single device-wide operation state plus the cancellation
/// token for whatever is currently running. One instance per device.
pub struct StateMachine {
    state: Mutex<OperationState>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(OperationState::None),
            cancel: Mutex::new(None),
        }
    }

    pub fn current(&self) -> OperationState {
        *self.state.lock().unwrap()
    }

    /// Open the device: only valid from `None`.
    pub fn open(&self) -> Result<(), FprintError> {
        let mut state = self.state.lock().unwrap();
        if *state != OperationState::None {
            return Err(FprintError::Internal(format!(
                "open from state {}",
                state.label()
            )));
        }
        *state = OperationState::Open;
        Ok(())
    }

    /// Close the device: only valid from `Open` (an operation must be
    /// stopped first).
    pub fn close(&self) -> Result<(), FprintError> {
        let mut state = self.state.lock().unwrap();
        if *state != OperationState::Open {
            return Err(FprintError::Internal(format!(
                "close from state {}",
                state.label()
            )));
        }
        *state = OperationState::None;
        Ok(())
    }

    /// Begin `target` (Enroll/Verify/Identify/Delete); only valid from
    /// `Open`. Returns the cancellation token the operation must observe
    /// and clears on every cooperative checkpoint.
    pub fn begin(&self, target: OperationState) -> Result<CancellationToken, FprintError> {
        debug_assert!(!matches!(target, OperationState::None | OperationState::Open));
        let mut state = self.state.lock().unwrap();
        if *state != OperationState::Open {
            return Err(FprintError::NoActionInProgress);
        }
        *state = target;
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap() = Some(token.clone());
        Ok(token)
    }

    /// The operation ended on its own (success, terminal driver error, or
    /// observed cancellation) — falls back to `Open` unconditionally.
    pub fn end(&self) {
        *self.state.lock().unwrap() = OperationState::Open;
        *self.cancel.lock().unwrap() = None;
    }

    /// Signal cancellation to whatever is running and wait up to
    /// `STOP_GRACE_PERIOD` for it to call `end()`. Returns whether it
    /// finished within the grace period — callers proceed either way,
    /// since a client-visible `Stop` call must not hang indefinitely.
    pub async fn request_stop(&self) -> bool {
        let token = self.cancel.lock().unwrap().clone();
        let Some(token) = token else { return true };
        token.cancel();

        let wait = async {
            while self.current() != OperationState::Open && self.current() != OperationState::None {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        };
        timeout(STOP_GRACE_PERIOD, wait).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_round_trips() {
        let sm = StateMachine::new();
        sm.open().unwrap();
        assert_eq!(sm.current(), OperationState::Open);
        sm.close().unwrap();
        assert_eq!(sm.current(), OperationState::None);
    }

    #[test]
    fn close_without_open_is_rejected() {
        let sm = StateMachine::new();
        assert!(sm.close().is_err());
    }

    #[test]
    fn begin_requires_open_state() {
        let sm = StateMachine::new();
        assert!(sm.begin(OperationState::Enroll).is_err());
        sm.open().unwrap();
        assert!(sm.begin(OperationState::Enroll).is_ok());
        assert_eq!(sm.current(), OperationState::Enroll);
    }

    #[test]
    fn begin_rejects_when_already_running() {
        let sm = StateMachine::new();
        sm.open().unwrap();
        sm.begin(OperationState::Verify).unwrap();
        assert!(sm.begin(OperationState::Enroll).is_err());
    }

    #[test]
    fn end_returns_to_open() {
        let sm = StateMachine::new();
        sm.open().unwrap();
        sm.begin(OperationState::Identify).unwrap();
        sm.end();
        assert_eq!(sm.current(), OperationState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn request_stop_resolves_once_end_is_called() {
        let sm = std::sync::Arc::new(StateMachine::new());
        sm.open().unwrap();
        let token = sm.begin(OperationState::Verify).unwrap();

        let sm2 = sm.clone();
        tokio::spawn(async move {
            token.cancelled().await;
            sm2.end();
        });

        let finished = sm.request_stop().await;
        assert!(finished);
        assert_eq!(sm.current(), OperationState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn request_stop_times_out_if_operation_never_ends() {
        let sm = StateMachine::new();
        sm.open().unwrap();
        sm.begin(OperationState::Enroll).unwrap();
        let finished = sm.request_stop().await;
        assert!(!finished);
    }

    #[test]
    fn retry_errors_classify_as_retry() {
        assert_eq!(
            classify(&CapabilityError::Retry(RetryReason::SwipeTooShort)),
            ErrorClass::Retry(RetryReason::SwipeTooShort)
        );
    }

    #[test]
    fn other_errors_classify_as_terminal() {
        assert_eq!(classify(&CapabilityError::NotOpen), ErrorClass::Terminal);
        assert_eq!(classify(&CapabilityError::DataFull), ErrorClass::Terminal);
    }
}
