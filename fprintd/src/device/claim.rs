//! Claim Registry: at most one owner per device, watched for liveness,
//! released on disconnect.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;

use crate::error::FprintError;

/// The D-Bus operations a claim check is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationName {
    Claim,
    Release,
    VerifyStart,
    VerifyStop,
    EnrollStart,
    EnrollStop,
    ListEnrolledFingers,
    DeleteEnrolledFinger,
    /// Legacy, takes an explicit username.
    DeleteEnrolledFingers,
    DeleteEnrolledFingers2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClaimCheckKind {
    Anytime,
    AutoClaim,
    Unclaimed,
    Claimed,
}

fn claim_check_kind(op: OperationName) -> ClaimCheckKind {
    use OperationName::*;
    match op {
        Release => ClaimCheckKind::Anytime,
        Claim => ClaimCheckKind::Unclaimed,
        // Both take an explicit user and resolve it independent of any
        // claim on the device — the legacy, user-taking shape of delete
        // and the user-taking list operation behave the same way for
        // claim purposes.
        ListEnrolledFingers | DeleteEnrolledFingers => ClaimCheckKind::AutoClaim,
        VerifyStart | VerifyStop | EnrollStart | EnrollStop | DeleteEnrolledFinger
        | DeleteEnrolledFingers2 => ClaimCheckKind::Claimed,
    }
}

/// Per-claim soft state.
pub struct Session {
    pub caller_id: String,
    pub acting_user: String,
    /// Has the current verify/identify already reported a terminal
    /// status? Used to idempotize emission under cancellation races.
    pub terminal_reported: AtomicBool,
    /// Is an invocation from this same session currently being handled?
    in_flight: AtomicBool,
}

impl Session {
    fn new(caller_id: String, acting_user: String) -> Self {
        Self {
            caller_id,
            acting_user,
            terminal_reported: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }
}

/// RAII guard clearing a session's in-flight flag when an invocation
/// finishes, successfully or not.
pub struct InFlightGuard(Arc<Session>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::SeqCst);
    }
}

/// Tracks the single current owner of one device.
///
/// The owning `Session` lives behind an `ArcSwapOption`, so `session()`
/// (the hot read path, consulted on every invocation) never observes a
/// partially constructed or freed session — `arc-swap` gives us the
/// sentinel-guards-swaps-so-readers-retry scheme implemented once in the
/// library instead of by hand.
#[derive(Default)]
pub struct ClaimRegistry {
    slot: ArcSwapOption<Session>,
}

impl ClaimRegistry {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::from(None),
        }
    }

    pub fn session(&self) -> Option<Arc<Session>> {
        self.slot.load_full()
    }

    pub fn claim(&self, caller_id: impl Into<String>, user: impl Into<String>) -> Result<Arc<Session>, FprintError> {
        let new_session = Arc::new(Session::new(caller_id.into(), user.into()));
        let previous = self
            .slot
            .compare_and_swap(&None::<Arc<Session>>, Some(new_session.clone()));
        if previous.is_some() {
            return Err(FprintError::AlreadyInUse);
        }
        Ok(new_session)
    }

    pub fn release(&self) {
        self.slot.store(None);
    }

    /// Release only if still owned by `caller_id` — used by the vanish
    /// handler so a late-arriving disconnect notification can't clear a
    /// session a different caller has since claimed.
    pub fn release_if_owned_by(&self, caller_id: &str) {
        if let Some(session) = self.session() {
            if session.caller_id == caller_id {
                self.release();
            }
        }
    }

    /// Evaluate the claim check for `op` from `caller_id`. On success for
    /// a `Claimed` op, returns a guard that must be held until the
    /// invocation finishes.
    pub fn check(
        &self,
        caller_id: &str,
        op: OperationName,
    ) -> Result<Option<InFlightGuard>, FprintError> {
        match claim_check_kind(op) {
            ClaimCheckKind::Anytime | ClaimCheckKind::AutoClaim => Ok(None),
            ClaimCheckKind::Unclaimed => {
                if self.session().is_some() {
                    Err(FprintError::AlreadyInUse)
                } else {
                    Ok(None)
                }
            }
            ClaimCheckKind::Claimed => match self.session() {
                None => Err(FprintError::ClaimDevice),
                Some(session) => {
                    if session.caller_id != caller_id {
                        return Err(FprintError::AlreadyInUse);
                    }
                    if session.in_flight.swap(true, Ordering::SeqCst) {
                        return Err(FprintError::AlreadyInUse);
                    }
                    Ok(Some(InFlightGuard(session)))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_succeeds_once_then_fails() {
        let registry = ClaimRegistry::new();
        let session = registry.claim("caller-a", "alice").unwrap();
        assert_eq!(session.acting_user, "alice");

        let err = registry.claim("caller-b", "bob").unwrap_err();
        assert_eq!(err, FprintError::AlreadyInUse);
    }

    #[test]
    fn release_allows_reclaim() {
        let registry = ClaimRegistry::new();
        registry.claim("caller-a", "alice").unwrap();
        registry.release();
        assert!(registry.claim("caller-b", "bob").is_ok());
    }

    #[test]
    fn claimed_check_rejects_non_owner() {
        let registry = ClaimRegistry::new();
        registry.claim("caller-a", "alice").unwrap();

        let guard = registry.check("caller-a", OperationName::VerifyStart).unwrap();
        assert!(guard.is_some());
        drop(guard);

        let err = registry
            .check("caller-b", OperationName::VerifyStart)
            .unwrap_err();
        assert_eq!(err, FprintError::AlreadyInUse);
    }

    #[test]
    fn claimed_check_without_any_claim_fails_claim_device() {
        let registry = ClaimRegistry::new();
        let err = registry
            .check("caller-a", OperationName::VerifyStart)
            .unwrap_err();
        assert_eq!(err, FprintError::ClaimDevice);
    }

    #[test]
    fn in_flight_guard_serializes_same_session_invocations() {
        let registry = ClaimRegistry::new();
        registry.claim("caller-a", "alice").unwrap();

        let first = registry.check("caller-a", OperationName::VerifyStart).unwrap();
        let second = registry.check("caller-a", OperationName::VerifyStart).unwrap_err();
        assert_eq!(second, FprintError::AlreadyInUse);

        drop(first);
        assert!(registry.check("caller-a", OperationName::VerifyStart).is_ok());
    }

    #[test]
    fn auto_claim_passes_regardless_of_claim_state() {
        let registry = ClaimRegistry::new();
        assert!(registry
            .check("anyone", OperationName::ListEnrolledFingers)
            .unwrap()
            .is_none());

        registry.claim("caller-a", "alice").unwrap();
        assert!(registry
            .check("caller-b", OperationName::ListEnrolledFingers)
            .unwrap()
            .is_none());
    }

    #[test]
    fn release_if_owned_by_ignores_stale_caller() {
        let registry = ClaimRegistry::new();
        registry.claim("caller-a", "alice").unwrap();
        registry.release_if_owned_by("caller-b");
        assert!(registry.session().is_some());

        registry.release_if_owned_by("caller-a");
        assert!(registry.session().is_none());
    }
}
