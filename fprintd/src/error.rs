//! The stable error vocabulary surfaced to D-Bus clients.

use thiserror::Error;

use crate::device::capability::CapabilityError;
use crate::policy::PolicyError;
use crate::store::StoreError;

/// One of the stable error kinds surfaced to clients: the `Display` form
/// is the exact wire token used in the D-Bus error name suffix.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FprintError {
    #[error("claim-device")]
    ClaimDevice,
    #[error("already-in-use")]
    AlreadyInUse,
    #[error("internal: {0}")]
    Internal(String),
    #[error("permission-denied")]
    PermissionDenied,
    #[error("no-enrolled-prints")]
    NoEnrolledPrints,
    #[error("finger-already-enrolled")]
    FingerAlreadyEnrolled,
    #[error("no-action-in-progress")]
    NoActionInProgress,
    #[error("invalid-fingername")]
    InvalidFingername,
    #[error("no-such-device")]
    NoSuchDevice,
    #[error("prints-not-deleted")]
    PrintsNotDeleted,
    #[error("prints-not-deleted-from-device")]
    PrintsNotDeletedFromDevice,
}

impl FprintError {
    /// The D-Bus error name under `net.reactivated.Fprint.Error.*`.
    pub fn dbus_name(&self) -> &'static str {
        match self {
            FprintError::ClaimDevice => "net.reactivated.Fprint.Error.ClaimDevice",
            FprintError::AlreadyInUse => "net.reactivated.Fprint.Error.AlreadyInUse",
            FprintError::Internal(_) => "net.reactivated.Fprint.Error.Internal",
            FprintError::PermissionDenied => "net.reactivated.Fprint.Error.PermissionDenied",
            FprintError::NoEnrolledPrints => "net.reactivated.Fprint.Error.NoEnrolledPrints",
            FprintError::FingerAlreadyEnrolled => {
                "net.reactivated.Fprint.Error.FingerAlreadyEnrolled"
            }
            FprintError::NoActionInProgress => "net.reactivated.Fprint.Error.NoActionInProgress",
            FprintError::InvalidFingername => "net.reactivated.Fprint.Error.InvalidFingername",
            FprintError::NoSuchDevice => "net.reactivated.Fprint.Error.NoSuchDevice",
            FprintError::PrintsNotDeleted => "net.reactivated.Fprint.Error.PrintsNotDeleted",
            FprintError::PrintsNotDeletedFromDevice => {
                "net.reactivated.Fprint.Error.PrintsNotDeletedFromDevice"
            }
        }
    }
}

impl From<crate::finger::InvalidFingerName> for FprintError {
    fn from(_: crate::finger::InvalidFingerName) -> Self {
        FprintError::InvalidFingername
    }
}

impl From<StoreError> for FprintError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => FprintError::NoEnrolledPrints,
            StoreError::Incompatible => FprintError::NoEnrolledPrints,
            StoreError::Io(msg) => FprintError::Internal(msg),
            StoreError::Serialize(msg) => FprintError::Internal(msg),
            StoreError::Permission(msg) => FprintError::Internal(msg),
        }
    }
}

impl From<PolicyError> for FprintError {
    fn from(e: PolicyError) -> Self {
        match e {
            PolicyError::Denied => FprintError::PermissionDenied,
            PolicyError::BackendUnavailable(msg) => FprintError::Internal(msg),
        }
    }
}

/// Retry-class capability errors never reach here; anything else maps to
/// the closest terminal kind.
impl From<CapabilityError> for FprintError {
    fn from(e: CapabilityError) -> Self {
        match e {
            CapabilityError::Retry(_) => {
                FprintError::Internal("retry-class error escaped the state machine".into())
            }
            CapabilityError::Cancelled => {
                FprintError::Internal("cancellation escaped the state machine".into())
            }
            CapabilityError::NotOpen => FprintError::Internal("device not open".into()),
            CapabilityError::NotSupported => FprintError::Internal("not supported".into()),
            CapabilityError::DataFull => FprintError::Internal("device storage full".into()),
            CapabilityError::DataNotFound => FprintError::Internal("print not found on device".into()),
            CapabilityError::Other(msg) => FprintError::Internal(msg),
        }
    }
}
