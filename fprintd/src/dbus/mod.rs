//! D-Bus surface: the `net.reactivated.Fprint.Manager` and
//! `net.reactivated.Fprint.Device` interfaces, and the wire error
//! vocabulary they report failures through.

mod device_iface;
mod manager_iface;

pub use device_iface::{forward_signals, DeviceIface};
pub use manager_iface::ManagerIface;

use crate::error::FprintError;

pub const BUS_NAME: &str = "net.reactivated.Fprint";
pub const MANAGER_PATH: &str = "/net/reactivated/Fprint/Manager";

pub fn device_path(index: usize) -> zbus::zvariant::OwnedObjectPath {
    zbus::zvariant::ObjectPath::try_from(format!("/net/reactivated/Fprint/Device/{index}"))
        .expect("generated device paths are always valid")
        .into()
}

/// The stable `net.reactivated.Fprint.Error.*` vocabulary, wired to
/// zbus's custom-error derive so each `FprintError` variant reports under
/// its own D-Bus error name instead of a generic `Failed`.
#[derive(Debug, zbus::DBusError)]
#[zbus(prefix = "net.reactivated.Fprint.Error")]
pub enum DbusError {
    ClaimDevice(String),
    AlreadyInUse(String),
    Internal(String),
    PermissionDenied(String),
    NoEnrolledPrints(String),
    FingerAlreadyEnrolled(String),
    NoActionInProgress(String),
    InvalidFingername(String),
    NoSuchDevice(String),
    PrintsNotDeleted(String),
    PrintsNotDeletedFromDevice(String),
}

impl From<FprintError> for DbusError {
    fn from(e: FprintError) -> Self {
        let msg = e.to_string();
        match e {
            FprintError::ClaimDevice => DbusError::ClaimDevice(msg),
            FprintError::AlreadyInUse => DbusError::AlreadyInUse(msg),
            FprintError::Internal(_) => DbusError::Internal(msg),
            FprintError::PermissionDenied => DbusError::PermissionDenied(msg),
            FprintError::NoEnrolledPrints => DbusError::NoEnrolledPrints(msg),
            FprintError::FingerAlreadyEnrolled => DbusError::FingerAlreadyEnrolled(msg),
            FprintError::NoActionInProgress => DbusError::NoActionInProgress(msg),
            FprintError::InvalidFingername => DbusError::InvalidFingername(msg),
            FprintError::NoSuchDevice => DbusError::NoSuchDevice(msg),
            FprintError::PrintsNotDeleted => DbusError::PrintsNotDeleted(msg),
            FprintError::PrintsNotDeletedFromDevice => DbusError::PrintsNotDeletedFromDevice(msg),
        }
    }
}

/// Resolves a bus name's effective UID via the bus daemon itself — used
/// to turn "whoever is calling us" into an acting user.
pub async fn caller_uid(connection: &zbus::Connection, unique_name: &str) -> Result<u32, FprintError> {
    let proxy = zbus::fdo::DBusProxy::new(connection)
        .await
        .map_err(|e| FprintError::Internal(e.to_string()))?;
    proxy
        .get_connection_unix_user(unique_name.try_into().map_err(|_| {
            FprintError::Internal(format!("invalid bus name {unique_name:?}"))
        })?)
        .await
        .map_err(|e| FprintError::Internal(e.to_string()))
}
