//! `net.reactivated.Fprint.Manager`: device enumeration.

use std::sync::Arc;

use zbus::zvariant::OwnedObjectPath;

use super::{device_path, DbusError};
use crate::error::FprintError;
use crate::manager::Manager;

pub struct ManagerIface {
    manager: Arc<Manager>,
}

impl ManagerIface {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }
}

#[zbus::interface(name = "net.reactivated.Fprint.Manager")]
impl ManagerIface {
    #[zbus(name = "GetDevices")]
    async fn get_devices(&self) -> Result<Vec<OwnedObjectPath>, DbusError> {
        let _guard = self.manager.begin_request();
        let count = self.manager.devices().await.len();
        Ok((0..count).map(device_path).collect())
    }

    #[zbus(name = "GetDefaultDevice")]
    async fn get_default_device(&self) -> Result<OwnedObjectPath, DbusError> {
        let _guard = self.manager.begin_request();
        let count = self.manager.devices().await.len();
        if count == 0 {
            return Err(FprintError::NoSuchDevice.into());
        }
        Ok(device_path(count - 1))
    }
}
