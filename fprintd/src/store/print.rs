//! The `Print` value: a serialised fingerprint template plus its metadata.

use serde::{Deserialize, Serialize};

use crate::finger::Finger;

/// Stable identity of the device a print was enrolled on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub driver: String,
    pub device_id: String,
}

impl DeviceIdentity {
    pub fn new(driver: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            driver: driver.into(),
            device_id: device_id.into(),
        }
    }
}

/// A persisted fingerprint template bound to owner, finger, device and
/// enrolment date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Print {
    pub username: String,
    pub finger: Finger,
    pub device: DeviceIdentity,
    pub enrolled_on: chrono::NaiveDate,
    /// Opaque serialised template handed to/from the capability layer.
    /// The store never looks inside it.
    pub template: Vec<u8>,
}

impl Print {
    pub fn new(
        username: impl Into<String>,
        finger: Finger,
        device: DeviceIdentity,
        enrolled_on: chrono::NaiveDate,
        template: Vec<u8>,
    ) -> Self {
        Self {
            username: username.into(),
            finger,
            device,
            enrolled_on,
            template,
        }
    }

    /// Whether this print's own metadata is internally consistent with the
    /// location (user/device/finger) it was loaded from.
    pub fn matches_location(&self, device: &DeviceIdentity, finger: Finger, username: &str) -> bool {
        self.device == *device && self.finger == finger && self.username == username
    }
}
