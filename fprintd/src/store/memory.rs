//! In-memory `PrintStore`, used in tests and available as `type=memory`.
//!
//! Exists to demonstrate that the store is genuinely pluggable: any
//! alternative implementation satisfying the same contract can stand in.

use std::collections::HashSet;
use std::sync::Mutex;

use super::{DeviceIdentity, Print, PrintStore, StoreError};
use crate::finger::Finger;

#[derive(Default)]
pub struct MemoryStore {
    prints: Mutex<Vec<Print>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PrintStore for MemoryStore {
    fn init(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn deinit(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn save(&self, print: &Print) -> Result<(), StoreError> {
        let mut prints = self.prints.lock().unwrap();
        prints.retain(|p| {
            !(p.username == print.username && p.device == print.device && p.finger == print.finger)
        });
        prints.push(print.clone());
        Ok(())
    }

    fn load(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<Print, StoreError> {
        let prints = self.prints.lock().unwrap();
        prints
            .iter()
            .find(|p| p.matches_location(device, finger, user))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn delete(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<(), StoreError> {
        let mut prints = self.prints.lock().unwrap();
        prints.retain(|p| !p.matches_location(device, finger, user));
        Ok(())
    }

    fn discover_prints(&self, device: &DeviceIdentity, user: &str) -> Result<HashSet<Finger>, StoreError> {
        let prints = self.prints.lock().unwrap();
        Ok(prints
            .iter()
            .filter(|p| p.device == *device && p.username == user)
            .map(|p| p.finger)
            .collect())
    }

    fn discover_users(&self) -> Result<HashSet<String>, StoreError> {
        let prints = self.prints.lock().unwrap();
        Ok(prints.iter().map(|p| p.username.clone()).collect())
    }
}
