//! Default file-backed `PrintStore`, one file per enrolled print.

use std::collections::HashSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::{DeviceIdentity, Print, PrintStore, StoreError};
use crate::finger::Finger;

const DEFAULT_ROOT: &str = "/var/lib/fprint";
const DIR_MODE: u32 = 0o700;

/// Persists one file per print at
/// `<root>/<username>/<driver>/<device-id>/<finger-hex>`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Resolve the storage root from `STATE_DIRECTORY` (first path if
    /// colon-separated), falling back to the compiled-in default.
    pub fn from_env() -> Self {
        let root = std::env::var("STATE_DIRECTORY")
            .ok()
            .and_then(|v| v.split(':').next().map(str::to_owned))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn device_dir(&self, user: &str, device: &DeviceIdentity) -> PathBuf {
        self.root.join(user).join(&device.driver).join(&device.device_id)
    }

    fn print_path(&self, user: &str, device: &DeviceIdentity, finger: Finger) -> PathBuf {
        self.device_dir(user, device)
            .join(finger.storage_hex_digit().to_string())
    }

    fn create_owner_only_dir_all(path: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(path).map_err(|e| StoreError::Io(e.to_string()))?;
        let mut p = path.to_path_buf();
        loop {
            let _ = fs::set_permissions(&p, fs::Permissions::from_mode(DIR_MODE));
            if !p.pop() {
                break;
            }
        }
        Ok(())
    }

    /// Remove now-empty parent directories up to (but not including) the
    /// store root, scoped to a single user's tree.
    fn prune_empty_parents(&self, mut dir: PathBuf, user_root: &Path) {
        while dir.starts_with(user_root) && dir != user_root.parent().unwrap_or(user_root) {
            match fs::read_dir(&dir) {
                Ok(mut entries) if entries.next().is_none() => {
                    if fs::remove_dir(&dir).is_err() {
                        break;
                    }
                }
                _ => break,
            }
            if !dir.pop() {
                break;
            }
            if dir == self.root {
                break;
            }
        }
    }
}

impl PrintStore for FileStore {
    fn init(&self) -> Result<(), StoreError> {
        Self::create_owner_only_dir_all(&self.root)?;
        Ok(())
    }

    fn deinit(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn save(&self, print: &Print) -> Result<(), StoreError> {
        let dir = self.device_dir(&print.username, &print.device);
        Self::create_owner_only_dir_all(&dir)?;

        let path = self.print_path(&print.username, &print.device, print.finger);
        let bytes = bincode::serialize(print).map_err(|e| StoreError::Serialize(e.to_string()))?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).map_err(|e| StoreError::Io(e.to_string()))?;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
            .map_err(|e| StoreError::Io(e.to_string()))?;
        fs::rename(&tmp, &path).map_err(|e| StoreError::Io(e.to_string()))?;
        debug!("saved print for {} finger {} at {:?}", print.username, print.finger, path);
        Ok(())
    }

    fn load(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<Print, StoreError> {
        let path = self.print_path(user, device, finger);
        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound
            } else if e.kind() == std::io::ErrorKind::PermissionDenied {
                StoreError::Permission(e.to_string())
            } else {
                StoreError::Io(e.to_string())
            }
        })?;
        let print: Print =
            bincode::deserialize(&bytes).map_err(|e| StoreError::Serialize(e.to_string()))?;

        if !print.matches_location(device, finger, user) {
            warn!(
                "print at {:?} does not match requested location (user/device/finger)",
                path
            );
            return Err(StoreError::Incompatible);
        }
        Ok(print)
    }

    fn delete(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<(), StoreError> {
        let path = self.print_path(user, device, finger);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_parents(path.parent().unwrap().to_path_buf(), &self.root.join(user));
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn discover_prints(&self, device: &DeviceIdentity, user: &str) -> Result<HashSet<Finger>, StoreError> {
        let dir = self.device_dir(user, device);
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut fingers = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.len() == 1 {
                    if let Some(c) = name.chars().next() {
                        if let Some(finger) = Finger::from_storage_hex_digit(c) {
                            fingers.insert(finger);
                        }
                    }
                }
            }
        }
        Ok(fingers)
    }

    fn discover_users(&self) -> Result<HashSet<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut users = HashSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::Io(e.to_string()))?;
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    users.insert(name.to_owned());
                }
            }
        }
        Ok(users)
    }
}
