//! Print Store: persists enrolled prints, keyed by (user, driver,
//! device-id, finger), and enumerates users/fingers.

mod file;
mod memory;
mod print;
mod registry;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use print::{DeviceIdentity, Print};
pub use registry::StoreRegistry;

use std::collections::HashSet;
use std::fmt;

use crate::finger::Finger;

/// Failure modes for the Print Store contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    Incompatible,
    Io(String),
    Serialize(String),
    Permission(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "print not found"),
            StoreError::Incompatible => write!(f, "stored print incompatible with request"),
            StoreError::Io(msg) => write!(f, "storage io error: {msg}"),
            StoreError::Serialize(msg) => write!(f, "print serialization error: {msg}"),
            StoreError::Permission(msg) => write!(f, "storage permission error: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Pluggable persistence contract for enrolled prints. A concrete store is
/// chosen at startup by the `[storage] type=` config key and MUST be
/// replaceable — `FileStore` is the default, `MemoryStore` is a second,
/// fully conforming implementation used in tests and `type=memory`.
pub trait PrintStore: Send + Sync {
    fn init(&self) -> Result<(), StoreError>;
    fn deinit(&self) -> Result<(), StoreError>;

    fn save(&self, print: &Print) -> Result<(), StoreError>;

    /// Rejects a loaded print whose finger/username don't match the
    /// request, or that is incompatible with the device.
    fn load(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<Print, StoreError>;

    fn delete(&self, device: &DeviceIdentity, finger: Finger, user: &str) -> Result<(), StoreError>;

    fn discover_prints(&self, device: &DeviceIdentity, user: &str) -> Result<HashSet<Finger>, StoreError>;

    fn discover_users(&self) -> Result<HashSet<String>, StoreError>;
}

#[cfg(test)]
mod contract_tests {
    //! Shared property tests run against every `PrintStore` implementation,
    //! so a newly plugged-in backend is held to the same invariants.

    use super::*;
    use chrono::NaiveDate;

    fn sample_print(user: &str, finger: Finger) -> Print {
        Print::new(
            user,
            finger,
            DeviceIdentity::new("synaptics", "dev-0"),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            vec![1, 2, 3, 4],
        )
    }

    fn exercise_round_trip(store: &dyn PrintStore) {
        let device = DeviceIdentity::new("synaptics", "dev-0");
        let print = sample_print("alice", Finger::RightIndexFinger);
        store.save(&print).unwrap();

        let loaded = store
            .load(&device, Finger::RightIndexFinger, "alice")
            .unwrap();
        assert_eq!(loaded, print);

        let fingers = store.discover_prints(&device, "alice").unwrap();
        assert!(fingers.contains(&Finger::RightIndexFinger));

        let users = store.discover_users().unwrap();
        assert!(users.contains("alice"));
    }

    fn exercise_mismatch_rejection(store: &dyn PrintStore) {
        let device = DeviceIdentity::new("synaptics", "dev-0");
        store.save(&sample_print("bob", Finger::LeftThumb)).unwrap();

        assert!(matches!(
            store.load(&device, Finger::LeftThumb, "carol"),
            Err(StoreError::NotFound) | Err(StoreError::Incompatible)
        ));
        assert!(matches!(
            store.load(&device, Finger::RightThumb, "bob"),
            Err(StoreError::NotFound)
        ));
    }

    fn exercise_delete_prunes(store: &dyn PrintStore) {
        let device = DeviceIdentity::new("synaptics", "dev-0");
        store
            .save(&sample_print("dana", Finger::LeftLittleFinger))
            .unwrap();
        store
            .delete(&device, Finger::LeftLittleFinger, "dana")
            .unwrap();

        assert!(matches!(
            store.load(&device, Finger::LeftLittleFinger, "dana"),
            Err(StoreError::NotFound)
        ));
        let fingers = store.discover_prints(&device, "dana").unwrap();
        assert!(fingers.is_empty());
    }

    #[test]
    fn file_store_satisfies_contract() {
        let dir = tempdir();
        let store = FileStore::with_root(dir.path());
        store.init().unwrap();
        exercise_round_trip(&store);
        exercise_mismatch_rejection(&store);
        exercise_delete_prunes(&store);
    }

    #[test]
    fn memory_store_satisfies_contract() {
        let store = MemoryStore::new();
        store.init().unwrap();
        exercise_round_trip(&store);
        exercise_mismatch_rejection(&store);
        exercise_delete_prunes(&store);
    }

    /// Minimal scoped temp dir so the contract tests don't depend on an
    /// external crate just to clean up after themselves.
    struct TempDir(std::path::PathBuf);

    impl TempDir {
        fn path(&self) -> &std::path::Path {
            &self.0
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.0);
        }
    }

    fn tempdir() -> TempDir {
        let mut path = std::env::temp_dir();
        let unique = format!(
            "fprintd-store-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        );
        path.push(unique);
        std::fs::create_dir_all(&path).unwrap();
        TempDir(path)
    }
}
