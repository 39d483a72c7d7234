//! Suspend Coordinator: watches logind's `PrepareForSleep` signal, holds
//! a delay inhibitor, and drives every device's suspend/resume hook
//! behind a pending-count barrier so one wedged driver can't block
//! system sleep forever.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Notify;

use crate::manager::Manager;

/// How long `suspend_all` waits for every device before giving up and
/// releasing the inhibitor anyway — system suspend must not hang on a
/// misbehaving driver.
const SUSPEND_BARRIER_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendError(pub String);

impl fmt::Display for SuspendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "suspend coordinator: {}", self.0)
    }
}

impl std::error::Error for SuspendError {}

/// The opaque logind collaborator: a sleep inhibitor plus the
/// `PrepareForSleep` signal. The inhibitor is an opaque drop-to-release
/// token so tests don't need a real file descriptor.
#[async_trait]
pub trait LogindBackend: Send + Sync {
    async fn inhibit_sleep(&self) -> Result<Box<dyn Any + Send + Sync>, SuspendError>;
    /// Blocks until the next `PrepareForSleep` signal; `true` means sleep
    /// is about to start, `false` means the system just resumed.
    async fn next_prepare_for_sleep(&self) -> Result<bool, SuspendError>;
}

pub struct Logind1Backend {
    connection: zbus::Connection,
}

impl Logind1Backend {
    pub async fn connect() -> Result<Self, SuspendError> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| SuspendError(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait Login1Manager {
    fn inhibit(&self, what: &str, who: &str, why: &str, mode: &str) -> zbus::Result<zbus::zvariant::OwnedFd>;

    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

#[async_trait]
impl LogindBackend for Logind1Backend {
    async fn inhibit_sleep(&self) -> Result<Box<dyn Any + Send + Sync>, SuspendError> {
        let proxy = Login1ManagerProxy::new(&self.connection)
            .await
            .map_err(|e| SuspendError(e.to_string()))?;
        let fd = proxy
            .inhibit("sleep", "fprintd", "Let fingerprint devices suspend cleanly", "delay")
            .await
            .map_err(|e| SuspendError(e.to_string()))?;
        Ok(Box::new(fd))
    }

    async fn next_prepare_for_sleep(&self) -> Result<bool, SuspendError> {
        let proxy = Login1ManagerProxy::new(&self.connection)
            .await
            .map_err(|e| SuspendError(e.to_string()))?;
        let mut stream = proxy
            .receive_prepare_for_sleep()
            .await
            .map_err(|e| SuspendError(e.to_string()))?;
        let signal = stream
            .next()
            .await
            .ok_or_else(|| SuspendError("PrepareForSleep stream closed".into()))?;
        let args = signal.args().map_err(|e| SuspendError(e.to_string()))?;
        Ok(args.start)
    }
}

pub struct SuspendCoordinator {
    backend: Arc<dyn LogindBackend>,
    manager: Arc<Manager>,
}

impl SuspendCoordinator {
    pub fn new(backend: Arc<dyn LogindBackend>, manager: Arc<Manager>) -> Self {
        Self { backend, manager }
    }

    /// Runs until the manager shuts down or the logind connection drops.
    pub async fn run(self) {
        let mut inhibitor = match self.backend.inhibit_sleep().await {
            Ok(token) => Some(token),
            Err(e) => {
                log::warn!("could not take a sleep inhibitor: {e}");
                None
            }
        };

        loop {
            tokio::select! {
                _ = self.manager.shutdown.cancelled() => return,
                signal = self.backend.next_prepare_for_sleep() => {
                    match signal {
                        Ok(true) => {
                            self.suspend_all().await;
                            inhibitor = None; // drop releases the inhibitor, letting sleep proceed
                        }
                        Ok(false) => {
                            self.resume_all().await;
                            inhibitor = match self.backend.inhibit_sleep().await {
                                Ok(token) => Some(token),
                                Err(e) => {
                                    log::warn!("could not re-take a sleep inhibitor: {e}");
                                    None
                                }
                            };
                        }
                        Err(e) => {
                            log::warn!("logind signal stream error: {e}");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Suspends every device concurrently; a shared pending counter hits
    /// zero once the last one finishes (the "sentinel" that unblocks the
    /// waiter), bounded by `SUSPEND_BARRIER_DEADLINE` so one stuck driver
    /// can't hold up the inhibitor release.
    async fn suspend_all(&self) {
        let devices = self.manager.devices().await;
        if devices.is_empty() {
            return;
        }
        let pending = Arc::new(AtomicUsize::new(devices.len()));
        let done = Arc::new(Notify::new());
        for device in devices {
            let pending = pending.clone();
            let done = done.clone();
            tokio::spawn(async move {
                if let Err(e) = device.suspend().await {
                    log::warn!("device suspend failed: {e}");
                }
                if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                    done.notify_one();
                }
            });
        }
        if tokio::time::timeout(SUSPEND_BARRIER_DEADLINE, done.notified()).await.is_err() {
            log::warn!("suspend barrier timed out waiting for all devices");
        }
    }

    async fn resume_all(&self) {
        let devices = self.manager.devices().await;
        let handles: Vec<_> = devices
            .into_iter()
            .map(|device| {
                tokio::spawn(async move {
                    if let Err(e) = device.resume().await {
                        log::warn!("device resume failed: {e}");
                    }
                })
            })
            .collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capability::Features;
    use crate::device::mock::MockCapability;
    use crate::manager::StaticDiscovery;
    use crate::store::MemoryStore;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct ScriptedBackend {
        events: Mutex<mpsc::UnboundedReceiver<bool>>,
        inhibit_calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(events: mpsc::UnboundedReceiver<bool>) -> Self {
            Self { events: Mutex::new(events), inhibit_calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl LogindBackend for ScriptedBackend {
        async fn inhibit_sleep(&self) -> Result<Box<dyn Any + Send + Sync>, SuspendError> {
            self.inhibit_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(()))
        }

        async fn next_prepare_for_sleep(&self) -> Result<bool, SuspendError> {
            self.events
                .lock()
                .unwrap()
                .recv()
                .await
                .ok_or_else(|| SuspendError("closed".into()))
        }
    }

    #[tokio::test]
    async fn suspend_then_resume_reaches_every_device() {
        let caps: Vec<_> = (0..3)
            .map(|i| {
                Arc::new(MockCapability::new(
                    "mock",
                    &format!("dev-{i}"),
                    1,
                    Features { has_identify: false, has_storage: true, has_storage_list: false },
                )) as Arc<dyn crate::device::capability::DeviceCapability>
            })
            .collect();
        let discovery = StaticDiscovery::new(caps);
        let manager = Manager::new(&discovery, Arc::new(MemoryStore::new()), None).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let backend = Arc::new(ScriptedBackend::new(rx));
        let coordinator = SuspendCoordinator::new(backend.clone(), manager.clone());
        let handle = tokio::spawn(coordinator.run());

        tx.send(true).unwrap();
        tx.send(false).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;

        assert!(backend.inhibit_calls.load(Ordering::SeqCst) >= 2);
    }
}
