//! Manager: device discovery, and the idle-exit timer that lets the
//! daemon shut down gracefully when nothing is using it — a drain, not
//! a hard `process::exit`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::device::capability::DeviceCapability;
use crate::device::session::DeviceSession;
use crate::device::state_machine::OperationState;
use crate::store::PrintStore;

/// Enumerates the fingerprint readers available to the daemon. A real
/// driver binding would hotplug-watch udev; this seam just needs to hand
/// back capability handles.
#[async_trait]
pub trait DeviceDiscovery: Send + Sync {
    async fn discover(&self) -> Vec<Arc<dyn DeviceCapability>>;
}

/// A fixed device list, for tests and for setups without hotplug.
pub struct StaticDiscovery {
    capabilities: Vec<Arc<dyn DeviceCapability>>,
}

impl StaticDiscovery {
    pub fn new(capabilities: Vec<Arc<dyn DeviceCapability>>) -> Self {
        Self { capabilities }
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDiscovery {
    async fn discover(&self) -> Vec<Arc<dyn DeviceCapability>> {
        self.capabilities.clone()
    }
}

/// Owns the set of known devices and the idle-exit timer.
pub struct Manager {
    devices: RwLock<Vec<Arc<DeviceSession>>>,
    store: Arc<dyn PrintStore>,
    idle_timeout: Option<Duration>,
    last_activity: Mutex<Instant>,
    pending_requests: AtomicUsize,
    draining: AtomicBool,
    pub shutdown: CancellationToken,
}

impl Manager {
    pub async fn new(discovery: &dyn DeviceDiscovery, store: Arc<dyn PrintStore>, idle_timeout: Option<Duration>) -> Arc<Self> {
        let capabilities = discovery.discover().await;
        let devices = capabilities
            .into_iter()
            .map(|capability| Arc::new(DeviceSession::new(capability, store.clone())))
            .collect();

        Arc::new(Self {
            devices: RwLock::new(devices),
            store,
            idle_timeout,
            last_activity: Mutex::new(Instant::now()),
            pending_requests: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn devices(&self) -> Vec<Arc<DeviceSession>> {
        self.devices.read().await.clone()
    }

    pub async fn device(&self, index: usize) -> Option<Arc<DeviceSession>> {
        self.devices.read().await.get(index).cloned()
    }

    pub fn store(&self) -> Arc<dyn PrintStore> {
        self.store.clone()
    }

    /// Hotplug: append a newly appeared device, returning its index.
    pub async fn add_device(&self, capability: Arc<dyn DeviceCapability>) -> usize {
        let mut devices = self.devices.write().await;
        devices.push(Arc::new(DeviceSession::new(capability, self.store.clone())));
        self.notify_activity();
        devices.len() - 1
    }

    /// Hotplug: drop a device that disappeared. Any in-flight claim on it
    /// is simply abandoned — the object is gone, so there is nothing left
    /// to release from underneath it.
    pub async fn remove_device(&self, index: usize) -> Option<Arc<DeviceSession>> {
        let mut devices = self.devices.write().await;
        if index >= devices.len() {
            return None;
        }
        Some(devices.remove(index))
    }

    /// A method invocation arrived; resets the idle clock. RAII-returned
    /// guard keeps the daemon from looking idle while the call is still
    /// being handled, even across an `.await`.
    pub fn begin_request(&self) -> RequestGuard<'_> {
        self.notify_activity();
        self.pending_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard(self)
    }

    fn notify_activity(&self) {
        *self.last_activity.lock().unwrap() = Instant::now();
    }

    /// Begin a graceful shutdown: new `Claim` calls are refused from this
    /// point on, but already-claimed operations are left to finish.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub async fn is_idle(&self) -> bool {
        if self.pending_requests.load(Ordering::SeqCst) > 0 {
            return false;
        }
        for device in self.devices.read().await.iter() {
            if device.claims.session().is_some() {
                return false;
            }
            if !matches!(device.current_state(), OperationState::None | OperationState::Open) {
                return false;
            }
        }
        true
    }

    /// Runs until the idle timeout elapses with no claims, in-flight
    /// requests, or operations outstanding, then signals `shutdown`.
    /// Never returns if no timeout is configured.
    pub async fn run_idle_timer(self: Arc<Self>) {
        let Some(timeout) = self.idle_timeout else {
            std::future::pending::<()>().await;
            return;
        };

        let poll_interval = Duration::from_secs(1).min(timeout);
        loop {
            tokio::time::sleep(poll_interval).await;
            let elapsed = self.last_activity.lock().unwrap().elapsed();
            if elapsed >= timeout && self.is_idle().await {
                log::info!("idle for {:?}, shutting down", elapsed);
                self.shutdown.cancel();
                return;
            }
        }
    }
}

pub struct RequestGuard<'a>(&'a Manager);

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.0.pending_requests.fetch_sub(1, Ordering::SeqCst);
        self.0.notify_activity();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capability::Features;
    use crate::device::mock::MockCapability;
    use crate::store::MemoryStore;

    fn mock_capability() -> Arc<dyn DeviceCapability> {
        Arc::new(MockCapability::new(
            "mock",
            "dev-0",
            1,
            Features { has_identify: false, has_storage: true, has_storage_list: false },
        ))
    }

    #[tokio::test]
    async fn discovers_devices_at_startup() {
        let discovery = StaticDiscovery::new(vec![mock_capability(), mock_capability()]);
        let manager = Manager::new(&discovery, Arc::new(MemoryStore::new()), None).await;
        assert_eq!(manager.devices().await.len(), 2);
    }

    #[tokio::test]
    async fn hotplugged_device_is_appended_and_removable() {
        let discovery = StaticDiscovery::new(vec![]);
        let manager = Manager::new(&discovery, Arc::new(MemoryStore::new()), None).await;

        let index = manager.add_device(mock_capability()).await;
        assert_eq!(index, 0);
        assert_eq!(manager.devices().await.len(), 1);

        assert!(manager.remove_device(0).await.is_some());
        assert!(manager.devices().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_fires_shutdown_once_unclaimed_and_elapsed() {
        let discovery = StaticDiscovery::new(vec![mock_capability()]);
        let manager = Manager::new(&discovery, Arc::new(MemoryStore::new()), Some(Duration::from_secs(5))).await;

        let handle = tokio::spawn(manager.clone().run_idle_timer());
        tokio::time::sleep(Duration::from_secs(7)).await;
        handle.await.unwrap();
        assert!(manager.shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timer_does_not_fire_while_a_device_is_claimed() {
        let discovery = StaticDiscovery::new(vec![mock_capability()]);
        let manager = Manager::new(&discovery, Arc::new(MemoryStore::new()), Some(Duration::from_secs(2))).await;
        let device = manager.device(0).await.unwrap();
        device.claim("caller", "alice").unwrap();

        let manager2 = manager.clone();
        let handle = tokio::spawn(async move {
            tokio::time::timeout(Duration::from_secs(4), manager2.run_idle_timer()).await
        });
        tokio::time::sleep(Duration::from_secs(4)).await;
        let result = handle.await.unwrap();
        assert!(result.is_err(), "idle timer should not have fired while claimed");
    }
}
