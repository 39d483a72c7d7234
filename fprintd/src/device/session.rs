//! Device Session: wires a `DeviceCapability` to a `PrintStore` behind
//! the claim registry and operation state machine, and runs the
//! enroll/verify/identify/delete protocols.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::capability::{
    CapabilityError, DeviceCapability, DeviceProperties, EnrollProgress, EnrollSinks, Features,
    GalleryPrint, IdentifyOutcome, RetryReason, TemperatureClass, VerifySinks,
};
use super::claim::{ClaimRegistry, Session};
use super::state_machine::{classify, ErrorClass, OperationState, StateMachine};
use crate::error::FprintError;
use crate::finger::Finger;
use crate::store::{DeviceIdentity, Print, PrintStore};

/// Events the D-Bus layer forwards as signals on the device object.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    EnrollStatus { result: String, done: bool },
    VerifyStatus { result: String, done: bool },
    VerifyFingerSelected { finger: Finger },
    BusyChanged { busy: bool },
}

fn retry_reason_token(prefix: &str, reason: RetryReason) -> String {
    let suffix = match reason {
        RetryReason::SwipeTooShort => "swipe-too-short",
        RetryReason::FingerNotCentered => "finger-not-centered",
        RetryReason::RemoveAndRetry => "remove-and-retry",
        RetryReason::RetryScan => "retry-scan",
    };
    format!("{prefix}-{suffix}")
}

pub struct DeviceSession {
    identity: DeviceIdentity,
    capability: Arc<dyn DeviceCapability>,
    store: Arc<dyn PrintStore>,
    pub claims: ClaimRegistry,
    state: StateMachine,
    events: broadcast::Sender<DeviceEvent>,
    reconciled: AtomicBool,
}

impl DeviceSession {
    pub fn new(capability: Arc<dyn DeviceCapability>, store: Arc<dyn PrintStore>) -> Self {
        let identity = DeviceIdentity::new(capability.driver(), capability.device_id());
        let (events, _) = broadcast::channel(64);
        Self {
            identity,
            capability,
            store,
            claims: ClaimRegistry::new(),
            state: StateMachine::new(),
            events,
            reconciled: AtomicBool::new(false),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// The device's properties have the session's identify-capability
    /// stage added in: an internal identify pass before enrolment counts
    /// as a stage of its own.
    pub fn properties(&self) -> DeviceProperties {
        let mut props = self.capability.properties();
        if self.capability.features().has_identify {
            props.nr_enroll_stages += 1;
        }
        props
    }

    pub fn features(&self) -> Features {
        self.capability.features()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }

    pub fn current_state(&self) -> OperationState {
        self.state.current()
    }

    /// True iff a client currently holds this device's claim, or the
    /// device itself is running warmer than cold.
    pub fn is_busy(&self) -> bool {
        self.claims.session().is_some() || self.capability.properties().temperature != TemperatureClass::Cold
    }

    pub fn claim(&self, caller_id: &str, user: &str) -> Result<Arc<Session>, FprintError> {
        let session = self.claims.claim(caller_id, user)?;
        self.reconciled.store(false, Ordering::SeqCst);
        let _ = self.events.send(DeviceEvent::BusyChanged { busy: true });
        Ok(session)
    }

    pub fn release(&self, caller_id: &str) {
        self.claims.release_if_owned_by(caller_id);
        let _ = self.events.send(DeviceEvent::BusyChanged { busy: self.is_busy() });
    }

    pub async fn open(&self) -> Result<(), FprintError> {
        self.state.open()?;
        if let Err(e) = self.capability.open().await {
            self.state.close().ok();
            return Err(e.into());
        }
        self.reconcile_once().await;
        Ok(())
    }

    /// Best-effort suspend/resume hooks for the Suspend Coordinator.
    /// Deliberately don't touch the operation state machine: a verify in
    /// flight when the lid closes is the driver's problem, not ours to
    /// cancel.
    pub async fn suspend(&self) -> Result<(), FprintError> {
        Ok(self.capability.suspend().await?)
    }

    pub async fn resume(&self) -> Result<(), FprintError> {
        Ok(self.capability.resume().await?)
    }

    pub async fn close(&self) -> Result<(), FprintError> {
        if self.state.current() != OperationState::Open {
            return Err(FprintError::Internal("close requires an open, idle device".into()));
        }
        self.capability.close().await?;
        self.state.close()?;
        Ok(())
    }

    /// Detect drift between the device's own storage and the print store,
    /// once per claimed session. Only meaningful for devices that keep
    /// an onboard gallery.
    async fn reconcile_once(&self) {
        if self.reconciled.swap(true, Ordering::SeqCst) {
            return;
        }
        if !self.capability.features().has_storage_list {
            return;
        }
        let Ok(device_prints) = self.capability.list_prints().await else {
            return;
        };
        let Ok(users) = self.store.discover_users() else {
            return;
        };
        for user in users {
            let Ok(fingers) = self.store.discover_prints(&self.identity, &user) else {
                continue;
            };
            for finger in fingers {
                let present = device_prints
                    .iter()
                    .any(|p| p.username == user && p.finger == finger);
                if !present {
                    log::warn!(
                        "reconciliation: {user}'s {finger} print is recorded but absent from device storage, dropping record"
                    );
                    let _ = self.store.delete(&self.identity, finger, &user);
                }
            }
        }
    }

    pub fn list_enrolled_fingers(&self, username: &str) -> Result<Vec<Finger>, FprintError> {
        let fingers = self.store.discover_prints(&self.identity, username)?;
        if fingers.is_empty() {
            return Err(FprintError::NoEnrolledPrints);
        }
        let mut fingers: Vec<Finger> = fingers.into_iter().collect();
        fingers.sort();
        Ok(fingers)
    }

    // ---- Enroll -------------------------------------------------------

    pub async fn enroll_start(self: &Arc<Self>, finger: Finger, username: &str) -> Result<(), FprintError> {
        if finger.is_unknown() {
            return Err(FprintError::InvalidFingername);
        }

        let cancel = self.state.begin(OperationState::Enroll)?;

        let this = self.clone();
        let username = username.to_owned();
        tokio::spawn(async move {
            this.run_enroll(finger, username, cancel).await;
        });
        Ok(())
    }

    async fn run_enroll(&self, finger: Finger, username: String, cancel: CancellationToken) {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<EnrollProgress>();
        let forward_events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = progress_rx.recv().await {
                let (result, done) = match event {
                    EnrollProgress::StagePassed(_) => ("enroll-stage-passed".to_owned(), false),
                    EnrollProgress::Retry(reason) => (retry_reason_token("enroll", reason), false),
                };
                let _ = forward_events.send(DeviceEvent::EnrollStatus { result, done });
            }
        });

        // Step 1: an existing print for this exact (user, finger) is
        // replaced outright rather than rejected as already-enrolled.
        self.replace_existing_print(finger, &username).await;

        // Step 2: a device with no on-device print listing has no way to
        // tell us what it's holding; if the host store has never heard of
        // this device either, there is nothing to reconcile against, so
        // wipe it clean rather than risk orphaned templates later.
        let gallery = self.all_host_prints();
        if !self.capability.features().has_storage_list && gallery.is_empty() {
            let _ = self.capability.clear_storage().await;
        }

        // Step 3: a device that can identify gets one duplicate-detection
        // pass against every print the host store knows about before
        // committing to a fresh enrolment.
        let short_circuit = if self.capability.features().has_identify {
            self.pre_enroll_duplicate_check(&cancel, &progress_tx, gallery).await
        } else {
            None
        };

        let (result, done) = match short_circuit {
            Some(outcome) => outcome,
            None => self.run_enroll_capture(finger, &username, &cancel, &progress_tx).await,
        };

        drop(progress_tx);
        let _ = forwarder.await;
        let _ = self.events.send(DeviceEvent::EnrollStatus { result, done });
        self.state.end();
    }

    /// Step 4 onward: run the actual capture loop (with the data-full
    /// garbage-collect-and-retry of step 7) and persist the result.
    async fn run_enroll_capture(
        &self,
        finger: Finger,
        username: &str,
        cancel: &CancellationToken,
        progress_tx: &mpsc::UnboundedSender<EnrollProgress>,
    ) -> (String, bool) {
        let outcome = loop {
            let sinks = EnrollSinks { progress: progress_tx.clone() };
            match self.capability.enroll(finger, cancel.clone(), sinks).await {
                Ok(template) => break Ok(template),
                Err(CapabilityError::DataFull) => {
                    match self.garbage_collect_and_retry(finger, cancel.clone(), progress_tx).await {
                        Ok(template) => break Ok(template),
                        Err(e) => break Err(e),
                    }
                }
                Err(e) => match classify(&e) {
                    ErrorClass::Retry(_) if !cancel.is_cancelled() => continue,
                    _ => break Err(e),
                },
            }
        };

        match outcome {
            Ok(template) => {
                let print = Print::new(
                    username.to_owned(),
                    finger,
                    self.identity.clone(),
                    chrono::Local::now().date_naive(),
                    template,
                );
                match self.store.save(&print) {
                    Ok(()) => ("enroll-completed-ok".to_owned(), true),
                    Err(e) => {
                        log::error!("failed to persist enrolled print: {e}");
                        ("enroll-completed-store-failure".to_owned(), true)
                    }
                }
            }
            Err(CapabilityError::Cancelled) => ("enroll-stopped".to_owned(), true),
            Err(e) => {
                log::warn!("enrollment failed: {e}");
                ("enroll-failed".to_owned(), true)
            }
        }
    }

    /// Deletes a print already enrolled for this exact (user, finger), if
    /// any, via the same path `DeleteEnrolledFinger` uses.
    async fn replace_existing_print(&self, finger: Finger, username: &str) {
        if self.store.load(&self.identity, finger, username).is_ok() {
            let _ = self.delete_one(finger, username).await;
        }
    }

    /// Every print the host store has recorded for this device, across
    /// all users — the gallery a pre-enrol duplicate check runs against.
    fn all_host_prints(&self) -> Vec<GalleryPrint> {
        let Ok(users) = self.store.discover_users() else {
            return Vec::new();
        };
        let mut gallery = Vec::new();
        for user in users {
            let Ok(fingers) = self.store.discover_prints(&self.identity, &user) else {
                continue;
            };
            for finger in fingers {
                if let Ok(print) = self.store.load(&self.identity, finger, &user) {
                    gallery.push(GalleryPrint { finger, username: user.clone(), template: print.template });
                }
            }
        }
        gallery
    }

    /// Deletes any print the device reports onboard that the host store
    /// no longer tracks, so a stale template can't produce a false
    /// duplicate match against a finger the user is free to re-enrol.
    async fn drop_device_orphans(&self, gallery: &[GalleryPrint]) {
        if !self.capability.features().has_storage_list {
            return;
        }
        let Ok(onboard) = self.capability.list_prints().await else {
            return;
        };
        for device_print in onboard {
            let tracked = gallery
                .iter()
                .any(|p| p.username == device_print.username && p.finger == device_print.finger);
            if !tracked {
                let _ = self.capability.delete_print(&device_print).await;
            }
        }
    }

    /// Step 3 of the enroll protocol. Returns `Some` with a terminal
    /// status when enrolment must not proceed (a duplicate was found, the
    /// check was cancelled, or the driver failed); `None` to proceed with
    /// capture.
    async fn pre_enroll_duplicate_check(
        &self,
        cancel: &CancellationToken,
        progress_tx: &mpsc::UnboundedSender<EnrollProgress>,
        gallery: Vec<GalleryPrint>,
    ) -> Option<(String, bool)> {
        self.drop_device_orphans(&gallery).await;
        if gallery.is_empty() {
            return None;
        }

        loop {
            let (match_tx, _match_rx) = mpsc::unbounded_channel::<bool>();
            let sinks = VerifySinks { match_event: match_tx };
            match self.capability.identify(&gallery, cancel.clone(), sinks).await {
                Ok(IdentifyOutcome::Matched { .. }) => return Some(("enroll-duplicate".to_owned(), true)),
                Ok(IdentifyOutcome::NoMatch) => return None,
                Err(e) if matches!(e, CapabilityError::Cancelled) => {
                    return Some(("enroll-stopped".to_owned(), true));
                }
                Err(e) => match classify(&e) {
                    ErrorClass::Retry(reason) if !cancel.is_cancelled() => {
                        let _ = progress_tx.send(EnrollProgress::Retry(reason));
                        continue;
                    }
                    _ => {
                        log::warn!("pre-enroll duplicate check failed: {e}");
                        return Some(("enroll-failed".to_owned(), true));
                    }
                },
            }
        }
    }

    pub async fn enroll_stop(&self) -> Result<(), FprintError> {
        if self.state.current() != OperationState::Enroll {
            return Err(FprintError::NoActionInProgress);
        }
        self.state.request_stop().await;
        Ok(())
    }

    async fn garbage_collect_and_retry(
        &self,
        finger: Finger,
        cancel: CancellationToken,
        progress_tx: &mpsc::UnboundedSender<EnrollProgress>,
    ) -> Result<Vec<u8>, CapabilityError> {
        if !self.capability.features().has_storage_list {
            return Err(CapabilityError::DataFull);
        }
        let onboard = self.capability.list_prints().await?;
        let victim = self.gc_select_candidate(&onboard);
        let Some(victim) = victim else {
            return Err(CapabilityError::DataFull);
        };
        log::info!(
            "device storage full, evicting {}'s {} print to make room",
            victim.username, victim.finger
        );
        self.capability.delete_print(&victim).await.ok();
        let _ = self.store.delete(&self.identity, victim.finger, &victim.username);

        let sinks = EnrollSinks { progress: progress_tx.clone() };
        self.capability.enroll(finger, cancel, sinks).await
    }

    /// Deterministic eviction order: oldest enrolment date first, ties
    /// broken by a pseudo-random tag seeded from the print's own identity
    /// so the order is stable across runs without favouring e.g.
    /// alphabetically-first usernames.
    fn gc_select_candidate(&self, onboard: &[GalleryPrint]) -> Option<GalleryPrint> {
        onboard
            .iter()
            .min_by_key(|print| self.gc_sort_key(print))
            .cloned()
    }

    fn gc_sort_key(&self, print: &GalleryPrint) -> (chrono::NaiveDate, u64) {
        let enrolled_on = self
            .store
            .load(&self.identity, print.finger, &print.username)
            .map(|p| p.enrolled_on)
            .unwrap_or_else(|_| chrono::NaiveDate::MIN);
        (enrolled_on, stable_gc_tag(&print.username, print.finger))
    }

    // ---- Verify / Identify ---------------------------------------------

    pub async fn verify_start(self: &Arc<Self>, finger: Finger, username: &str) -> Result<(), FprintError> {
        if finger.is_unknown() {
            return self.identify_or_fallback_verify(username).await;
        }
        let print = self.store.load(&self.identity, finger, username)?;
        let cancel = self.state.begin(OperationState::Verify)?;
        let this = self.clone();
        tokio::spawn(async move {
            this.run_verify(print, cancel).await;
        });
        Ok(())
    }

    async fn identify_or_fallback_verify(self: &Arc<Self>, username: &str) -> Result<(), FprintError> {
        let enrolled = self.store.discover_prints(&self.identity, username)?;
        if enrolled.is_empty() {
            return Err(FprintError::NoEnrolledPrints);
        }

        if self.capability.features().has_identify {
            let mut gallery = Vec::with_capacity(enrolled.len());
            for finger in enrolled {
                let print = self.store.load(&self.identity, finger, username)?;
                gallery.push(GalleryPrint { finger, username: username.to_owned(), template: print.template });
            }
            let cancel = self.state.begin(OperationState::Identify)?;
            let this = self.clone();
            tokio::spawn(async move {
                this.run_identify(gallery, cancel).await;
            });
            return Ok(());
        }

        // No identify capability: an unambiguous single print can still be
        // verified directly; more than one is a deliberate failure rather
        // than an unpredictable guess at which one the caller meant.
        if enrolled.len() > 1 {
            return Err(FprintError::NoEnrolledPrints);
        }
        let only_finger = *enrolled.iter().next().unwrap();
        let print = self.store.load(&self.identity, only_finger, username)?;
        let _ = self.events.send(DeviceEvent::VerifyFingerSelected { finger: only_finger });
        let cancel = self.state.begin(OperationState::Verify)?;
        let this = self.clone();
        tokio::spawn(async move {
            this.run_verify(print, cancel).await;
        });
        Ok(())
    }

    async fn run_verify(&self, print: Print, cancel: CancellationToken) {
        let gallery_print = GalleryPrint { finger: print.finger, username: print.username, template: print.template };
        let (match_tx, mut match_rx) = mpsc::unbounded_channel::<bool>();
        let forward_events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(matched) = match_rx.recv().await {
                let result = if matched { "verify-match" } else { "verify-no-match" };
                let _ = forward_events.send(DeviceEvent::VerifyStatus { result: result.to_owned(), done: false });
            }
        });

        let outcome = loop {
            let sinks = VerifySinks { match_event: match_tx.clone() };
            match self.capability.verify(&gallery_print, cancel.clone(), sinks).await {
                Ok(matched) => break Ok(matched),
                Err(e) => match classify(&e) {
                    ErrorClass::Retry(_) if !cancel.is_cancelled() => continue,
                    _ => break Err(e),
                },
            }
        };

        drop(match_tx);
        let _ = forwarder.await;
        self.finish_verify_like(outcome.map(|matched| if matched { "verify-match" } else { "verify-no-match" }.to_owned()));
    }

    async fn run_identify(&self, gallery: Vec<GalleryPrint>, cancel: CancellationToken) {
        let (match_tx, mut match_rx) = mpsc::unbounded_channel::<bool>();
        let forward_events = self.events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(matched) = match_rx.recv().await {
                let result = if matched { "verify-match" } else { "verify-no-match" };
                let _ = forward_events.send(DeviceEvent::VerifyStatus { result: result.to_owned(), done: false });
            }
        });

        let outcome = loop {
            let sinks = VerifySinks { match_event: match_tx.clone() };
            match self.capability.identify(&gallery, cancel.clone(), sinks).await {
                Ok(IdentifyOutcome::Matched { index }) => {
                    let finger = gallery[index].finger;
                    let _ = self.events.send(DeviceEvent::VerifyFingerSelected { finger });
                    break Ok("verify-match".to_owned());
                }
                Ok(IdentifyOutcome::NoMatch) => break Ok("verify-no-match".to_owned()),
                Err(e) => match classify(&e) {
                    ErrorClass::Retry(_) if !cancel.is_cancelled() => continue,
                    _ => break Err(e),
                },
            }
        };

        drop(match_tx);
        let _ = forwarder.await;
        self.finish_verify_like(outcome);
    }

    fn finish_verify_like(&self, outcome: Result<String, CapabilityError>) {
        let (result, done) = match outcome {
            Ok(result) => (result, true),
            Err(CapabilityError::Cancelled) => ("verify-stopped".to_owned(), true),
            Err(e) => {
                log::warn!("verification failed: {e}");
                ("verify-unknown-error".to_owned(), true)
            }
        };
        let _ = self.events.send(DeviceEvent::VerifyStatus { result, done });
        self.state.end();
    }

    pub async fn verify_stop(&self) -> Result<(), FprintError> {
        let state = self.state.current();
        if state != OperationState::Verify && state != OperationState::Identify {
            return Err(FprintError::NoActionInProgress);
        }
        self.state.request_stop().await;
        Ok(())
    }

    // ---- Delete ---------------------------------------------------------

    pub async fn delete_enrolled_finger(&self, finger: Finger, username: &str) -> Result<(), FprintError> {
        let _cancel = self.state.begin(OperationState::Delete)?;
        let result = self.delete_one(finger, username).await;
        self.state.end();
        result.map_err(|_| FprintError::PrintsNotDeleted)
    }

    pub async fn delete_enrolled_fingers(&self, username: &str) -> Result<(), FprintError> {
        let fingers = self.store.discover_prints(&self.identity, username)?;
        if fingers.is_empty() {
            return Err(FprintError::NoEnrolledPrints);
        }

        let _cancel = self.state.begin(OperationState::Delete)?;
        let mut device_failed = false;
        let mut store_failed = false;
        for finger in fingers {
            match self.delete_one(finger, username).await {
                Ok(()) => {}
                Err(DeleteFailure::Device) => device_failed = true,
                Err(DeleteFailure::Store) => store_failed = true,
            }
        }
        self.state.end();

        if store_failed {
            Err(FprintError::PrintsNotDeleted)
        } else if device_failed {
            Err(FprintError::PrintsNotDeletedFromDevice)
        } else {
            Ok(())
        }
    }

    async fn delete_one(&self, finger: Finger, username: &str) -> Result<(), DeleteFailure> {
        if self.capability.features().has_storage {
            if let Ok(print) = self.store.load(&self.identity, finger, username) {
                let gallery_print = GalleryPrint { finger, username: username.to_owned(), template: print.template };
                if self.capability.delete_print(&gallery_print).await.is_err() {
                    self.store.delete(&self.identity, finger, username).ok();
                    return Err(DeleteFailure::Device);
                }
            }
        }
        self.store
            .delete(&self.identity, finger, username)
            .map_err(|_| DeleteFailure::Store)
    }
}

enum DeleteFailure {
    Device,
    Store,
}

fn stable_gc_tag(username: &str, finger: Finger) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    username.hash(&mut hasher);
    finger.hash(&mut hasher);
    let seed = hasher.finish();
    StdRng::seed_from_u64(seed).r#gen::<u64>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::capability::Features;
    use crate::device::mock::MockCapability;
    use crate::store::MemoryStore;

    fn features(identify: bool, storage_list: bool) -> Features {
        Features { has_identify: identify, has_storage: true, has_storage_list: storage_list }
    }

    fn session_with(capability: MockCapability) -> Arc<DeviceSession> {
        Arc::new(DeviceSession::new(Arc::new(capability), Arc::new(MemoryStore::new())))
    }

    #[tokio::test]
    async fn open_then_close_round_trip() {
        let session = session_with(MockCapability::new("mock", "dev-0", 1, features(false, false)));
        session.open().await.unwrap();
        assert_eq!(session.current_state(), OperationState::Open);
        session.close().await.unwrap();
        assert_eq!(session.current_state(), OperationState::None);
    }

    #[tokio::test]
    async fn enroll_persists_template_and_emits_completion() {
        let session = session_with(MockCapability::new("mock", "dev-0", 2, features(false, false)));
        session.open().await.unwrap();
        let mut events = session.subscribe();

        session.enroll_start(Finger::RightIndexFinger, "alice").await.unwrap();

        let mut saw_completion = false;
        for _ in 0..10 {
            if let Ok(DeviceEvent::EnrollStatus { result, done: true }) = events.recv().await {
                assert_eq!(result, "enroll-completed-ok");
                saw_completion = true;
                break;
            }
        }
        assert!(saw_completion);
        assert_eq!(session.current_state(), OperationState::Open);

        // Re-enrolling the same finger replaces the existing print rather
        // than failing with an already-enrolled error.
        session
            .enroll_start(Finger::RightIndexFinger, "alice")
            .await
            .unwrap();

        let mut saw_second_completion = false;
        for _ in 0..10 {
            if let Ok(DeviceEvent::EnrollStatus { result, done: true }) = events.recv().await {
                assert_eq!(result, "enroll-completed-ok");
                saw_second_completion = true;
                break;
            }
        }
        assert!(saw_second_completion);

        let fingers = session.list_enrolled_fingers("alice").unwrap();
        assert_eq!(fingers, vec![Finger::RightIndexFinger]);
    }

    #[tokio::test]
    async fn enroll_emits_duplicate_when_identify_matches_the_host_gallery() {
        let capability = MockCapability::new("mock", "dev-0", 1, features(true, false));
        capability.push_identify_result(Ok(IdentifyOutcome::Matched { index: 0 }));
        let session = session_with(capability);
        session.open().await.unwrap();

        let print = Print::new(
            "frank",
            Finger::LeftIndexFinger,
            session.identity().clone(),
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            vec![7],
        );
        session.store.save(&print).unwrap();

        let mut events = session.subscribe();
        session.enroll_start(Finger::RightThumb, "frank").await.unwrap();

        let mut saw_duplicate = false;
        for _ in 0..10 {
            if let Ok(DeviceEvent::EnrollStatus { result, done: true }) = events.recv().await {
                assert_eq!(result, "enroll-duplicate");
                saw_duplicate = true;
                break;
            }
        }
        assert!(saw_duplicate);
        assert!(session
            .store
            .load(session.identity(), Finger::RightThumb, "frank")
            .is_err());
    }

    #[tokio::test]
    async fn enroll_clears_storage_on_a_fresh_device_without_listing() {
        let capability = Arc::new(MockCapability::new("mock", "dev-0", 1, features(false, false)));
        let session = Arc::new(DeviceSession::new(capability.clone(), Arc::new(MemoryStore::new())));
        session.open().await.unwrap();

        let mut events = session.subscribe();
        session.enroll_start(Finger::LeftThumb, "gabe").await.unwrap();

        let mut saw_completion = false;
        for _ in 0..10 {
            if let Ok(DeviceEvent::EnrollStatus { done: true, .. }) = events.recv().await {
                saw_completion = true;
                break;
            }
        }
        assert!(saw_completion);
        assert_eq!(capability.clear_storage_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn verify_reports_match_against_onboard_print() {
        let template = vec![9, 9, 9];
        let capability = MockCapability::new("mock", "dev-0", 1, features(false, false))
            .with_onboard_prints(vec![GalleryPrint {
                finger: Finger::LeftThumb,
                username: "bob".into(),
                template: template.clone(),
            }]);
        let session = session_with(capability);
        session.open().await.unwrap();

        let print = Print::new(
            "bob",
            Finger::LeftThumb,
            session.identity().clone(),
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            template,
        );
        session.store.save(&print).unwrap();

        let mut events = session.subscribe();
        session.verify_start(Finger::LeftThumb, "bob").await.unwrap();

        let mut matched = None;
        for _ in 0..10 {
            if let Ok(DeviceEvent::VerifyStatus { result, done: true }) = events.recv().await {
                matched = Some(result);
                break;
            }
        }
        assert_eq!(matched.as_deref(), Some("verify-match"));
    }

    #[tokio::test]
    async fn verify_any_with_multiple_prints_and_no_identify_fails_deterministically() {
        let session = session_with(MockCapability::new("mock", "dev-0", 1, features(false, false)));
        session.open().await.unwrap();

        for finger in [Finger::LeftThumb, Finger::RightThumb] {
            let print = Print::new(
                "carol",
                finger,
                session.identity().clone(),
                chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
                vec![1],
            );
            session.store.save(&print).unwrap();
        }

        let err = session.verify_start(Finger::Unknown, "carol").await.unwrap_err();
        assert_eq!(err, FprintError::NoEnrolledPrints);
    }

    #[tokio::test]
    async fn delete_enrolled_finger_removes_from_store() {
        let session = session_with(MockCapability::new("mock", "dev-0", 1, features(false, false)));
        session.open().await.unwrap();
        let print = Print::new(
            "dana",
            Finger::RightMiddleFinger,
            session.identity().clone(),
            chrono::NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            vec![1],
        );
        session.store.save(&print).unwrap();

        session
            .delete_enrolled_finger(Finger::RightMiddleFinger, "dana")
            .await
            .unwrap();

        assert!(session
            .store
            .load(session.identity(), Finger::RightMiddleFinger, "dana")
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn enroll_stop_cancels_in_flight_enrollment() {
        let capability =
            MockCapability::new("mock", "dev-0", 5, features(false, false)).with_per_stage_delay(std::time::Duration::from_secs(10));
        let session = session_with(capability);
        session.open().await.unwrap();

        session.enroll_start(Finger::RightThumb, "erin").await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(session.current_state(), OperationState::Enroll);

        session.enroll_stop().await.unwrap();
        assert_eq!(session.current_state(), OperationState::Open);
    }
}
