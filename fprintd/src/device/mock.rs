//! A deterministic in-memory `DeviceCapability`, standing in for the
//! opaque driver library as an external collaborator. Exercised directly
//! by the state machine's tests and usable as a development backend when
//! no real hardware binding is linked in.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::capability::{
    CapabilityError, DeviceCapability, DeviceProperties, EnrollSinks, Features, GalleryPrint,
    IdentifyOutcome, ScanType, TemperatureClass, VerifySinks,
};
use crate::finger::Finger;

pub struct MockCapability {
    driver: String,
    device_id: String,
    features: Features,
    base_enroll_stages: i32,
    per_stage_delay: Duration,

    onboard: Mutex<Vec<GalleryPrint>>,
    enroll_script: Mutex<VecDeque<Result<Vec<u8>, CapabilityError>>>,
    verify_script: Mutex<VecDeque<Result<bool, CapabilityError>>>,
    identify_script: Mutex<VecDeque<Result<IdentifyOutcome, CapabilityError>>>,
    delete_should_fail: Mutex<bool>,

    pub suspend_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    pub clear_storage_calls: AtomicUsize,
}

impl MockCapability {
    pub fn new(driver: &str, device_id: &str, base_enroll_stages: i32, features: Features) -> Self {
        Self {
            driver: driver.to_owned(),
            device_id: device_id.to_owned(),
            features,
            base_enroll_stages,
            per_stage_delay: Duration::from_millis(0),
            onboard: Mutex::new(Vec::new()),
            enroll_script: Mutex::new(VecDeque::new()),
            verify_script: Mutex::new(VecDeque::new()),
            identify_script: Mutex::new(VecDeque::new()),
            delete_should_fail: Mutex::new(false),
            suspend_calls: AtomicUsize::new(0),
            resume_calls: AtomicUsize::new(0),
            clear_storage_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_per_stage_delay(mut self, delay: Duration) -> Self {
        self.per_stage_delay = delay;
        self
    }

    pub fn with_onboard_prints(self, prints: Vec<GalleryPrint>) -> Self {
        *self.onboard.lock().unwrap() = prints;
        self
    }

    pub fn push_enroll_result(&self, result: Result<Vec<u8>, CapabilityError>) {
        self.enroll_script.lock().unwrap().push_back(result);
    }

    pub fn push_verify_result(&self, result: Result<bool, CapabilityError>) {
        self.verify_script.lock().unwrap().push_back(result);
    }

    pub fn push_identify_result(&self, result: Result<IdentifyOutcome, CapabilityError>) {
        self.identify_script.lock().unwrap().push_back(result);
    }

    pub fn set_delete_should_fail(&self, fail: bool) {
        *self.delete_should_fail.lock().unwrap() = fail;
    }

    pub fn onboard_prints(&self) -> Vec<GalleryPrint> {
        self.onboard.lock().unwrap().clone()
    }
}

fn deterministic_template(finger: Finger, username: &str) -> Vec<u8> {
    let mut bytes = username.as_bytes().to_vec();
    bytes.push(finger as u8);
    bytes
}

#[async_trait]
impl DeviceCapability for MockCapability {
    fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            name: format!("mock:{}", self.driver),
            scan_type: ScanType::Press,
            nr_enroll_stages: self.base_enroll_stages,
            finger_present: false,
            finger_needed: false,
            temperature: TemperatureClass::Cold,
        }
    }

    fn features(&self) -> Features {
        self.features
    }

    fn driver(&self) -> &str {
        &self.driver
    }

    fn device_id(&self) -> &str {
        &self.device_id
    }

    async fn open(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), CapabilityError> {
        Ok(())
    }

    async fn enroll(
        &self,
        finger: Finger,
        cancel: CancellationToken,
        sinks: EnrollSinks,
    ) -> Result<Vec<u8>, CapabilityError> {
        for stage in 1..=self.base_enroll_stages as u32 {
            if cancel.is_cancelled() {
                return Err(CapabilityError::Cancelled);
            }
            if self.per_stage_delay > Duration::ZERO {
                tokio::time::sleep(self.per_stage_delay).await;
            }
            let _ = sinks
                .progress
                .send(super::capability::EnrollProgress::StagePassed(stage));
        }

        if cancel.is_cancelled() {
            return Err(CapabilityError::Cancelled);
        }

        let scripted = self.enroll_script.lock().unwrap().pop_front();
        match scripted {
            Some(result) => result,
            None => {
                let username = "scripted-user";
                let template = deterministic_template(finger, username);
                Ok(template)
            }
        }
    }

    async fn verify(
        &self,
        print: &GalleryPrint,
        cancel: CancellationToken,
        sinks: VerifySinks,
    ) -> Result<bool, CapabilityError> {
        if let Some(result) = self.verify_script.lock().unwrap().pop_front() {
            if let Ok(matched) = result {
                let _ = sinks.match_event.send(matched && !cancel.is_cancelled());
            }
            return result;
        }

        let matched = self
            .onboard
            .lock()
            .unwrap()
            .iter()
            .any(|p| p.template == print.template);
        let reported = matched && !cancel.is_cancelled();
        let _ = sinks.match_event.send(reported);
        Ok(reported)
    }

    async fn identify(
        &self,
        gallery: &[GalleryPrint],
        cancel: CancellationToken,
        sinks: VerifySinks,
    ) -> Result<IdentifyOutcome, CapabilityError> {
        if let Some(result) = self.identify_script.lock().unwrap().pop_front() {
            if let Ok(IdentifyOutcome::Matched { .. }) = &result {
                let _ = sinks.match_event.send(!cancel.is_cancelled());
            } else {
                let _ = sinks.match_event.send(false);
            }
            return result;
        }

        let onboard = self.onboard.lock().unwrap();
        for onboard_print in onboard.iter() {
            if let Some(index) = gallery.iter().position(|g| g.template == onboard_print.template) {
                let _ = sinks.match_event.send(!cancel.is_cancelled());
                return Ok(IdentifyOutcome::Matched { index });
            }
        }
        let _ = sinks.match_event.send(false);
        Ok(IdentifyOutcome::NoMatch)
    }

    async fn list_prints(&self) -> Result<Vec<GalleryPrint>, CapabilityError> {
        if !self.features.has_storage_list {
            return Err(CapabilityError::NotSupported);
        }
        Ok(self.onboard.lock().unwrap().clone())
    }

    async fn delete_print(&self, print: &GalleryPrint) -> Result<(), CapabilityError> {
        if *self.delete_should_fail.lock().unwrap() {
            return Err(CapabilityError::Other("mock delete failure".into()));
        }
        self.onboard
            .lock()
            .unwrap()
            .retain(|p| p.template != print.template);
        Ok(())
    }

    async fn clear_storage(&self) -> Result<(), CapabilityError> {
        self.clear_storage_calls.fetch_add(1, Ordering::SeqCst);
        self.onboard.lock().unwrap().clear();
        Ok(())
    }

    async fn suspend(&self) -> Result<(), CapabilityError> {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), CapabilityError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
