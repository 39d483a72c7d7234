//! Device Capability Adapter: a uniform surface over an opaque driver.
//! The real daemon would plug a libfprint binding in behind this trait;
//! the driver itself is an external collaborator, so this module only
//! defines the seam plus a deterministic in-memory backend used for
//! tests (and as a development fallback).

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::finger::Finger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    Press,
    Swipe,
}

impl std::fmt::Display for ScanType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScanType::Press => "press",
            ScanType::Swipe => "swipe",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureClass {
    Cold,
    Warm,
    Hot,
}

/// Observable, possibly-changing device properties.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceProperties {
    pub name: String,
    pub scan_type: ScanType,
    pub nr_enroll_stages: i32,
    pub finger_present: bool,
    pub finger_needed: bool,
    pub temperature: TemperatureClass,
}

/// Feature bits exposed by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    pub has_identify: bool,
    pub has_storage: bool,
    pub has_storage_list: bool,
}

/// A driver error indicating the scan should simply be repeated
/// ("Retry-class error", GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    SwipeTooShort,
    FingerNotCentered,
    RemoveAndRetry,
    RetryScan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    Retry(RetryReason),
    Cancelled,
    NotOpen,
    NotSupported,
    DataFull,
    DataNotFound,
    Other(String),
}

impl std::fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CapabilityError::Retry(r) => write!(f, "retry: {r:?}"),
            CapabilityError::Cancelled => write!(f, "cancelled"),
            CapabilityError::NotOpen => write!(f, "device not open"),
            CapabilityError::NotSupported => write!(f, "operation not supported"),
            CapabilityError::DataFull => write!(f, "device storage full"),
            CapabilityError::DataNotFound => write!(f, "print not found on device"),
            CapabilityError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for CapabilityError {}

/// Progress of an in-flight enrollment, delivered in driver order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollProgress {
    StagePassed(u32),
    Retry(RetryReason),
}

/// A print handed to `enroll`/`identify`, reduced to what the capability
/// layer needs: an opaque template plus enough identity to match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryPrint {
    pub finger: Finger,
    pub username: String,
    pub template: Vec<u8>,
}

pub struct EnrollSinks {
    pub progress: mpsc::UnboundedSender<EnrollProgress>,
}

/// Mid-flight match notification, fired before the call resolves.
/// `matched` already folds in "driver returned a print AND the token was
/// not cancelled".
pub struct VerifySinks {
    pub match_event: mpsc::UnboundedSender<bool>,
}

pub enum IdentifyOutcome {
    Matched { index: usize },
    NoMatch,
}

/// Uniform interface over the opaque fingerprint driver.
#[async_trait]
pub trait DeviceCapability: Send + Sync {
    fn properties(&self) -> DeviceProperties;
    fn features(&self) -> Features;
    fn driver(&self) -> &str;
    fn device_id(&self) -> &str;

    async fn open(&self) -> Result<(), CapabilityError>;
    async fn close(&self) -> Result<(), CapabilityError>;

    /// Runs one full enrollment (all stages). Resolves with the captured
    /// template on success.
    async fn enroll(
        &self,
        finger: Finger,
        cancel: CancellationToken,
        sinks: EnrollSinks,
    ) -> Result<Vec<u8>, CapabilityError>;

    async fn verify(
        &self,
        print: &GalleryPrint,
        cancel: CancellationToken,
        sinks: VerifySinks,
    ) -> Result<bool, CapabilityError>;

    async fn identify(
        &self,
        gallery: &[GalleryPrint],
        cancel: CancellationToken,
        sinks: VerifySinks,
    ) -> Result<IdentifyOutcome, CapabilityError>;

    /// Prints currently stored on the device itself, if `has_storage_list`.
    async fn list_prints(&self) -> Result<Vec<GalleryPrint>, CapabilityError>;

    async fn delete_print(&self, print: &GalleryPrint) -> Result<(), CapabilityError>;
    async fn clear_storage(&self) -> Result<(), CapabilityError>;

    async fn suspend(&self) -> Result<(), CapabilityError>;
    async fn resume(&self) -> Result<(), CapabilityError>;
}
