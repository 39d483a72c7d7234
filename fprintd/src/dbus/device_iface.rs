//! `net.reactivated.Fprint.Device`: claim/release, enroll/verify
//! lifecycle, and print enumeration/deletion for a single device.

use std::sync::Arc;

use zbus::object_server::SignalEmitter;

use super::{caller_uid, DbusError};
use crate::device::claim::OperationName;
use crate::device::session::{DeviceEvent, DeviceSession};
use crate::error::FprintError;
use crate::finger::Finger;
use crate::identity::resolve_username;
use crate::manager::Manager;
use crate::policy::PolicyGate;

pub struct DeviceIface {
    session: Arc<DeviceSession>,
    manager: Arc<Manager>,
    policy: Arc<PolicyGate>,
}

impl DeviceIface {
    pub fn new(session: Arc<DeviceSession>, manager: Arc<Manager>, policy: Arc<PolicyGate>) -> Self {
        Self { session, manager, policy }
    }

    pub fn session(&self) -> Arc<DeviceSession> {
        self.session.clone()
    }

    /// Resolves the acting user for an operation: an explicit `user`
    /// argument if non-empty, otherwise the caller's own identity, then
    /// runs the claim check followed by the policy check.
    async fn authorize(
        &self,
        connection: &zbus::Connection,
        header: &zbus::message::Header<'_>,
        op: OperationName,
        explicit_user: Option<&str>,
    ) -> Result<String, FprintError> {
        let sender = header
            .sender()
            .ok_or_else(|| FprintError::Internal("method call without a sender".into()))?
            .to_string();
        let caller_username = resolve_username(caller_uid(connection, &sender).await?)?;

        let acting_user = match explicit_user {
            Some(u) if !u.is_empty() => u.to_owned(),
            _ => caller_username.clone(),
        };

        let _guard = self.session.claims.check(&sender, op)?;
        self.policy.authorize(&sender, &caller_username, op, &acting_user).await?;
        Ok(acting_user)
    }
}

#[zbus::interface(name = "net.reactivated.Fprint.Device")]
impl DeviceIface {
    async fn claim(
        &self,
        username: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        if self.manager.is_draining() {
            return Err(FprintError::ClaimDevice.into());
        }
        let sender = header
            .sender()
            .ok_or_else(|| FprintError::Internal("method call without a sender".into()))?
            .to_string();
        let caller_username = resolve_username(caller_uid(connection, &sender).await?)?;
        let target_user = if username.is_empty() { caller_username.clone() } else { username.to_owned() };

        self.session.claims.check(&sender, OperationName::Claim)?;
        self.policy
            .authorize(&sender, &caller_username, OperationName::Claim, &target_user)
            .await?;
        self.session.claim(&sender, &target_user)?;
        self.session.open().await?;
        Ok(())
    }

    async fn release(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let sender = header
            .sender()
            .ok_or_else(|| FprintError::Internal("method call without a sender".into()))?
            .to_string();
        self.session.close().await.ok();
        self.session.release(&sender);
        Ok(())
    }

    #[zbus(name = "VerifyStart")]
    async fn verify_start(
        &self,
        finger_name: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let finger: Finger = finger_name.parse().map_err(FprintError::from)?;
        let acting_user = self
            .authorize(connection, &header, OperationName::VerifyStart, None)
            .await?;
        self.session.verify_start(finger, &acting_user).await?;
        Ok(())
    }

    #[zbus(name = "VerifyStop")]
    async fn verify_stop(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        self.authorize(connection, &header, OperationName::VerifyStop, None).await?;
        self.session.verify_stop().await?;
        Ok(())
    }

    #[zbus(name = "EnrollStart")]
    async fn enroll_start(
        &self,
        finger_name: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let finger: Finger = finger_name.parse().map_err(FprintError::from)?;
        let acting_user = self
            .authorize(connection, &header, OperationName::EnrollStart, None)
            .await?;
        self.session.enroll_start(finger, &acting_user).await?;
        Ok(())
    }

    #[zbus(name = "EnrollStop")]
    async fn enroll_stop(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        self.authorize(connection, &header, OperationName::EnrollStop, None).await?;
        self.session.enroll_stop().await?;
        Ok(())
    }

    #[zbus(name = "ListEnrolledFingers")]
    async fn list_enrolled_fingers(
        &self,
        username: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<Vec<String>, DbusError> {
        let _guard = self.manager.begin_request();
        let acting_user = self
            .authorize(connection, &header, OperationName::ListEnrolledFingers, Some(username))
            .await?;
        let fingers = self.session.list_enrolled_fingers(&acting_user)?;
        Ok(fingers.into_iter().map(|f| f.to_string()).collect())
    }

    #[zbus(name = "DeleteEnrolledFinger")]
    async fn delete_enrolled_finger(
        &self,
        finger_name: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let finger: Finger = finger_name.parse().map_err(FprintError::from)?;
        let acting_user = self
            .authorize(connection, &header, OperationName::DeleteEnrolledFinger, None)
            .await?;
        self.session.delete_enrolled_finger(finger, &acting_user).await?;
        Ok(())
    }

    /// Legacy form: takes the target user explicitly.
    #[zbus(name = "DeleteEnrolledFingers")]
    async fn delete_enrolled_fingers(
        &self,
        username: &str,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let acting_user = self
            .authorize(connection, &header, OperationName::DeleteEnrolledFingers, Some(username))
            .await?;
        self.session.delete_enrolled_fingers(&acting_user).await?;
        Ok(())
    }

    #[zbus(name = "DeleteEnrolledFingers2")]
    async fn delete_enrolled_fingers2(
        &self,
        #[zbus(header)] header: zbus::message::Header<'_>,
        #[zbus(connection)] connection: &zbus::Connection,
    ) -> Result<(), DbusError> {
        let _guard = self.manager.begin_request();
        let acting_user = self
            .authorize(connection, &header, OperationName::DeleteEnrolledFingers2, None)
            .await?;
        self.session.delete_enrolled_fingers(&acting_user).await?;
        Ok(())
    }

    #[zbus(property, name = "name")]
    async fn name(&self) -> String {
        self.session.properties().name
    }

    #[zbus(property, name = "num-enroll-stages")]
    async fn num_enroll_stages(&self) -> i32 {
        self.session.properties().nr_enroll_stages
    }

    #[zbus(property, name = "scan-type")]
    async fn scan_type(&self) -> String {
        self.session.properties().scan_type.to_string()
    }

    #[zbus(property, name = "finger-present")]
    async fn finger_present(&self) -> bool {
        self.session.properties().finger_present
    }

    #[zbus(property, name = "finger-needed")]
    async fn finger_needed(&self) -> bool {
        self.session.properties().finger_needed
    }

    #[zbus(property, name = "busy")]
    async fn busy(&self) -> bool {
        self.session.is_busy()
    }

    #[zbus(signal)]
    pub async fn enroll_status(emitter: &SignalEmitter<'_>, result: &str, done: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn verify_status(emitter: &SignalEmitter<'_>, result: &str, done: bool) -> zbus::Result<()>;

    #[zbus(signal)]
    pub async fn verify_finger_selected(emitter: &SignalEmitter<'_>, finger: &str) -> zbus::Result<()>;
}

/// Forwards `DeviceSession` events onto the object's D-Bus signals for as
/// long as the session lives. Spawned once per registered device object.
pub async fn forward_signals(session: Arc<DeviceSession>, emitter: SignalEmitter<'static>) {
    let mut events = session.subscribe();
    loop {
        match events.recv().await {
            Ok(DeviceEvent::EnrollStatus { result, done }) => {
                let _ = DeviceIface::enroll_status(&emitter, &result, done).await;
            }
            Ok(DeviceEvent::VerifyStatus { result, done }) => {
                let _ = DeviceIface::verify_status(&emitter, &result, done).await;
            }
            Ok(DeviceEvent::VerifyFingerSelected { finger }) => {
                let _ = DeviceIface::verify_finger_selected(&emitter, &finger.to_string()).await;
            }
            Ok(DeviceEvent::BusyChanged { .. }) => {
                let _ = DeviceIface::busy_changed(&emitter).await;
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
        }
    }
}
