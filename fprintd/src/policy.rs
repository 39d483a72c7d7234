//! Policy Gate: maps each operation to a permission, resolves whether
//! the caller is acting on their own identity or someone else's, and
//! defers the actual yes/no to a pluggable `PolicyBackend`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use zvariant::Value;

use crate::device::claim::OperationName;
use crate::error::FprintError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyError {
    Denied,
    BackendUnavailable(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Denied => write!(f, "authorization denied"),
            PolicyError::BackendUnavailable(msg) => write!(f, "authorization backend unavailable: {msg}"),
        }
    }
}

impl std::error::Error for PolicyError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permission {
    Verify,
    Enroll,
}

/// Every permission `op` must be granted before it is authorized. A claim
/// is good for either verifying or enrolling afterwards, so it alone
/// requires both up front; every other op requires exactly one.
fn required_permissions(op: OperationName) -> &'static [Permission] {
    use OperationName::*;
    match op {
        Claim => &[Permission::Verify, Permission::Enroll],
        Release | VerifyStart | VerifyStop | ListEnrolledFingers => &[Permission::Verify],
        EnrollStart | EnrollStop | DeleteEnrolledFinger | DeleteEnrolledFingers
        | DeleteEnrolledFingers2 => &[Permission::Enroll],
    }
}

/// The polkit action ID for a single permission, split by whether the
/// caller is acting on their own enrolled prints or someone else's.
fn action_id(permission: Permission, acting_for_self: bool) -> &'static str {
    match (permission, acting_for_self) {
        (Permission::Verify, true) => "net.reactivated.fprint.device.verify",
        (Permission::Verify, false) => "net.reactivated.fprint.device.verify.nonactive",
        (Permission::Enroll, true) => "net.reactivated.fprint.device.enroll",
        (Permission::Enroll, false) => "net.reactivated.fprint.device.enroll.nonactive",
    }
}

/// An opaque authorization backend; polkit is an external collaborator.
/// `PolkitBackend` below is the real-world implementation; tests supply
/// their own trivial backends.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    async fn is_authorized(&self, caller_unique_name: &str, action_id: &str) -> Result<bool, PolicyError>;
}

pub struct PolicyGate {
    backend: Arc<dyn PolicyBackend>,
}

impl PolicyGate {
    pub fn new(backend: Arc<dyn PolicyBackend>) -> Self {
        Self { backend }
    }

    /// Authorize `op` from `caller_unique_name`, acting on `acting_user`.
    /// Run after the claim check passes.
    pub async fn authorize(
        &self,
        caller_unique_name: &str,
        caller_user: &str,
        op: OperationName,
        acting_user: &str,
    ) -> Result<(), FprintError> {
        let acting_for_self = caller_user == acting_user;
        for &permission in required_permissions(op) {
            let action = action_id(permission, acting_for_self);
            if !self.backend.is_authorized(caller_unique_name, action).await? {
                return Err(FprintError::PermissionDenied);
            }
        }
        Ok(())
    }
}

/// Talks to `org.freedesktop.PolicyKit1.Authority` over the system bus.
/// Polkit is an external collaborator; this is the thin seam to it.
pub struct PolkitBackend {
    connection: zbus::Connection,
}

impl PolkitBackend {
    pub async fn connect() -> Result<Self, PolicyError> {
        let connection = zbus::Connection::system()
            .await
            .map_err(|e| PolicyError::BackendUnavailable(e.to_string()))?;
        Ok(Self { connection })
    }
}

#[zbus::proxy(
    interface = "org.freedesktop.PolicyKit1.Authority",
    default_service = "org.freedesktop.PolicyKit1",
    default_path = "/org/freedesktop/PolicyKit1/Authority"
)]
trait Authority {
    #[allow(clippy::too_many_arguments)]
    fn check_authorization(
        &self,
        subject: (&str, HashMap<&str, Value<'_>>),
        action_id: &str,
        details: HashMap<&str, &str>,
        flags: u32,
        cancellation_id: &str,
    ) -> zbus::Result<(bool, bool, HashMap<String, String>)>;
}

#[async_trait]
impl PolicyBackend for PolkitBackend {
    async fn is_authorized(&self, caller_unique_name: &str, action_id_str: &str) -> Result<bool, PolicyError> {
        let proxy = AuthorityProxy::new(&self.connection)
            .await
            .map_err(|e| PolicyError::BackendUnavailable(e.to_string()))?;

        let mut subject_details = HashMap::new();
        subject_details.insert("name", Value::from(caller_unique_name));
        let subject = ("system-bus-name", subject_details);

        let (is_authorized, _is_challenge, _details) = proxy
            .check_authorization(subject, action_id_str, HashMap::new(), 0, "")
            .await
            .map_err(|e| PolicyError::BackendUnavailable(e.to_string()))?;

        Ok(is_authorized)
    }
}

/// Grants every request. Used for `--no-polkit`-style local setups and in
/// tests that don't exercise authorization itself.
pub struct AllowAllBackend;

#[async_trait]
impl PolicyBackend for AllowAllBackend {
    async fn is_authorized(&self, _caller_unique_name: &str, _action_id: &str) -> Result<bool, PolicyError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyBackend;

    #[async_trait]
    impl PolicyBackend for DenyBackend {
        async fn is_authorized(&self, _caller_unique_name: &str, _action_id: &str) -> Result<bool, PolicyError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn allow_all_backend_authorizes_everything() {
        let gate = PolicyGate::new(Arc::new(AllowAllBackend));
        let result = gate
            .authorize(":1.1", "alice", OperationName::VerifyStart, "alice")
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn deny_backend_maps_to_permission_denied() {
        let gate = PolicyGate::new(Arc::new(DenyBackend));
        let err = gate
            .authorize(":1.1", "alice", OperationName::EnrollStart, "alice")
            .await
            .unwrap_err();
        assert_eq!(err, FprintError::PermissionDenied);
    }

    #[test]
    fn acting_on_another_user_selects_the_nonactive_action() {
        assert_eq!(action_id(Permission::Verify, false), "net.reactivated.fprint.device.verify.nonactive");
        assert_eq!(action_id(Permission::Enroll, true), "net.reactivated.fprint.device.enroll");
    }

    struct VerifyOnlyBackend;

    #[async_trait]
    impl PolicyBackend for VerifyOnlyBackend {
        async fn is_authorized(&self, _caller_unique_name: &str, action_id: &str) -> Result<bool, PolicyError> {
            Ok(!action_id.contains("enroll"))
        }
    }

    #[tokio::test]
    async fn claim_requires_both_verify_and_enroll_permission() {
        let gate = PolicyGate::new(Arc::new(VerifyOnlyBackend));
        let err = gate
            .authorize(":1.1", "alice", OperationName::Claim, "alice")
            .await
            .unwrap_err();
        assert_eq!(err, FprintError::PermissionDenied);

        let gate = PolicyGate::new(Arc::new(AllowAllBackend));
        let result = gate.authorize(":1.1", "alice", OperationName::Claim, "alice").await;
        assert!(result.is_ok());
    }
}
