//! Client-side logic for the `fprintd-verify` authentication helper:
//! picks a device, claims it, runs one verification, and translates the
//! outcome into a process exit code — the shape a PAM module execs and
//! reads stdout/exit-status from.

pub mod proxy;

use std::fmt;
use std::time::Duration;

use futures_util::StreamExt;
use zbus::Connection;

use proxy::{DeviceProxy, ManagerProxy};

#[derive(Debug)]
pub struct VerifyError(pub String);

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for VerifyError {}

impl From<zbus::Error> for VerifyError {
    fn from(e: zbus::Error) -> Self {
        VerifyError(e.to_string())
    }
}

impl From<zbus::fdo::Error> for VerifyError {
    fn from(e: zbus::fdo::Error) -> Self {
        VerifyError(e.to_string())
    }
}

impl From<zbus::names::Error> for VerifyError {
    fn from(e: zbus::names::Error) -> Self {
        VerifyError(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    NoMatch,
    /// The authentication context itself is unusable: a remote session, a
    /// disconnected device, a daemon restart mid-verification, or the
    /// overall timeout expiring. Distinct from a finger simply not
    /// matching — a PAM module should treat this as "can't even try",
    /// not "tried and failed".
    AuthInfoUnavail,
    /// A terminal verify status this helper doesn't recognise.
    AuthErr,
}

impl VerifyOutcome {
    /// Matches the helper_tool family's convention of distinct exit codes
    /// per outcome rather than a bare success/failure boolean.
    pub fn exit_code(self) -> i32 {
        match self {
            VerifyOutcome::Match => 0,
            VerifyOutcome::NoMatch => 1,
            VerifyOutcome::AuthErr => 4,
            VerifyOutcome::AuthInfoUnavail => 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub username: String,
    pub finger: String,
    pub max_attempts: u32,
    pub overall_timeout: Duration,
    /// The remote host this process is authenticating on behalf of, if
    /// any (e.g. from `PAM_RHOST`). A non-empty, non-local value means
    /// this is a remote login and verification must be refused.
    pub remote_host: Option<String>,
    /// True if the calling session otherwise reports itself as remote
    /// (e.g. an `SSH_CONNECTION`/`SSH_CLIENT` environment).
    pub session_reports_remote: bool,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            username: String::new(),
            finger: "any".to_owned(),
            max_attempts: 3,
            overall_timeout: Duration::from_secs(30),
            remote_host: None,
            session_reports_remote: false,
        }
    }
}

/// A fingerprint reader reads a finger physically present at the
/// machine; a session authenticating from elsewhere has nothing for it
/// to read, so verification is refused outright rather than attempted.
fn is_remote_session(options: &VerifyOptions) -> bool {
    if options.session_reports_remote {
        return true;
    }
    match options.remote_host.as_deref() {
        None | Some("") => false,
        Some(host) => host != "localhost" && host != "::1" && host != "127.0.0.1",
    }
}

/// Picks the device with the most prints enrolled for `username` — the
/// one most likely to actually recognise them.
pub async fn select_device(
    connection: &Connection,
    username: &str,
) -> Result<zbus::zvariant::OwnedObjectPath, VerifyError> {
    let manager = ManagerProxy::new(connection).await?;
    let devices = manager.get_devices().await?;
    if devices.is_empty() {
        return Err(VerifyError("no fingerprint devices available".into()));
    }

    let mut best: Option<(zbus::zvariant::OwnedObjectPath, usize)> = None;
    for path in devices {
        let device = DeviceProxy::builder(connection).path(path.clone())?.build().await?;
        let count = device
            .list_enrolled_fingers(username)
            .await
            .map(|fingers| fingers.len())
            .unwrap_or(0);
        if best.as_ref().map(|(_, best_count)| count > *best_count).unwrap_or(true) {
            best = Some((path, count));
        }
    }

    let (path, count) = best.ok_or_else(|| VerifyError("no devices enumerated".into()))?;
    if count == 0 {
        return Err(VerifyError(format!("{username} has no enrolled prints on any device")));
    }
    Ok(path)
}

/// Claims `device_path`, runs verification attempts up to
/// `options.max_attempts` or `options.overall_timeout`, whichever comes
/// first, and releases the claim before returning.
pub async fn run_verify(
    connection: &Connection,
    device_path: zbus::zvariant::OwnedObjectPath,
    options: &VerifyOptions,
) -> Result<VerifyOutcome, VerifyError> {
    if is_remote_session(options) {
        log::warn!("refusing to verify a remote session");
        return Ok(VerifyOutcome::AuthInfoUnavail);
    }

    let device = DeviceProxy::builder(connection).path(device_path)?.build().await?;
    device.claim(&options.username).await?;

    let since = current_service_owner(connection).await.unwrap_or(None);
    let outcome = tokio::select! {
        outcome = run_verify_claimed(&device, options) => outcome,
        owner_change = watch_owner_change(connection, since) => {
            log::warn!("fprintd owner changed mid-verification: {owner_change:?}");
            Ok(VerifyOutcome::AuthInfoUnavail)
        }
    };

    let _ = device.verify_stop().await;
    let _ = device.release().await;

    outcome
}

async fn run_verify_claimed(device: &DeviceProxy<'_>, options: &VerifyOptions) -> Result<VerifyOutcome, VerifyError> {
    let deadline = tokio::time::Instant::now() + options.overall_timeout;

    for attempt in 1..=options.max_attempts {
        if tokio::time::Instant::now() >= deadline {
            log::warn!("overall verification timeout exceeded before attempt {attempt}");
            return Ok(VerifyOutcome::AuthInfoUnavail);
        }

        let mut status_stream = device.receive_verify_status().await?;
        device.verify_start(&options.finger).await?;

        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let terminal = tokio::time::timeout(remaining, async {
            while let Some(signal) = status_stream.next().await {
                let args = signal.args()?;
                if args.done {
                    return Ok::<_, zbus::Error>(Some(args.result.clone()));
                }
            }
            Ok(None)
        })
        .await;

        let _ = device.verify_stop().await;

        match terminal {
            Ok(Ok(Some(result))) => match result.as_str() {
                "verify-match" => return Ok(VerifyOutcome::Match),
                "verify-no-match" => {
                    log::info!("attempt {attempt} did not match, retrying");
                    continue;
                }
                "verify-disconnected" | "verify-unknown-error" => {
                    log::warn!("verification attempt {attempt} could not proceed: {result}");
                    return Ok(VerifyOutcome::AuthInfoUnavail);
                }
                other => {
                    log::warn!("verification attempt {attempt} hit an unrecognised status: {other}");
                    return Ok(VerifyOutcome::AuthErr);
                }
            },
            Ok(Ok(None)) => {
                log::warn!("verify status stream closed unexpectedly");
                return Ok(VerifyOutcome::AuthInfoUnavail);
            }
            Ok(Err(e)) => {
                log::warn!("error reading verify status: {e}");
                return Ok(VerifyOutcome::AuthInfoUnavail);
            }
            Err(_) => {
                log::warn!("attempt {attempt} timed out");
                return Ok(VerifyOutcome::AuthInfoUnavail);
            }
        }
    }

    Ok(VerifyOutcome::NoMatch)
}

/// Resolves the D-Bus owner of `net.reactivated.Fprint` so callers can
/// detect a daemon restart mid-verification.
pub async fn current_service_owner(connection: &Connection) -> Result<Option<String>, VerifyError> {
    let dbus = zbus::fdo::DBusProxy::new(connection).await?;
    let name: zbus::names::BusName = "net.reactivated.Fprint".try_into()?;
    match dbus.get_name_owner(name).await {
        Ok(owner) => Ok(Some(owner.to_string())),
        Err(zbus::fdo::Error::NameHasNoOwner(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Waits for `net.reactivated.Fprint` to change owner (restart, crash, or
/// first appearance) — callers run this concurrently with `run_verify` and
/// abort the attempt if the daemon disappears mid-flight.
pub async fn watch_owner_change(connection: &Connection, since: Option<String>) -> Result<(), VerifyError> {
    let dbus = zbus::fdo::DBusProxy::new(connection).await?;
    let mut changes = dbus.receive_name_owner_changed().await?;
    while let Some(signal) = changes.next().await {
        let args = signal.args()?;
        if args.name.as_str() != "net.reactivated.Fprint" {
            continue;
        }
        let new_owner = args.new_owner.as_ref().map(|o| o.to_string());
        if new_owner != since {
            return Ok(());
        }
    }
    Err(VerifyError("name-owner-changed stream ended".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_match_pam_helper_conventions() {
        assert_eq!(VerifyOutcome::Match.exit_code(), 0);
        assert_eq!(VerifyOutcome::NoMatch.exit_code(), 1);
        assert_eq!(VerifyOutcome::AuthErr.exit_code(), 4);
        assert_eq!(VerifyOutcome::AuthInfoUnavail.exit_code(), 5);
    }

    #[test]
    fn default_options_accept_any_finger() {
        let options = VerifyOptions::default();
        assert_eq!(options.finger, "any");
        assert_eq!(options.max_attempts, 3);
    }

    #[test]
    fn default_options_are_not_remote() {
        assert!(!is_remote_session(&VerifyOptions::default()));
    }

    #[test]
    fn nonempty_non_local_remote_host_is_remote() {
        let options = VerifyOptions { remote_host: Some("10.0.0.5".to_owned()), ..VerifyOptions::default() };
        assert!(is_remote_session(&options));
    }

    #[test]
    fn localhost_remote_host_is_not_remote() {
        let options = VerifyOptions { remote_host: Some("localhost".to_owned()), ..VerifyOptions::default() };
        assert!(!is_remote_session(&options));
    }

    #[test]
    fn session_reporting_remote_is_remote_regardless_of_host() {
        let options = VerifyOptions { session_reports_remote: true, ..VerifyOptions::default() };
        assert!(is_remote_session(&options));
    }
}
