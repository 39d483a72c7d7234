//! Authentication helper invoked by a PAM module: claims a fingerprint
//! device on the caller's behalf, runs one verification, and reports the
//! outcome through its exit code.

use clap::Parser;
use fprintd_verify::{current_service_owner, run_verify, select_device, VerifyOptions, VerifyOutcome};

const EXIT_MATCH: i32 = 0;
const EXIT_NO_MATCH: i32 = 1;
const EXIT_ERROR: i32 = 2;
const EXIT_NO_DEVICE: i32 = 3;
const EXIT_AUTH_ERR: i32 = 4;
const EXIT_AUTHINFO_UNAVAIL: i32 = 5;

#[derive(Debug, Parser)]
#[command(name = "fprintd-verify", version, about = "Drives a single fingerprint verification for login")]
struct Cli {
    /// User to verify. Defaults to the invoking process's own username.
    #[arg(long)]
    user: Option<String>,

    /// Finger to verify, or "any" to accept the first matching enrolled print.
    #[arg(long, default_value = "any")]
    finger: String,

    /// Number of verification attempts before giving up.
    #[arg(long, default_value_t = 3)]
    max_attempts: u32,

    /// Overall time budget across all attempts, in seconds.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Verbose logging.
    #[arg(long)]
    debug: bool,
}

/// `PAM_RHOST`, when set by the calling PAM stack, names the remote host
/// a login originated from; empty or absent means a local login.
fn remote_host_from_env() -> Option<String> {
    std::env::var("PAM_RHOST").ok().filter(|h| !h.is_empty())
}

/// `SSH_CONNECTION`/`SSH_CLIENT` are set by sshd in the session
/// environment for the duration of a remote login.
fn session_reports_remote() -> bool {
    std::env::var_os("SSH_CONNECTION").is_some() || std::env::var_os("SSH_CLIENT").is_some()
}

fn current_username() -> Option<String> {
    let uid = unsafe { libc::geteuid() };
    let passwd = unsafe { libc::getpwuid(uid) };
    if passwd.is_null() {
        return None;
    }
    let name = unsafe { std::ffi::CStr::from_ptr((*passwd).pw_name) };
    name.to_str().ok().map(str::to_owned)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(if cli.debug { "debug" } else { "warn" }))
        .init();

    let username = match cli.user.clone().or_else(current_username) {
        Some(u) => u,
        None => {
            eprintln!("fprintd-verify: could not resolve a username to verify");
            std::process::exit(EXIT_ERROR);
        }
    };

    let connection = match zbus::Connection::system().await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fprintd-verify: could not connect to the system bus: {e}");
            std::process::exit(EXIT_ERROR);
        }
    };

    let owner = current_service_owner(&connection).await.unwrap_or(None);
    if owner.is_none() {
        eprintln!("fprintd-verify: fprintd is not running");
        std::process::exit(EXIT_NO_DEVICE);
    }

    let device_path = match select_device(&connection, &username).await {
        Ok(path) => path,
        Err(e) => {
            eprintln!("fprintd-verify: {e}");
            std::process::exit(EXIT_NO_DEVICE);
        }
    };

    let options = VerifyOptions {
        username,
        finger: cli.finger,
        max_attempts: cli.max_attempts,
        overall_timeout: std::time::Duration::from_secs(cli.timeout_secs),
        remote_host: remote_host_from_env(),
        session_reports_remote: session_reports_remote(),
    };

    let outcome = match run_verify(&connection, device_path, &options).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("fprintd-verify: verification failed: {e}");
            std::process::exit(EXIT_ERROR);
        }
    };

    match outcome {
        VerifyOutcome::Match => {
            println!("fprintd-verify: fingerprint matched");
            std::process::exit(EXIT_MATCH);
        }
        VerifyOutcome::NoMatch => {
            eprintln!("fprintd-verify: no matching fingerprint within the attempt budget");
            std::process::exit(EXIT_NO_MATCH);
        }
        VerifyOutcome::AuthErr => {
            eprintln!("fprintd-verify: verification aborted by an unrecognised error");
            std::process::exit(EXIT_AUTH_ERR);
        }
        VerifyOutcome::AuthInfoUnavail => {
            eprintln!("fprintd-verify: authentication information unavailable");
            std::process::exit(EXIT_AUTHINFO_UNAVAIL);
        }
    }
}
