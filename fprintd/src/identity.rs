//! UID → username resolution via the system's passwd database.
//!
//! `getpwuid` is not reentrant, but the daemon's event loop is
//! single-threaded by design, so a bare call here never races with
//! another lookup the way it would on a multi-threaded executor.

use std::ffi::CStr;

use crate::error::FprintError;

pub fn resolve_username(uid: u32) -> Result<String, FprintError> {
    // Safety: `getpwuid` returns a pointer into a static buffer owned by
    // libc, valid until the next passwd/group lookup on this thread. We
    // copy every field we need out of it before returning.
    let passwd = unsafe { libc::getpwuid(uid as libc::uid_t) };
    if passwd.is_null() {
        return Err(FprintError::Internal(format!("no passwd entry for uid {uid}")));
    }
    let name = unsafe { CStr::from_ptr((*passwd).pw_name) };
    name.to_str()
        .map(str::to_owned)
        .map_err(|_| FprintError::Internal(format!("non-utf8 username for uid {uid}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_root() {
        let name = resolve_username(0).unwrap();
        assert_eq!(name, "root");
    }

    #[test]
    fn rejects_unknown_uid() {
        assert!(resolve_username(u32::MAX - 1).is_err());
    }
}
