use dotenvy::dotenv;
use reqwest::Client;

pub mod config;
pub mod constants;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod security;

pub use config::EngineConfig;
pub use error::{EngineError, ErrorKind, Result};

pub fn dotenv_init() {
    let _ = dotenv();
}

pub fn http_client() -> Client {
    Client::new()
}

/// Resolve a uid to a username from the host's passwd database, falling
/// back to the synthetic `user_<uid>` name required by `UserResolutionFailure`
/// handling (see `error::ErrorKind::UserResolutionFailure`).
pub fn resolve_username(uid: u32) -> String {
    users_db::uid_to_name(uid).unwrap_or_else(|| format!("user_{uid}"))
}

/// Resolve a username to a uid from the host's passwd database.
pub fn resolve_uid(name: &str) -> Option<u32> {
    users_db::name_to_uid(name)
}

/// Thin wrapper around libc's passwd lookups, isolated so the rest of the
/// engine only ever sees `Option`, never an errno.
mod users_db {
    use std::ffi::{CStr, CString};

    pub fn uid_to_name(uid: u32) -> Option<String> {
        unsafe {
            let pw = libc::getpwuid(uid as libc::uid_t);
            if pw.is_null() {
                return None;
            }
            let name = CStr::from_ptr((*pw).pw_name).to_string_lossy().into_owned();
            Some(name)
        }
    }

    pub fn name_to_uid(name: &str) -> Option<u32> {
        let cname = CString::new(name).ok()?;
        unsafe {
            let pw = libc::getpwnam(cname.as_ptr());
            if pw.is_null() {
                return None;
            }
            Some((*pw).pw_uid as u32)
        }
    }
}
