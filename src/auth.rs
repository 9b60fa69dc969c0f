//! Command authentication
//!
//! A command carries a unix timestamp and a token derived from the shared
//! secret: `base64(sha256("<secret>-<timestamp>"))`. A command is accepted
//! when the token matches and the timestamp is within the replay window of
//! the current time, in either direction.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::warn;

/// Default replay window in seconds
pub const REPLAY_WINDOW_SECS: u64 = 120;

/// Compute the token for a timestamp
pub fn sign(secret: &str, timestamp: i64) -> String {
    let digest = Sha256::digest(format!("{}-{}", secret, timestamp).as_bytes());
    STANDARD.encode(digest)
}

/// Validate a command token against the default replay window
pub fn validate(timestamp: i64, token: &str, secret: &str, now: i64) -> bool {
    validate_with_window(timestamp, token, secret, now, REPLAY_WINDOW_SECS)
}

pub fn validate_with_window(
    timestamp: i64,
    token: &str,
    secret: &str,
    now: i64,
    window_secs: u64,
) -> bool {
    if now.abs_diff(timestamp) > window_secs {
        return false;
    }
    constant_time_compare(&sign(secret, timestamp), token)
}

/// Constant-time string comparison to prevent timing attacks
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

/// Validates commands against the configured secret and the wall clock
#[derive(Clone)]
pub struct Authenticator {
    secret: String,
    window_secs: u64,
}

impl Authenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            window_secs: REPLAY_WINDOW_SECS,
        }
    }

    pub fn with_window(mut self, window_secs: u64) -> Self {
        self.window_secs = window_secs;
        self
    }

    /// Check a command at an explicit time
    pub fn check_at(&self, timestamp: i64, token: &str, now: i64) -> bool {
        let valid = validate_with_window(timestamp, token, &self.secret, now, self.window_secs);
        if !valid {
            // Neither the token nor the failing check is logged
            warn!(timestamp, now, "Command authentication failed");
        }
        valid
    }

    /// Check a command against the current time
    pub fn check(&self, timestamp: i64, token: &str) -> bool {
        self.check_at(timestamp, token, Utc::now().timestamp())
    }
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("secret", &"<redacted>")
            .field("window_secs", &self.window_secs)
            .finish()
    }
}
