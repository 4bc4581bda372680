//! Token plaintexts (`spec.md` §3 "Token types", §6 "Token binary
//! format"). Each type is archived with [`crate::crypto`] under a
//! different key; only the wire-visible shapes live here.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// `(id, refresh_id)`, encrypted with the authorizator's key
/// (`spec.md` §3 "access_token"). Short-lived.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessToken {
    pub id: u64,
    pub refresh_id: u64,
}

/// The access token it was minted alongside, the owning username, an
/// optional scoping path (share links narrow this), and an expiry
/// (`spec.md` §3 "refresh_token"). Long-lived; encrypted with the
/// token manager's key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    pub access_token: AccessToken,
    pub username: String,
    pub path: Option<String>,
    pub expires_at: SystemTime,
}

impl RefreshToken {
    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

/// A refresh token plus an optional password hash, encrypted for
/// sharing URLs (`spec.md` §3 "share_token").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareToken {
    pub refresh_token: RefreshToken,
    pub password_hash: Option<String>,
}
