//! The external authenticator seam (`spec.md` §1 "external collaborator"
//! list, §4.8 "runs authentication against the external authenticator").
//! User/group storage is explicitly out of scope (`SPEC_FULL.md` §D); this
//! crate only needs the narrow trait the authorizator calls into, plus a
//! trivial in-memory implementation good enough to exercise the token
//! lifecycle end to end.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthenticationError {
    #[error("invalid username or password")]
    InvalidCredentials,
}

/// Credentials check, decoupled from how users/groups are actually
/// stored (`SPEC_FULL.md` §D names that storage a Non-goal).
#[async_trait::async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthenticationError>;
}

/// A fixed username/password table, useful for demos and tests; not a
/// substitute for the real user-database collaborator `spec.md` §1
/// scopes out.
pub struct StaticAuthenticator {
    credentials: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new(credentials: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            credentials: credentials.into_iter().collect(),
        }
    }
}

#[async_trait::async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> Result<(), AuthenticationError> {
        match self.credentials.get(username) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(AuthenticationError::InvalidCredentials),
        }
    }
}
