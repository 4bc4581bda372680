//! The authorization core (`spec.md` §1 "3. The authorization core"):
//! token issuance/lookup/expiry/revocation and the cookie/bearer
//! binding the HTTP layer gates file-system operations on. See
//! `SPEC_FULL.md` module A for the crate split.

pub mod authenticator;
pub mod authorizator;
pub mod authorized;
pub mod crypto;
pub mod token;

pub use authenticator::{Authenticator, AuthenticationError, StaticAuthenticator};
pub use authorizator::{AuthorizationEntry, Authorizator, CustomAuthorizationDataFactory};
pub use authorized::{AuthorizedFileServer, Sharer, StaticMountResolver, UserMountResolver};
pub use crypto::{decrypt_token, encrypt_token, hash_password, verify_password, TokenError, TokenKey};
pub use token::{AccessToken, RefreshToken, ShareToken};
