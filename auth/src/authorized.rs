//! The authorization-gated adapters over [`fileport_tvfs`] (`spec.md`
//! §4.9 "authorized file server and sharer"): a [`FileServer`] rooted at
//! the caller's own mount tree, and a share-link variant rooted at a
//! subtree named by a `share_token`. Both reuse [`Authorizator`]'s
//! bearer/refresh lookup rather than gating access themselves.
//!
//! A real deployment resolves a username to its mount tree through the
//! user/group store `SPEC_FULL.md` module D puts out of scope, and
//! reconfigures a live authorization's mount when that record changes
//! (`spec.md` §4.9 "a generation counter ... triggers reconfiguration").
//! [`UserMountResolver`] stands in for that store; because this crate
//! carries no such record to change out from under a live authorization,
//! the per-authorization [`FileServer`] is resolved once and cached for
//! the authorization's lifetime rather than generation-checked on every
//! request.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64_STD;
use base64::Engine;

use fileport_http::file_server::{FileServer, FileServerOptions};
use fileport_http::handler::{RequestBody, TransactionHandler};
use fileport_http::transaction::SharedTransaction;
use fileport_tvfs::LocalFilesystem;

use crate::authorizator::{AuthorizationEntry, Authorizator, CustomAuthorizationDataFactory};
use crate::crypto::{decrypt_token, verify_password, TokenKey};
use crate::token::ShareToken;

/// Maps a username onto the native directory backing its mount tree.
/// Narrow stand-in for the mount-tree/user-database machinery `spec.md`
/// puts out of scope (`SPEC_FULL.md` module D).
pub trait UserMountResolver: Send + Sync {
    fn resolve(&self, username: &str) -> Option<PathBuf>;
}

/// A fixed username-to-directory table, for tests and single-tenant
/// deployments.
pub struct StaticMountResolver {
    roots: HashMap<String, PathBuf>,
}

impl StaticMountResolver {
    pub fn new(roots: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
        }
    }
}

impl UserMountResolver for StaticMountResolver {
    fn resolve(&self, username: &str) -> Option<PathBuf> {
        self.roots.get(username).cloned()
    }
}

/// Builds the per-authorization [`FileServer`] an [`AuthorizationEntry`]
/// caches as its custom data: the resolved user root, narrowed by the
/// refresh token's scoping path when one is set (share links always set
/// one; a plain password grant never does).
struct MountFactory<R> {
    mounts: R,
    options: FileServerOptions,
}

#[async_trait::async_trait]
impl<R: UserMountResolver> CustomAuthorizationDataFactory for MountFactory<R> {
    type Data = FileServer<LocalFilesystem>;

    async fn create(&self, entry: &AuthorizationEntry) -> Self::Data {
        let mut root = self
            .mounts
            .resolve(&entry.session_user())
            .unwrap_or_else(|| PathBuf::from("/nonexistent-mount"));
        if let Some(scoped) = &entry.refresh_token.path {
            root.push(scoped.trim_start_matches('/'));
        }
        FileServer::new(LocalFilesystem::new(root), self.options.clone())
    }
}

/// `spec.md` §4.9 "authorized file server": gates [`FileServer`] behind
/// [`Authorizator::get_authorization_data`], rooted at the bearer's own
/// mount tree. Mounted by the router wherever the deployment serves
/// "my files" from.
pub struct AuthorizedFileServer<R> {
    authorizator: Arc<Authorizator>,
    factory: MountFactory<R>,
}

impl<R: UserMountResolver> AuthorizedFileServer<R> {
    pub fn new(authorizator: Arc<Authorizator>, mounts: R, options: FileServerOptions) -> Self {
        Self {
            authorizator,
            factory: MountFactory { mounts, options },
        }
    }
}

#[async_trait::async_trait]
impl<R: UserMountResolver + 'static> TransactionHandler for AuthorizedFileServer<R> {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let Some((_entry, file_server)) = self.authorizator.get_authorization_data(&txn, &self.factory).await else {
            return;
        };
        file_server.handle_transaction(txn, body).await;
    }
}

/// `spec.md` §4.9 "sharer": the first path segment is a `share_token`
/// (`spec.md` §3) rather than a bearer header; an optional password
/// hash on the token gates access behind HTTP Basic auth instead of the
/// `/token` endpoint. Delegates to [`FileServer`] rooted at the token's
/// embedded refresh token's scoping path.
pub struct Sharer<R> {
    authorizator: Arc<Authorizator>,
    share_key: TokenKey,
    factory: MountFactory<R>,
}

impl<R: UserMountResolver> Sharer<R> {
    pub fn new(authorizator: Arc<Authorizator>, share_key: TokenKey, mounts: R, options: FileServerOptions) -> Self {
        Self {
            authorizator,
            share_key,
            factory: MountFactory { mounts, options },
        }
    }

    /// Splits `/<share_token>/rest...` into the token and the remainder
    /// of the path (re-anchored to `/`, possibly empty).
    fn split_share_segment(path: &str) -> Option<(&str, &str)> {
        let rest = path.strip_prefix('/')?;
        Some(rest.split_once('/').unwrap_or((rest, "")))
    }

    fn check_basic_auth(txn: &SharedTransaction, hash: &str) -> bool {
        let header = {
            let guard = txn.lock();
            guard.request.headers.get_str("authorization").to_string()
        };
        let Some(encoded) = header.strip_prefix("Basic ") else {
            return false;
        };
        let Ok(decoded) = BASE64_STD.decode(encoded.trim()) else {
            return false;
        };
        let Ok(text) = String::from_utf8(decoded) else {
            return false;
        };
        let Some((_user, password)) = text.split_once(':') else {
            return false;
        };
        verify_password(password, hash)
    }

    fn send_not_found(txn: &SharedTransaction) {
        let mut guard = txn.lock();
        guard.responder.send_status(404, "Not Found");
        guard.responder.send_end();
    }

    fn demand_basic_auth(txn: &SharedTransaction) {
        let mut guard = txn.lock();
        guard.responder.send_status(401, "Unauthorized");
        guard.responder.send_header("WWW-Authenticate", "Basic realm=\"share\"");
        guard.responder.send_end();
    }
}

#[async_trait::async_trait]
impl<R: UserMountResolver + 'static> TransactionHandler for Sharer<R> {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let path = txn.lock().request.path.clone();
        let Some((token_segment, tail)) = Self::split_share_segment(&path) else {
            return Self::send_not_found(&txn);
        };

        let share: ShareToken = match decrypt_token(&self.share_key, token_segment) {
            Ok(share) => share,
            Err(_) => return Self::send_not_found(&txn),
        };

        if let Some(hash) = &share.password_hash {
            if !Self::check_basic_auth(&txn, hash) {
                return Self::demand_basic_auth(&txn);
            }
        }

        let Some((_entry, file_server)) = self.authorizator.authorize(&share.refresh_token, &self.factory).await
        else {
            return Self::send_not_found(&txn);
        };

        {
            let mut guard = txn.lock();
            if !guard.request.headers.contains("x-fz-int-original-path") {
                let original = guard.request.path.clone();
                guard.request.headers.set("X-FZ-INT-Original-Path", original);
            }
            guard.request.path = if tail.is_empty() { "/".to_string() } else { format!("/{tail}") };
        }

        file_server.handle_transaction(txn, body).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::StaticAuthenticator;
    use crate::crypto::{encrypt_token, hash_password};
    use crate::token::{AccessToken, RefreshToken};
    use fileport_http::consumer::{ConsumerEvent, MessageConsumer};
    use fileport_http::responder::Responder;
    use fileport_http::transaction::{self, Transaction};
    use std::time::{Duration, SystemTime};

    async fn dispatch(h: &dyn TransactionHandler, raw: &str) -> SharedTransaction {
        let mut buf = bytes::BytesMut::from(raw.as_bytes());
        let mut consumer = MessageConsumer::new("127.0.0.1:1".parse().unwrap(), true);
        let request = match consumer.feed(&mut buf).unwrap() {
            ConsumerEvent::HeadersReady(r) => r,
            _ => panic!("fixture request is incomplete"),
        };
        let version = request.version;
        let txn = transaction::shared(Transaction::new(request, Responder::new(version, false, true)));

        let mut write_half = tokio::io::sink();
        let mut read_half = tokio::io::empty();
        let mut body = RequestBody::new(
            &mut read_half,
            &mut write_half,
            &mut buf,
            &mut consumer,
            version,
            Duration::from_secs(1),
        );
        h.handle_transaction(txn.clone(), &mut body).await;
        txn
    }

    fn resolver(dir: &std::path::Path) -> StaticMountResolver {
        StaticMountResolver::new([("alice".to_string(), dir.to_path_buf())])
    }

    #[tokio::test]
    async fn authorized_file_server_lists_the_bearers_own_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

        let authorizator = Arc::new(Authorizator::new(Arc::new(StaticAuthenticator::new([(
            "alice".to_string(),
            "correct".to_string(),
        )]))));
        let grant = dispatch(
            authorizator.as_ref(),
            "POST /token HTTP/1.1\r\nHost: t\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 51\r\n\r\ngrant_type=password&username=alice&password=correct",
        )
        .await;
        let body_text = {
            let mut guard = grant.lock();
            let mut out = Vec::new();
            loop {
                let mut scratch = bytes::BytesMut::new();
                match guard.responder.add_to_buffer(&mut scratch).unwrap() {
                    fileport_kernel::AddOutcome::Produced => out.extend_from_slice(&scratch),
                    fileport_kernel::AddOutcome::EndOfStream => {
                        out.extend_from_slice(&scratch);
                        break;
                    }
                    other => panic!("unexpected: {other:?}"),
                }
            }
            String::from_utf8(out).unwrap()
        };
        let json: serde_json::Value =
            serde_json::from_str(body_text.split("\r\n\r\n").nth(1).unwrap()).unwrap();
        let access_token = json["access_token"].as_str().unwrap();

        let server = AuthorizedFileServer::new(
            authorizator.clone(),
            resolver(dir.path()),
            FileServerOptions {
                can_list_dir: true,
                ..Default::default()
            },
        );

        let raw = format!("GET / HTTP/1.1\r\nHost: t\r\nAuthorization: Bearer {access_token}\r\n\r\n");
        let txn = dispatch(&server, &raw).await;
        assert_eq!(txn.lock().responder.status(), 200);
    }

    #[tokio::test]
    async fn authorized_file_server_without_a_bearer_is_unauthorized() {
        let dir = tempfile::tempdir().unwrap();
        let authorizator = Arc::new(Authorizator::new(Arc::new(StaticAuthenticator::new([]))));
        let server = AuthorizedFileServer::new(authorizator, resolver(dir.path()), FileServerOptions::default());
        let txn = dispatch(&server, "GET / HTTP/1.1\r\nHost: t\r\n\r\n").await;
        assert_eq!(txn.lock().responder.status(), 401);
    }

    fn share_refresh_token(path: Option<&str>) -> RefreshToken {
        RefreshToken {
            access_token: AccessToken { id: 1, refresh_id: 1 },
            username: "alice".to_string(),
            path: path.map(str::to_string),
            expires_at: SystemTime::now() + Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn sharer_serves_the_scoped_subtree_without_a_password() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shared")).unwrap();
        std::fs::write(dir.path().join("shared/hello.txt"), b"hi").unwrap();

        let authorizator = Arc::new(Authorizator::new(Arc::new(StaticAuthenticator::new([]))));
        let share_key = TokenKey::generate();
        let share = ShareToken {
            refresh_token: share_refresh_token(Some("/shared")),
            password_hash: None,
        };
        let token = encrypt_token(&share_key, &share);

        let sharer = Sharer::new(authorizator, share_key, resolver(dir.path()), FileServerOptions::default());
        let raw = format!("GET /{token}/hello.txt HTTP/1.1\r\nHost: t\r\n\r\n");
        let txn = dispatch(&sharer, &raw).await;
        assert_eq!(txn.lock().responder.status(), 200);
    }

    #[tokio::test]
    async fn sharer_demands_basic_auth_when_the_token_carries_a_password() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hi").unwrap();

        let authorizator = Arc::new(Authorizator::new(Arc::new(StaticAuthenticator::new([]))));
        let share_key = TokenKey::generate();
        let share = ShareToken {
            refresh_token: share_refresh_token(None),
            password_hash: Some(hash_password("secret")),
        };
        let token = encrypt_token(&share_key, &share);

        let sharer = Sharer::new(authorizator, share_key, resolver(dir.path()), FileServerOptions::default());
        let raw = format!("GET /{token}/hello.txt HTTP/1.1\r\nHost: t\r\n\r\n");
        let txn = dispatch(&sharer, &raw).await;
        assert_eq!(txn.lock().responder.status(), 401);

        let credentials = BASE64_STD.encode("anyone:secret");
        let raw = format!(
            "GET /{token}/hello.txt HTTP/1.1\r\nHost: t\r\nAuthorization: Basic {credentials}\r\n\r\n"
        );
        let txn = dispatch(&sharer, &raw).await;
        assert_eq!(txn.lock().responder.status(), 200);
    }

    #[tokio::test]
    async fn sharer_rejects_an_undecryptable_token() {
        let dir = tempfile::tempdir().unwrap();
        let authorizator = Arc::new(Authorizator::new(Arc::new(StaticAuthenticator::new([]))));
        let sharer = Sharer::new(
            authorizator,
            TokenKey::generate(),
            resolver(dir.path()),
            FileServerOptions::default(),
        );
        let txn = dispatch(&sharer, "GET /not-a-real-token/hello.txt HTTP/1.1\r\nHost: t\r\n\r\n").await;
        assert_eq!(txn.lock().responder.status(), 404);
    }
}
