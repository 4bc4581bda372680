//! The authorization core's HTTP surface (`spec.md` §4.8): the
//! `/token`/`/revoke` endpoints, the in-memory authorization map, and
//! the bearer/cookie lookup that authorization-gated handlers call
//! into. Grounded on `server/authorizator.cpp`.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use serde::Serialize;

use fileport_http::body::StringConsumer;
use fileport_http::handler::{RequestBody, TransactionHandler};
use fileport_http::headers::make_cookie;
use fileport_http::transaction::SharedTransaction;

use crate::authenticator::Authenticator;
use crate::crypto::{decrypt_token, encrypt_token, TokenKey};
use crate::token::{AccessToken, RefreshToken};

const MAX_FORM_BODY: usize = 16 * 1024;
const DEFAULT_ACCESS_TTL: Duration = Duration::from_secs(5 * 60);
const DEFAULT_REFRESH_TTL: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// One live authorization (`spec.md` §3 "Authorization"): the refresh
/// token it was minted alongside, the session user it authenticates
/// as, and a type-erased per-handler data map (`spec.md` §4.9
/// "custom_authorization_data_factory").
pub struct AuthorizationEntry {
    pub refresh_token: RefreshToken,
    session_user: Mutex<String>,
    custom_data: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl AuthorizationEntry {
    pub fn session_user(&self) -> String {
        self.session_user.lock().clone()
    }
}

/// Allocates the per-handler data an [`AuthorizationEntry`] lazily
/// attaches to itself (`spec.md` §4.9): a per-authorization `TvfsEngine`
/// scoped to the session user's mount tree is the motivating instance.
/// Takes the whole entry, not just the username, so a factory can also
/// read the refresh token's scoping path (share links narrow their
/// mount to `refresh_token.path`).
#[async_trait::async_trait]
pub trait CustomAuthorizationDataFactory: Send + Sync {
    type Data: Send + Sync + 'static;

    async fn create(&self, entry: &AuthorizationEntry) -> Self::Data;
}

/// `spec.md` §4.8: exchanges credentials for tokens, looks up active
/// authorizations by bearer, refreshes, and revokes. Mounted by the
/// router at whatever prefix the deployment picks (`spec.md` "Endpoints
/// served ... mounted at an arbitrary prefix by the router").
pub struct Authorizator {
    access_key: TokenKey,
    refresh_key: TokenKey,
    authenticator: Arc<dyn Authenticator>,
    authorizations: Arc<Mutex<HashMap<u64, Arc<AuthorizationEntry>>>>,
    next_id: AtomicU64,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl Authorizator {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            access_key: TokenKey::generate(),
            refresh_key: TokenKey::generate(),
            authenticator,
            authorizations: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            access_ttl: DEFAULT_ACCESS_TTL,
            refresh_ttl: DEFAULT_REFRESH_TTL,
        }
    }

    pub fn with_ttls(mut self, access_ttl: Duration, refresh_ttl: Duration) -> Self {
        self.access_ttl = access_ttl;
        self.refresh_ttl = refresh_ttl;
        self
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Number of live authorizations; used by tests and by the admin
    /// surface this crate doesn't otherwise implement.
    pub fn authorization_count(&self) -> usize {
        self.authorizations.lock().len()
    }

    /// Mints a fresh access/refresh token pair, inserts the
    /// authorization under the access id, and schedules its expiry
    /// (`spec.md` §8 "after `expires_in` seconds without refresh the
    /// entry is absent from the map").
    fn mint(&self, username: &str, path: Option<String>) -> (Arc<AuthorizationEntry>, AccessToken, RefreshToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let access_token = AccessToken { id, refresh_id: id };
        let refresh_token = RefreshToken {
            access_token,
            username: username.to_string(),
            path,
            expires_at: SystemTime::now() + self.refresh_ttl,
        };
        let entry = Arc::new(AuthorizationEntry {
            refresh_token: refresh_token.clone(),
            session_user: Mutex::new(username.to_string()),
            custom_data: Mutex::new(HashMap::new()),
        });
        self.authorizations.lock().insert(id, entry.clone());
        self.schedule_expiry(id);
        (entry, access_token, refresh_token)
    }

    fn schedule_expiry(&self, id: u64) {
        let authorizations = self.authorizations.clone();
        let ttl = self.access_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if authorizations.lock().remove(&id).is_some() {
                tracing::debug!(id, "authorization expired");
            }
        });
    }

    /// Reuses an existing authorization's identity when the refreshed
    /// access id is still live, updating only its `session_user`;
    /// otherwise mints a new one from the refresh token's claims
    /// (`SPEC_FULL.md` §C.12).
    fn reuse_or_mint_on_refresh(&self, refresh: &RefreshToken) -> (Arc<AuthorizationEntry>, AccessToken, RefreshToken) {
        let existing = self.authorizations.lock().get(&refresh.access_token.id).cloned();
        match existing {
            Some(entry) => {
                *entry.session_user.lock() = refresh.username.clone();
                let access_token = entry.refresh_token.access_token;
                let refresh_token = entry.refresh_token.clone();
                (entry, access_token, refresh_token)
            }
            None => self.mint(&refresh.username, refresh.path.clone()),
        }
    }

    /// Resolves a bearer/token form value, following the `cookie:<name>`
    /// indirection to the named request cookie (`spec.md` glossary
    /// "Bearer").
    fn resolve_indirect_value(&self, txn: &SharedTransaction, value: &str) -> Option<String> {
        match value.strip_prefix("cookie:") {
            Some(cookie_name) => {
                let guard = txn.lock();
                guard.request.headers.get_cookie(cookie_name, guard.request.is_secure)
            }
            None => Some(value.to_string()),
        }
    }

    /// Extracts and validates the bearer on `txn` (`spec.md` §4.8
    /// "get_authorization_data"). `None` means there is no live
    /// authorization for whatever bearer was presented (including "no
    /// bearer at all").
    fn lookup_bearer(&self, txn: &SharedTransaction) -> Option<Arc<AuthorizationEntry>> {
        let header = {
            let guard = txn.lock();
            guard.request.headers.get_str("authorization").to_string()
        };
        let bearer = header.strip_prefix("Bearer ")?.trim();
        let raw = self.resolve_indirect_value(txn, bearer)?;
        let access: AccessToken = decrypt_token(&self.access_key, &raw).ok()?;
        let entry = self.authorizations.lock().get(&access.id).cloned()?;
        if entry.refresh_token.access_token != access {
            return None;
        }
        Some(entry)
    }

    /// `spec.md` §4.8 "get_authorization_data": looks up the caller's
    /// authorization and lazily allocates `factory`'s per-handler data
    /// on it. On failure, sends `401` with `WWW-Authenticate: Bearer`
    /// and returns `None`.
    pub async fn get_authorization_data<F: CustomAuthorizationDataFactory>(
        &self,
        txn: &SharedTransaction,
        factory: &F,
    ) -> Option<(Arc<AuthorizationEntry>, Arc<F::Data>)> {
        let Some(entry) = self.lookup_bearer(txn) else {
            let mut guard = txn.lock();
            guard.responder.send_status(401, "Unauthorized");
            guard.responder.send_header("WWW-Authenticate", "Bearer");
            guard.responder.send_end();
            return None;
        };
        let data = self.custom_data_for(&entry, factory).await;
        Some((entry, data))
    }

    async fn custom_data_for<F: CustomAuthorizationDataFactory>(
        &self,
        entry: &Arc<AuthorizationEntry>,
        factory: &F,
    ) -> Arc<F::Data> {
        let key = TypeId::of::<F::Data>();
        let existing = entry.custom_data.lock().get(&key).cloned();
        match existing {
            Some(any) => any.downcast::<F::Data>().expect("custom data keyed by its own TypeId"),
            None => {
                let created: Arc<F::Data> = Arc::new(factory.create(entry).await);
                entry.custom_data.lock().insert(key, created.clone());
                created
            }
        }
    }

    /// Out-of-band authorization from a raw refresh token (`spec.md`
    /// §4.8 "authorize(refresh_token, ...)"), used by the share-link
    /// handler (`spec.md` §4.9 "sharer"). Possessing a valid, unexpired
    /// refresh token is itself the credential for a share link; no
    /// authenticator round-trip happens here.
    pub async fn authorize<F: CustomAuthorizationDataFactory>(
        &self,
        refresh_token: &RefreshToken,
        factory: &F,
    ) -> Option<(Arc<AuthorizationEntry>, Arc<F::Data>)> {
        if let Some(entry) = self.authorizations.lock().get(&refresh_token.access_token.id).cloned() {
            let data = self.custom_data_for(&entry, factory).await;
            return Some((entry, data));
        }
        if refresh_token.is_expired(SystemTime::now()) {
            return None;
        }
        let (entry, _access, _refresh) = self.mint(&refresh_token.username, refresh_token.path.clone());
        let data = self.custom_data_for(&entry, factory).await;
        Some((entry, data))
    }

    fn send_status_only(&self, txn: &SharedTransaction, status: u16, reason: &'static str) {
        let mut guard = txn.lock();
        guard.responder.send_status(status, reason);
        guard.responder.send_end();
    }

    /// Every failure path here is the OAuth2 `{"error":..., "description":...}`
    /// shape at `400` (`spec.md` §7 "authorization endpoint failures").
    fn send_oauth_error(&self, txn: &SharedTransaction, code: &str, description: &str) {
        #[derive(Serialize)]
        struct OAuthError<'a> {
            error: &'a str,
            description: &'a str,
        }
        let json = serde_json::to_string(&OAuthError { error: code, description })
            .unwrap_or_else(|_| "{\"error\":\"server_error\"}".to_string());
        let mut guard = txn.lock();
        guard.responder.send_status(400, "Bad Request");
        guard.responder.send_header("Content-Type", "application/json");
        guard.responder.send_body_str(json);
    }

    async fn read_form_body(&self, txn: &SharedTransaction, body: &mut RequestBody<'_>) -> Option<HashMap<String, String>> {
        let content_type = {
            let guard = txn.lock();
            guard.request.headers.get_str("content-type").to_ascii_lowercase()
        };
        if !content_type.starts_with("application/x-www-form-urlencoded") {
            self.send_status_only(txn, 415, "Unsupported Media Type");
            return None;
        }

        let mut sink = StringConsumer::new(MAX_FORM_BODY);
        if body.receive_into(&mut sink).await.is_err() {
            self.send_oauth_error(txn, "invalid_request", "failed to read request body");
            return None;
        }
        Some(
            url::form_urlencoded::parse(&sink.into_inner())
                .into_owned()
                .collect(),
        )
    }

    async fn handle_token(&self, txn: &SharedTransaction, body: &mut RequestBody<'_>) {
        let is_secure = txn.lock().request.is_secure;
        if !is_secure {
            return self.send_status_only(txn, 403, "Forbidden");
        }
        let Some(form) = self.read_form_body(txn, body).await else {
            return;
        };

        match form.get("grant_type").map(String::as_str) {
            Some("password") => self.do_token_password(txn, &form, is_secure).await,
            Some("refresh_token") => self.do_token_refresh(txn, &form, is_secure).await,
            _ => self.send_oauth_error(txn, "unsupported_grant_type", "grant_type must be password or refresh_token"),
        }
    }

    async fn do_token_password(&self, txn: &SharedTransaction, form: &HashMap<String, String>, is_secure: bool) {
        let (Some(username), Some(password)) = (form.get("username"), form.get("password")) else {
            return self.send_oauth_error(txn, "invalid_request", "username and password are required");
        };
        if self.authenticator.authenticate(username, password).await.is_err() {
            return self.send_oauth_error(txn, "invalid_grant", "invalid username or password");
        }
        let (_entry, access_token, refresh_token) = self.mint(username, None);
        self.send_token_response(txn, &access_token, &refresh_token, form.get("cookie_path").cloned(), is_secure);
    }

    async fn do_token_refresh(&self, txn: &SharedTransaction, form: &HashMap<String, String>, is_secure: bool) {
        let Some(raw) = form.get("refresh_token") else {
            return self.send_oauth_error(txn, "invalid_request", "refresh_token is required");
        };
        let Some(raw) = self.resolve_indirect_value(txn, raw) else {
            return self.send_oauth_error(txn, "invalid_grant", "refresh token cookie is missing");
        };
        let refresh: RefreshToken = match decrypt_token(&self.refresh_key, &raw) {
            Ok(r) => r,
            Err(_) => return self.send_oauth_error(txn, "invalid_grant", "refresh token is invalid"),
        };
        if refresh.is_expired(SystemTime::now()) {
            return self.send_oauth_error(txn, "invalid_grant", "refresh token has expired");
        }

        let (_entry, access_token, refresh_token) = self.reuse_or_mint_on_refresh(&refresh);
        self.send_token_response(txn, &access_token, &refresh_token, form.get("cookie_path").cloned(), is_secure);
    }

    fn send_token_response(
        &self,
        txn: &SharedTransaction,
        access_token: &AccessToken,
        refresh_token: &RefreshToken,
        cookie_path: Option<String>,
        is_secure: bool,
    ) {
        #[derive(Serialize)]
        struct TokenResponse<'a> {
            token_type: &'a str,
            expires_in: u64,
            access_token: &'a str,
            refresh_token: &'a str,
        }

        let access_str = encrypt_token(&self.access_key, access_token);
        let refresh_str = encrypt_token(&self.refresh_key, refresh_token);
        let json = serde_json::to_string(&TokenResponse {
            token_type: "bearer",
            expires_in: self.access_ttl.as_secs(),
            access_token: &access_str,
            refresh_token: &refresh_str,
        })
        .expect("token response always serializes");

        let mut guard = txn.lock();
        guard.responder.send_status(200, "OK");
        guard.responder.send_header("Content-Type", "application/json");
        if let Some(cookie_path) = cookie_path.filter(|p| !p.is_empty()) {
            let revoke_path = sibling_revoke_path(&cookie_path);
            for path in [cookie_path.as_str(), revoke_path.as_str()] {
                guard
                    .responder
                    .send_cookie(make_cookie("access_token", &access_str, path, is_secure, true, self.access_ttl));
                guard
                    .responder
                    .send_cookie(make_cookie("refresh_token", &refresh_str, path, is_secure, true, self.refresh_ttl));
            }
        }
        guard.responder.send_body_str(json);
    }

    async fn handle_revoke(&self, txn: &SharedTransaction, body: &mut RequestBody<'_>) {
        let is_secure = txn.lock().request.is_secure;
        if !is_secure {
            return self.send_status_only(txn, 403, "Forbidden");
        }
        let Some(form) = self.read_form_body(txn, body).await else {
            return;
        };

        let Some(token_field) = form.get("token") else {
            return self.send_oauth_error(txn, "invalid_request", "token is required");
        };
        let hint = form.get("token_type_hint").map(String::as_str).unwrap_or("refresh_token");
        let from_cookie = token_field.starts_with("cookie:");

        if let Some(raw) = self.resolve_indirect_value(txn, token_field) {
            let access_id = if hint == "access_token" {
                decrypt_token::<AccessToken>(&self.access_key, &raw).ok().map(|a| a.id)
            } else {
                decrypt_token::<RefreshToken>(&self.refresh_key, &raw).ok().map(|r| r.access_token.id)
            };
            if let Some(id) = access_id {
                self.authorizations.lock().remove(&id);
            }
        }

        self.send_revocation_success(txn, from_cookie, is_secure);
    }

    fn send_revocation_success(&self, txn: &SharedTransaction, clear_cookies: bool, is_secure: bool) {
        let mut guard = txn.lock();
        guard.responder.send_status(200, "OK");
        if clear_cookies {
            let original = guard.request.headers.get_str("x-fz-int-original-path").to_string();
            let base = original
                .rsplit_once('/')
                .map(|(parent, _)| format!("{parent}/"))
                .unwrap_or_else(|| "/".to_string());
            let revoke_path = sibling_revoke_path(&base);
            for path in [base.as_str(), revoke_path.as_str()] {
                guard
                    .responder
                    .send_cookie(make_cookie("access_token", "", path, is_secure, true, Duration::ZERO));
                guard
                    .responder
                    .send_cookie(make_cookie("refresh_token", "", path, is_secure, true, Duration::ZERO));
            }
        }
        guard.responder.send_end();
    }
}

fn sibling_revoke_path(cookie_path: &str) -> String {
    if cookie_path.ends_with('/') {
        format!("{cookie_path}revoke")
    } else {
        format!("{cookie_path}/revoke")
    }
}

#[async_trait::async_trait]
impl TransactionHandler for Authorizator {
    async fn handle_transaction(&self, txn: SharedTransaction, body: &mut RequestBody<'_>) {
        let (method, path) = {
            let guard = txn.lock();
            (guard.request.method.clone(), guard.request.path.clone())
        };
        match path.as_str() {
            "/token" if method.eq_ignore_ascii_case("POST") => self.handle_token(&txn, body).await,
            "/token" => self.send_status_only(&txn, 405, "Method Not Allowed"),
            "/revoke" if method.eq_ignore_ascii_case("POST") => self.handle_revoke(&txn, body).await,
            "/revoke" => self.send_status_only(&txn, 405, "Method Not Allowed"),
            _ => self.send_status_only(&txn, 404, "Not Found"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authenticator::StaticAuthenticator;
    use fileport_http::consumer::{ConsumerEvent, MessageConsumer};
    use fileport_http::responder::Responder;
    use fileport_http::transaction::{self, Transaction};

    fn authorizator() -> Authorizator {
        Authorizator::new(Arc::new(StaticAuthenticator::new([(
            "alice".to_string(),
            "correct".to_string(),
        )])))
        .with_ttls(Duration::from_secs(1), Duration::from_secs(3600))
    }

    /// Parses `raw` (a full request line through body) with a real
    /// [`MessageConsumer`] and dispatches it to `h`, exactly as
    /// `crate::session::run_http_session` would.
    async fn dispatch(h: &Authorizator, raw: &str, is_secure: bool) -> SharedTransaction {
        let mut buf = bytes::BytesMut::from(raw.as_bytes());
        let mut consumer = MessageConsumer::new("127.0.0.1:1".parse().unwrap(), is_secure);
        let request = match consumer.feed(&mut buf).unwrap() {
            ConsumerEvent::HeadersReady(request) => request,
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

    fn token_request(body: &str) -> String {
        format!(
            "POST /token HTTP/1.1\r\nHost: t\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn revoke_request(body: &str, cookie: Option<&str>) -> String {
        let cookie_header = cookie.map(|c| format!("Cookie: {c}\r\n")).unwrap_or_default();
        format!(
            "POST /revoke HTTP/1.1\r\nHost: t\r\n{cookie_header}Content-Type: application/x-www-form-urlencoded\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
    }

    fn raw_response(txn: &SharedTransaction) -> String {
        let mut guard = txn.lock();
        let mut bytes = Vec::new();
        loop {
            let mut scratch = bytes::BytesMut::new();
            match guard.responder.add_to_buffer(&mut scratch).unwrap() {
                fileport_kernel::AddOutcome::Produced => bytes.extend_from_slice(&scratch),
                fileport_kernel::AddOutcome::EndOfStream => {
                    bytes.extend_from_slice(&scratch);
                    break;
                }
                other => panic!("unexpected outcome draining test response: {other:?}"),
            }
        }
        String::from_utf8(bytes).unwrap()
    }

    fn json_body(txn: &SharedTransaction) -> serde_json::Value {
        let text = raw_response(txn);
        let body = text.split("\r\n\r\n").nth(1).unwrap_or("");
        serde_json::from_str(body).unwrap()
    }

    #[tokio::test]
    async fn password_grant_issues_a_bearer_token_in_the_authorization_map() {
        let auth = authorizator();
        let txn = dispatch(&auth, &token_request("grant_type=password&username=alice&password=correct"), true).await;
        assert_eq!(txn.lock().responder.status(), 200);
        assert_eq!(auth.authorization_count(), 1);

        let json = json_body(&txn);
        assert_eq!(json["token_type"], "bearer");
        assert!(json["access_token"].as_str().unwrap().len() > 0);

        let access: AccessToken = decrypt_token(&auth.access_key, json["access_token"].as_str().unwrap()).unwrap();
        assert!(auth.authorizations.lock().contains_key(&access.id));
    }

    #[tokio::test]
    async fn password_grant_with_wrong_password_is_rejected() {
        let auth = authorizator();
        let txn = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=wrong"),
            true,
        )
        .await;
        assert_eq!(txn.lock().responder.status(), 400);
        assert_eq!(auth.authorization_count(), 0);
        assert_eq!(json_body(&txn)["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn token_endpoint_over_plaintext_is_forbidden() {
        let auth = authorizator();
        let txn = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct"),
            false,
        )
        .await;
        assert_eq!(txn.lock().responder.status(), 403);
    }

    #[tokio::test]
    async fn cookie_path_grant_emits_four_set_cookie_headers() {
        let auth = authorizator();
        let txn = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct&cookie_path=/"),
            true,
        )
        .await;
        assert_eq!(txn.lock().responder.status(), 200);
        let text = raw_response(&txn);
        assert_eq!(text.matches("Set-Cookie:").count(), 4);
        assert!(text.contains("Path=/revoke"));
    }

    #[tokio::test]
    async fn revoke_removes_the_authorization_and_clears_cookies() {
        let auth = authorizator();
        let grant = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct"),
            true,
        )
        .await;
        let refresh_token = json_body(&grant)["refresh_token"].as_str().unwrap().to_string();
        assert_eq!(auth.authorization_count(), 1);

        let revoke = dispatch(&auth, &revoke_request(&format!("token={refresh_token}"), None), true).await;
        assert_eq!(revoke.lock().responder.status(), 200);
        assert_eq!(auth.authorization_count(), 0);
    }

    #[tokio::test]
    async fn revoke_via_cookie_pseudo_value_reads_the_named_cookie() {
        let auth = authorizator();
        let grant = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct"),
            true,
        )
        .await;
        let refresh_token = json_body(&grant)["refresh_token"].as_str().unwrap().to_string();

        let revoke = dispatch(
            &auth,
            &revoke_request("token=cookie:refresh_token", Some(&format!("refresh_token={refresh_token}"))),
            true,
        )
        .await;
        assert_eq!(revoke.lock().responder.status(), 200);
        assert_eq!(auth.authorization_count(), 0);
    }

    #[tokio::test]
    async fn bearer_lookup_succeeds_for_a_freshly_minted_authorization() {
        let auth = authorizator();
        let grant = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct"),
            true,
        )
        .await;
        let access_token = json_body(&grant)["access_token"].as_str().unwrap().to_string();

        struct NoopFactory;
        #[async_trait::async_trait]
        impl CustomAuthorizationDataFactory for NoopFactory {
            type Data = String;
            async fn create(&self, entry: &AuthorizationEntry) -> String {
                entry.session_user()
            }
        }

        let raw = format!(
            "GET /files HTTP/1.1\r\nHost: t\r\nAuthorization: Bearer {access_token}\r\n\r\n"
        );
        let mut buf = bytes::BytesMut::from(raw.as_bytes());
        let mut consumer = MessageConsumer::new("127.0.0.1:1".parse().unwrap(), true);
        let request = match consumer.feed(&mut buf).unwrap() {
            ConsumerEvent::HeadersReady(r) => r,
            _ => panic!("incomplete fixture"),
        };
        let version = request.version;
        let txn = transaction::shared(Transaction::new(request, Responder::new(version, false, true)));

        let data = auth.get_authorization_data(&txn, &NoopFactory).await;
        let (entry, data) = data.expect("bearer should resolve");
        assert_eq!(entry.session_user(), "alice");
        assert_eq!(*data, "alice");
    }

    #[tokio::test]
    async fn bearer_lookup_fails_after_expiry() {
        tokio::time::pause();
        let auth = authorizator();
        let grant = dispatch(
            &auth,
            &token_request("grant_type=password&username=alice&password=correct"),
            true,
        )
        .await;
        assert_eq!(auth.authorization_count(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        tokio::task::yield_now().await;
        assert_eq!(auth.authorization_count(), 0);
        let _ = grant;
    }
}
