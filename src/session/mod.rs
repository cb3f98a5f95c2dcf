//! Authenticated transport sessions.
//!
//! A [`Session`] is a cloneable cookie-bearing HTTP handle. The process-wide
//! "current" session lives in a [`SessionContext`]: callers either pass their
//! own context or use the mutex-guarded [`global_context`]. On-disk sharing
//! across processes is handled by [`store::SessionStore`], idle-expiry
//! prevention by [`keepalive::KeepAlive`].

pub mod cookies;
pub mod keepalive;
pub mod store;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::Client;
use tracing::debug;

use crate::error::Result;
use crate::gateway::USER_AGENT;

pub use cookies::{CookieAttrs, CookieJar};

/// HTTP request timeout in seconds. The portal can be slow under load but
/// anything beyond this is effectively down.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Cookie-bearing transport handle for the portal.
///
/// Clone is cheap - the inner `reqwest::Client` shares its connection pool
/// and the cookie jar is shared behind an `Arc`, so clones observe cookie
/// updates made through each other.
#[derive(Clone)]
pub struct Session {
    client: Client,
    jar: Arc<Mutex<CookieJar>>,
}

impl Session {
    /// Create a fresh session with an empty cookie jar.
    pub fn new() -> Result<Self> {
        Self::with_cookies(CookieJar::new())
    }

    /// Rebuild a session from previously persisted cookies.
    pub fn with_cookies(jar: CookieJar) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            jar: Arc::new(Mutex::new(jar)),
        })
    }

    /// Snapshot of the current cookie jar.
    pub fn cookies(&self) -> CookieJar {
        self.jar.lock().unwrap().clone()
    }

    fn base_headers(referer: &str, origin: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert(header::REFERER, value);
        }
        if let Some(origin) = origin {
            if let Ok(value) = HeaderValue::from_str(origin) {
                headers.insert(header::ORIGIN, value);
            }
        }
        headers
    }

    fn cookie_header(&self) -> Option<HeaderValue> {
        let rendered = self.jar.lock().unwrap().header_value()?;
        HeaderValue::from_str(&rendered).ok()
    }

    fn absorb_cookies(&self, response: &reqwest::Response) {
        let mut jar = self.jar.lock().unwrap();
        for value in response.headers().get_all(header::SET_COOKIE) {
            if let Ok(raw) = value.to_str() {
                jar.store_set_cookie(raw);
            }
        }
    }

    pub(crate) async fn get(&self, url: &str, referer: &str) -> Result<reqwest::Response> {
        let mut request = self.client.get(url).headers(Self::base_headers(referer, None));
        if let Some(cookie) = self.cookie_header() {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request.send().await?;
        self.absorb_cookies(&response);
        debug!(url, status = %response.status(), "GET complete");
        Ok(response)
    }

    pub(crate) async fn post_form(
        &self,
        url: &str,
        referer: &str,
        origin: &str,
        form: &[(String, String)],
    ) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(url)
            .headers(Self::base_headers(referer, Some(origin)))
            .form(form);
        if let Some(cookie) = self.cookie_header() {
            request = request.header(header::COOKIE, cookie);
        }
        let response = request.send().await?;
        self.absorb_cookies(&response);
        debug!(url, status = %response.status(), "POST complete");
        Ok(response)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("cookies", &"[REDACTED]")
            .finish()
    }
}

/// Holder for the shared "current" session.
///
/// Library components take a context explicitly so tests and multi-account
/// callers stay isolated; [`global_context`] provides the process-wide
/// default for the common single-account case. Clone is cheap and clones
/// observe each other's installs.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    active: Arc<Mutex<Option<Session>>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a session as the current one, replacing any previous.
    pub fn install(&self, session: Session) {
        *self.active.lock().unwrap() = Some(session);
    }

    /// Clone of the current session, if one is installed.
    pub fn current(&self) -> Option<Session> {
        self.active.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        *self.active.lock().unwrap() = None;
    }

    pub fn is_active(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }
}

/// Process-wide default session context.
pub fn global_context() -> SessionContext {
    static GLOBAL: OnceLock<SessionContext> = OnceLock::new();
    GLOBAL.get_or_init(SessionContext::new).clone()
}
