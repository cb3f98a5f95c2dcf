//! Resilient client for the KRX Data Marketplace.
//!
//! The portal behind `data.krx.co.kr` is login-gated, rate-limited, caps
//! date-ranged requests at a 730-day window, and signals failure by shape
//! rather than status: HTML behind a 200, empty bodies, or an `output`
//! string mentioning "logout". This crate wraps all of that into one
//! reliable read path:
//!
//! - [`auth::Authenticator`] runs the login protocol (credential
//!   resolution, duplicate-session override, strict success validation)
//!   and publishes the session both in-process and to disk;
//! - [`session::store::SessionStore`] shares one authenticated session
//!   across processes behind an advisory file lock;
//! - [`session::keepalive::KeepAlive`] extends the session in the
//!   background so it survives idle periods;
//! - [`fetch::Fetcher`] issues data reads with transparent date-window
//!   chunking, payload classification, and a single automatic
//!   re-login + retry on auth expiry.
//!
//! The convenience functions at the crate root operate on the process-wide
//! session context and the environment-resolved store, mirroring the
//! common single-account setup:
//!
//! ```no_run
//! # async fn demo() -> krx_gate::Result<()> {
//! use krx_gate::{Fetcher, LoginOptions, RequestParams};
//!
//! krx_gate::login(LoginOptions::default()).await?;
//!
//! let mut params = RequestParams::new();
//! params.insert("strtDd".into(), "20200101".into());
//! params.insert("endDd".into(), "20240601".into());
//! params.insert("isuCd".into(), "KR7005930003".into());
//!
//! let data = Fetcher::new()
//!     .read("dbms/MDC/STAT/standard/MDCSTAT01701", &params)
//!     .await?;
//! println!("{} rows", data["output"].as_array().map(Vec::len).unwrap_or(0));
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod session;

use std::time::Duration;

pub use auth::{Authenticator, Credentials, LoginOptions, LoginOutcome};
pub use config::{auto_login_enabled, set_auto_login, AutoLoginPolicy};
pub use error::{RequestError, Result};
pub use fetch::{Endpoint, Fetcher, RequestParams};
pub use gateway::Gateway;
pub use session::keepalive::KeepAlive;
pub use session::store::SessionStore;
pub use session::{global_context, Session, SessionContext};

fn default_authenticator() -> Authenticator {
    Authenticator::new(Gateway::default(), SessionStore::from_env())
}

/// Log in against the production portal, installing the session into the
/// process-wide context and the environment-resolved store.
pub async fn login(opts: LoginOptions) -> Result<LoginOutcome> {
    default_authenticator().login(&global_context(), opts).await
}

/// Extend the process-wide current session.
pub async fn extend_session() -> Result<serde_json::Value> {
    default_authenticator()
        .extend_session(&global_context(), None)
        .await
}

/// Start a keep-alive worker for the process-wide current session.
pub fn start_keepalive(interval: Option<Duration>) -> KeepAlive {
    let mut keepalive = KeepAlive::new(default_authenticator(), global_context());
    if let Some(interval) = interval {
        keepalive = keepalive.interval(interval);
    }
    keepalive.start();
    keepalive
}

/// Delete the on-disk session record at the environment-resolved location.
pub fn clear_session_file() {
    SessionStore::from_env().clear();
}
