//! Login protocol and session extension.
//!
//! The portal's login is a two-step dance: a priming GET against the login
//! page to seed baseline cookies, then a form POST. Failures come back as
//! HTTP 200 with an error-code field - including `CD001`, which despite
//! living in the error field means "success". A `CD011` duplicate-session
//! rejection can be overridden by resubmitting with `skipDup=Y`.

use serde_json::Value;
use tracing::{debug, info};

use crate::auth::credentials;
use crate::error::{snippet, RequestError, Result};
use crate::fetch::payload;
use crate::gateway::Gateway;
use crate::session::store::{SessionStore, DEFAULT_TTL_MINUTES};
use crate::session::{Session, SessionContext};

/// Error code the portal embeds on success ("정상"). Cleared, not raised.
const SUCCESS_MARKER_CODE: &str = "CD001";

/// Error code for "this account already has an active session".
const DUPLICATE_SESSION_CODE: &str = "CD011";

/// Options for one login attempt.
#[derive(Debug, Default)]
pub struct LoginOptions {
    /// Member id; resolved from the environment or credentials file if unset.
    pub member_id: Option<String>,
    /// Password; resolved like `member_id` if unset.
    pub password: Option<String>,
    /// Reuse an existing transport session instead of creating a fresh one.
    pub session: Option<Session>,
    /// Skip installing the result as the context's current session.
    pub skip_install: bool,
    /// Resubmit with `skipDup=Y` when the account is already logged in
    /// elsewhere.
    pub allow_dup_login: bool,
}

/// A verified, active session plus the raw success payload.
#[derive(Debug)]
pub struct LoginOutcome {
    pub session: Session,
    /// Member number the portal returned (`MBR_NO`).
    pub member_id: String,
    pub payload: Value,
}

/// Produces verified sessions from credentials.
#[derive(Debug, Clone)]
pub struct Authenticator {
    gateway: Gateway,
    store: SessionStore,
}

impl Authenticator {
    pub fn new(gateway: Gateway, store: SessionStore) -> Self {
        Self { gateway, store }
    }

    /// Execute the login protocol.
    ///
    /// On success the session is installed into `ctx` (unless
    /// `skip_install`) and persisted to the session store for other
    /// processes; persistence failure is not a login failure.
    pub async fn login(&self, ctx: &SessionContext, opts: LoginOptions) -> Result<LoginOutcome> {
        let creds = credentials::resolve(opts.member_id.as_deref(), opts.password.as_deref())?;

        let session = match opts.session {
            Some(session) => session,
            None => Session::new()?,
        };

        // Priming GET: only exists to seed cookies, so a failure here is
        // tolerated and the POST decides.
        if let Err(e) = session
            .get(&self.gateway.login_page_url(), &self.gateway.login_referer())
            .await
        {
            debug!(error = %e, "login page priming request failed");
        }

        let mut form: Vec<(String, String)> = vec![
            ("mbrId".into(), creds.member_id.clone()),
            ("pw".into(), creds.password.clone()),
            ("mbrNm".into(), String::new()),
            ("telNo".into(), String::new()),
            ("di".into(), String::new()),
            ("certType".into(), String::new()),
        ];

        let mut data = self.submit_login(&session, &form).await?;

        if let Some(code) = cleared_login_error(&data) {
            if code == DUPLICATE_SESSION_CODE && opts.allow_dup_login {
                debug!("duplicate session reported, resubmitting with skipDup");
                form.push(("skipDup".into(), "Y".into()));
                data = self.submit_login(&session, &form).await?;
                if let Some(code) = cleared_login_error(&data) {
                    return Err(RequestError::LoginFailed {
                        message: payload::login_error_message(&data),
                        code,
                    });
                }
            } else {
                return Err(RequestError::LoginFailed {
                    message: payload::login_error_message(&data),
                    code,
                });
            }
        }

        // Absence of an error code is not proof of success; the member
        // number is the strict marker.
        let Some(member_id) = member_number(&data) else {
            return Err(RequestError::LoginIncomplete {
                snippet: snippet(&data.to_string()),
            });
        };

        if !opts.skip_install {
            ctx.install(session.clone());
        }
        self.store
            .save(&session, Some(&member_id), DEFAULT_TTL_MINUTES);

        info!(member_id = %creds.member_id, "login succeeded");
        Ok(LoginOutcome {
            session,
            member_id,
            payload: data,
        })
    }

    async fn submit_login(&self, session: &Session, form: &[(String, String)]) -> Result<Value> {
        let response = session
            .post_form(
                &self.gateway.login_api_url(),
                &self.gateway.login_referer(),
                self.gateway.base(),
                form,
            )
            .await?;

        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let body = response.text().await.unwrap_or_default();

        if status != 200 {
            return Err(RequestError::LoginTransport {
                status,
                snippet: snippet(&body),
            });
        }

        payload::decode_body(&body).ok_or_else(|| RequestError::LoginPayload {
            content_type,
            snippet: snippet(&body),
        })
    }

    /// Call the session-extension endpoint to push back idle expiry.
    ///
    /// Uses the given session, else the context's current one. Success is
    /// HTTP 200 with a JSON body carrying no error code.
    pub async fn extend_session(
        &self,
        ctx: &SessionContext,
        session: Option<&Session>,
    ) -> Result<Value> {
        let session = match session {
            Some(session) => session.clone(),
            None => ctx.current().ok_or(RequestError::NoSession)?,
        };

        let response = session
            .post_form(
                &self.gateway.extend_session_url(),
                &self.gateway.extend_session_referer(),
                self.gateway.base(),
                &[],
            )
            .await?;

        let status = response.status().as_u16();
        let content_type = content_type_of(&response);
        let body = response.text().await.unwrap_or_default();

        if status != 200 {
            return Err(RequestError::Transport {
                status,
                snippet: snippet(&body),
            });
        }

        // Some environments answer with an HTML page here; that means the
        // session was not extended.
        if !content_type.contains("json") {
            return Err(RequestError::PayloadDecode {
                content_type,
                snippet: snippet(&body),
            });
        }

        let data = payload::decode_body(&body).ok_or_else(|| RequestError::PayloadDecode {
            content_type,
            snippet: snippet(&body),
        })?;

        if let Some(code) = payload::error_code(&data) {
            return Err(RequestError::ServerError { code });
        }

        debug!("session extended");
        Ok(data)
    }
}

/// Login error code with the embedded success marker cleared.
fn cleared_login_error(data: &Value) -> Option<String> {
    payload::login_error_code(data).filter(|code| code != SUCCESS_MARKER_CODE)
}

/// Member number under either spelling, as a string.
fn member_number(data: &Value) -> Option<String> {
    for key in ["MBR_NO", "mbrNo"] {
        match data.get(key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

fn content_type_of(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_lowercase()
}
