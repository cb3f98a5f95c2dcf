use thiserror::Error;

/// Maximum length for payload snippets embedded in error messages
const MAX_SNIPPET_LENGTH: usize = 200;

pub type Result<T> = std::result::Result<T, RequestError>;

/// Request-layer error surfaced to callers.
///
/// The portal frequently answers failures with HTTP 200 and an ambiguous
/// body, so most variants here are inferred from payload shape rather than
/// status codes. `triggers_relogin` marks the kinds that are treated as a
/// likely session expiry and recovered with a single automatic re-login.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error(
        "no credentials available - pass a member id and password, set \
         KRX_MBR_ID/KRX_PASSWORD, or create a credentials file"
    )]
    CredentialsMissing,

    #[error("request failed with status {status}: {snippet}")]
    Transport { status: u16, snippet: String },

    #[error("response is not JSON (content-type={content_type}): {snippet}")]
    PayloadDecode {
        content_type: String,
        snippet: String,
    },

    #[error("server returned an error payload (errorCode={code})")]
    ServerError { code: String },

    #[error("unexpected payload shape, login may be required: {snippet}")]
    UnexpectedPayload { snippet: String },

    #[error("server returned an authentication-related payload, session has likely expired")]
    AuthExpired,

    #[error("login failed (errorCode={code}): {message}")]
    LoginFailed { code: String, message: String },

    #[error("login did not return a member number: {snippet}")]
    LoginIncomplete { snippet: String },

    #[error("login request failed with status {status}: {snippet}")]
    LoginTransport { status: u16, snippet: String },

    #[error("login response is not JSON (content-type={content_type}): {snippet}")]
    LoginPayload {
        content_type: String,
        snippet: String,
    },

    #[error("invalid request parameters: {message}")]
    InvalidParams { message: String },

    #[error("no active session - call login() first or pass a session explicitly")]
    NoSession,

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl RequestError {
    /// Whether this failure looks like session expiry and is worth one
    /// re-login + retry. Login-protocol and connection-level errors are not.
    pub fn triggers_relogin(&self) -> bool {
        matches!(
            self,
            RequestError::Transport { .. }
                | RequestError::PayloadDecode { .. }
                | RequestError::ServerError { .. }
                | RequestError::UnexpectedPayload { .. }
                | RequestError::AuthExpired
        )
    }
}

/// Truncate a response body for inclusion in an error message.
pub(crate) fn snippet(body: &str) -> String {
    if body.chars().count() <= MAX_SNIPPET_LENGTH {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_SNIPPET_LENGTH).collect();
        format!("{}... (truncated, {} total bytes)", cut, body.len())
    }
}
