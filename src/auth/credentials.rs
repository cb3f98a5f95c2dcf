//! Credential resolution.
//!
//! Credentials come from, in priority order: explicit arguments, environment
//! variables, a JSON credentials file. Each source is a strategy that may
//! supply either field; the chain fills in whatever is still missing.
//! Credentials are only ever held in memory - the session store persists
//! cookies, never passwords.

use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::error::{RequestError, Result};

/// Primary and legacy environment variable names for the member id.
pub const ENV_MEMBER_ID: &str = "KRX_MBR_ID";
pub const ENV_MEMBER_ID_ALT: &str = "KRX_ID";

/// Primary and legacy environment variable names for the password.
pub const ENV_PASSWORD: &str = "KRX_PASSWORD";
pub const ENV_PASSWORD_ALT: &str = "KRX_PW";

/// Environment variable overriding the credentials file location.
pub const ENV_CREDENTIALS_FILE: &str = "KRX_CREDENTIALS_FILE";

/// Default credentials file name under the config directory.
const CREDENTIALS_FILE: &str = "krx_credentials.json";

/// Directory under the user config dir used by default.
const APP_DIR: &str = "krx-session";

/// A resolved member id + password pair.
#[derive(Clone)]
pub struct Credentials {
    pub member_id: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("member_id", &self.member_id)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// One step in the resolution waterfall. A source reports what it knows;
/// "not found" is an answer, not an error.
pub trait CredentialSource {
    fn member_id(&self) -> Option<String>;
    fn password(&self) -> Option<String>;
}

/// Credentials passed directly by the caller.
pub struct ExplicitSource {
    member_id: Option<String>,
    password: Option<String>,
}

impl ExplicitSource {
    pub fn new(member_id: Option<&str>, password: Option<&str>) -> Self {
        Self {
            member_id: member_id.map(str::to_string),
            password: password.map(str::to_string),
        }
    }
}

impl CredentialSource for ExplicitSource {
    fn member_id(&self) -> Option<String> {
        self.member_id.clone()
    }

    fn password(&self) -> Option<String> {
        self.password.clone()
    }
}

/// Credentials from environment variables, each under two accepted names.
pub struct EnvSource;

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl CredentialSource for EnvSource {
    fn member_id(&self) -> Option<String> {
        env_var(ENV_MEMBER_ID).or_else(|| env_var(ENV_MEMBER_ID_ALT))
    }

    fn password(&self) -> Option<String> {
        env_var(ENV_PASSWORD).or_else(|| env_var(ENV_PASSWORD_ALT))
    }
}

/// Credentials from a JSON file. The id is accepted under `mbrId`, `mbr_id`
/// or `id`; the password under `pw` or `password`.
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location: `KRX_CREDENTIALS_FILE`, else the fixed default under
    /// the user config directory.
    pub fn from_env() -> Self {
        if let Some(path) = env_var(ENV_CREDENTIALS_FILE) {
            return Self::at(path);
        }
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join(APP_DIR).join(CREDENTIALS_FILE))
    }

    fn read(&self) -> Option<Value> {
        if !self.path.exists() {
            return None;
        }
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "could not read credentials file");
                return None;
            }
        };
        match serde_json::from_str::<Value>(&contents) {
            Ok(value) if value.is_object() => Some(value),
            Ok(_) => {
                warn!(path = %self.path.display(), "credentials file is not a JSON object");
                None
            }
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "could not parse credentials file");
                None
            }
        }
    }

    fn field(&self, keys: &[&str]) -> Option<String> {
        let data = self.read()?;
        keys.iter()
            .filter_map(|k| data.get(*k))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .next()
    }
}

impl CredentialSource for FileSource {
    fn member_id(&self) -> Option<String> {
        self.field(&["mbrId", "mbr_id", "id"])
    }

    fn password(&self) -> Option<String> {
        self.field(&["pw", "password"])
    }
}

/// Run the waterfall: the first source supplying each field wins.
pub fn resolve_from(sources: &[&dyn CredentialSource]) -> Result<Credentials> {
    let mut member_id = None;
    let mut password = None;

    for source in sources {
        if member_id.is_none() {
            member_id = source.member_id();
        }
        if password.is_none() {
            password = source.password();
        }
        if member_id.is_some() && password.is_some() {
            break;
        }
    }

    match (member_id, password) {
        (Some(member_id), Some(password)) => Ok(Credentials {
            member_id,
            password,
        }),
        _ => Err(RequestError::CredentialsMissing),
    }
}

/// Resolve with the standard chain: explicit arguments, then environment,
/// then the credentials file.
pub fn resolve(member_id: Option<&str>, password: Option<&str>) -> Result<Credentials> {
    resolve_from(&[
        &ExplicitSource::new(member_id, password),
        &EnvSource,
        &FileSource::from_env(),
    ])
}
