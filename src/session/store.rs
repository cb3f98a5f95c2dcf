//! Cross-process session persistence.
//!
//! One authenticated session is cached as a JSON record on disk so sibling
//! processes can reuse it instead of logging in again. Writers take an
//! exclusive advisory lock on a sibling `.lock` file, readers a shared one.
//! Locking is deliberately best-effort: if the lock cannot be taken the
//! store falls back to an unlocked read/write and accepts the race window,
//! because persistence here is an optimization - a torn or missing record
//! only costs an extra login. No store operation ever fails the caller.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cookies::CookieJar;
use super::Session;

/// Session record file name when only a directory is configured.
const SESSION_FILE: &str = "session.json";

/// Directory under the user config dir used by default.
const APP_DIR: &str = "krx-session";

/// Default record time-to-live. The portal expires idle sessions after
/// roughly 30 minutes.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Environment variable naming the record file directly.
pub const ENV_SESSION_FILE: &str = "KRX_SESSION_FILE";

/// Environment variable naming the directory holding the record file.
pub const ENV_SESSION_DIR: &str = "KRX_SESSION_DIR";

/// Persisted form of an authenticated session.
///
/// Invariant: `expires_at = created_at + ttl_minutes`; the record is usable
/// iff `now < expires_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub cookies: CookieJar,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub member_id: Option<String>,
    pub ttl_minutes: i64,
}

impl SessionRecord {
    pub fn new(cookies: CookieJar, member_id: Option<String>, ttl_minutes: i64) -> Self {
        let now = Utc::now();
        Self {
            cookies,
            created_at: now,
            expires_at: now + Duration::minutes(ttl_minutes),
            last_used: now,
            member_id,
            ttl_minutes,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Durable, cross-process-shared cache of one authenticated session.
#[derive(Debug, Clone)]
pub struct SessionStore {
    file: PathBuf,
}

impl SessionStore {
    /// Store at an explicit record file path.
    pub fn at(file: impl Into<PathBuf>) -> Self {
        Self { file: file.into() }
    }

    /// Resolve the record location: `KRX_SESSION_FILE`, else
    /// `KRX_SESSION_DIR/session.json`, else the fixed default under the
    /// user config directory.
    pub fn from_env() -> Self {
        if let Ok(file) = std::env::var(ENV_SESSION_FILE) {
            if !file.is_empty() {
                return Self::at(file);
            }
        }
        if let Ok(dir) = std::env::var(ENV_SESSION_DIR) {
            if !dir.is_empty() {
                return Self::at(PathBuf::from(dir).join(SESSION_FILE));
            }
        }
        let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::at(base.join(APP_DIR).join(SESSION_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.file
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| SESSION_FILE.into());
        name.push(".lock");
        self.file.with_file_name(name)
    }

    fn open_lock_file(&self) -> Option<File> {
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(self.lock_path())
            .ok()
    }

    /// Persist the session's cookies plus metadata. Failures (including
    /// lock acquisition) are logged and swallowed.
    pub fn save(&self, session: &Session, member_id: Option<&str>, ttl_minutes: i64) {
        let record = SessionRecord::new(
            session.cookies(),
            member_id.map(str::to_string),
            ttl_minutes,
        );
        self.write_record(&record);
    }

    fn write_record(&self, record: &SessionRecord) {
        if let Some(parent) = self.file.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                warn!(error = %e, path = %self.file.display(), "could not create session dir");
                return;
            }
        }

        let contents = match serde_json::to_string_pretty(record) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(error = %e, "could not serialize session record");
                return;
            }
        };

        let lock = self.open_lock_file();
        let locked = match &lock {
            Some(file) => file.lock_exclusive().is_ok(),
            None => false,
        };
        if !locked {
            warn!(path = %self.file.display(), "session lock unavailable, writing unlocked");
        }

        if let Err(e) = fs::write(&self.file, contents) {
            warn!(error = %e, path = %self.file.display(), "could not write session record");
        } else {
            debug!(path = %self.file.display(), "session record saved");
        }

        if locked {
            if let Some(file) = &lock {
                let _ = file.unlock();
            }
        }
    }

    /// Read the raw record, if present and parseable. Expiry is not checked
    /// here; `load` is the consumer-facing entry point.
    pub fn load_record(&self) -> Option<SessionRecord> {
        if !self.file.exists() {
            return None;
        }

        let lock = self.open_lock_file();
        let locked = match &lock {
            Some(file) => file.lock_shared().is_ok(),
            None => false,
        };

        let contents = fs::read_to_string(&self.file);

        if locked {
            if let Some(file) = &lock {
                let _ = file.unlock();
            }
        }

        let contents = contents.ok()?;
        serde_json::from_str(&contents).ok()
    }

    /// Rebuild a session from the stored record.
    ///
    /// Returns `None` when the file is absent, unparseable, or expired. On
    /// success, rewrites `last_used` as a best-effort bookkeeping update.
    pub fn load(&self) -> Option<Session> {
        let mut record = self.load_record()?;

        if record.is_expired() {
            debug!(path = %self.file.display(), "stored session expired");
            return None;
        }

        let session = Session::with_cookies(record.cookies.clone()).ok()?;

        record.last_used = Utc::now();
        if let Ok(contents) = serde_json::to_string_pretty(&record) {
            if let Err(e) = fs::write(&self.file, contents) {
                warn!(error = %e, "could not update last_used on session record");
            }
        }

        debug!(path = %self.file.display(), "session restored from disk");
        Some(session)
    }

    /// Delete the record file. Missing file or deletion failure is not an
    /// error for the caller.
    pub fn clear(&self) {
        match fs::remove_file(&self.file) {
            Ok(()) => debug!(path = %self.file.display(), "session record cleared"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "could not remove session record"),
        }
    }
}
