//! Process-wide fetch configuration.
//!
//! Controls whether a failed data request triggers an automatic re-login,
//! and whether that re-login may evict a duplicate session. The global
//! default applies to every `Fetcher` unless overridden per instance.

use std::sync::Mutex;

/// Auto-login behavior applied when a data request fails validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoLoginPolicy {
    /// Attempt one re-login + retry on a validation failure.
    pub enabled: bool,
    /// Pass the duplicate-session override (`skipDup`) on that re-login.
    pub allow_dup_login: bool,
}

impl Default for AutoLoginPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_dup_login: false,
        }
    }
}

static POLICY: Mutex<AutoLoginPolicy> = Mutex::new(AutoLoginPolicy {
    enabled: true,
    allow_dup_login: false,
});

/// Set the process-wide auto-login policy.
pub fn set_auto_login(enabled: bool, allow_dup_login: bool) {
    *POLICY.lock().unwrap() = AutoLoginPolicy {
        enabled,
        allow_dup_login,
    };
}

/// Current process-wide auto-login policy.
pub fn auto_login_policy() -> AutoLoginPolicy {
    *POLICY.lock().unwrap()
}

/// Whether auto-login-on-failure is enabled process-wide.
pub fn auto_login_enabled() -> bool {
    auto_login_policy().enabled
}
