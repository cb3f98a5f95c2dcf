//! Minimal serializable cookie jar.
//!
//! The portal's session lives entirely in cookies, and the on-disk session
//! record persists them field-by-field so another process can rebuild the
//! session. reqwest's built-in jar cannot be introspected, so the crate
//! keeps its own: enough of RFC 6265 to round-trip the portal's cookies,
//! no more.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attributes stored per cookie name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieAttrs {
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub secure: bool,
    /// Server-side expiry as a unix timestamp, when the portal sends one.
    #[serde(default)]
    pub expires: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CookieJar {
    cookies: BTreeMap<String, CookieAttrs>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cookies(cookies: BTreeMap<String, CookieAttrs>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn get(&self, name: &str) -> Option<&CookieAttrs> {
        self.cookies.get(name)
    }

    pub fn cookies(&self) -> &BTreeMap<String, CookieAttrs> {
        &self.cookies
    }

    /// Record one `Set-Cookie` header value. A later cookie with the same
    /// name replaces the earlier one.
    pub fn store_set_cookie(&mut self, header: &str) {
        let mut parts = header.split(';');

        let Some(pair) = parts.next() else {
            return;
        };
        let Some((name, value)) = pair.split_once('=') else {
            return;
        };
        let name = name.trim();
        if name.is_empty() {
            return;
        }

        let mut attrs = CookieAttrs {
            value: value.trim().to_string(),
            ..CookieAttrs::default()
        };

        for part in parts {
            let part = part.trim();
            let (key, val) = match part.split_once('=') {
                Some((k, v)) => (k.trim(), v.trim()),
                None => (part, ""),
            };
            if key.eq_ignore_ascii_case("domain") {
                attrs.domain = Some(val.trim_start_matches('.').to_string());
            } else if key.eq_ignore_ascii_case("path") {
                attrs.path = Some(val.to_string());
            } else if key.eq_ignore_ascii_case("secure") {
                attrs.secure = true;
            } else if key.eq_ignore_ascii_case("max-age") {
                if let Ok(secs) = val.parse::<i64>() {
                    attrs.expires = Some(Utc::now().timestamp() + secs);
                }
            } else if key.eq_ignore_ascii_case("expires") {
                if let Ok(dt) = DateTime::parse_from_rfc2822(val) {
                    attrs.expires = Some(dt.timestamp());
                }
            }
        }

        self.cookies.insert(name.to_string(), attrs);
    }

    /// Render the `Cookie` request header, or `None` if the jar is empty.
    pub fn header_value(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        let rendered: Vec<String> = self
            .cookies
            .iter()
            .map(|(name, attrs)| format!("{}={}", name, attrs.value))
            .collect();
        Some(rendered.join("; "))
    }
}
