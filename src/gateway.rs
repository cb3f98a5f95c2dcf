//! Portal endpoint resolution.
//!
//! All URLs the crate talks to hang off a single base, which is overridable
//! so tests can point the whole stack at a mock server.

/// Production portal base URL.
const DEFAULT_BASE_URL: &str = "https://data.krx.co.kr";

/// Default `site` query parameter on the login page.
const DEFAULT_LOGIN_SITE: &str = "mdc";

/// User agent sent on every request. The portal rejects obviously
/// non-browser agents.
pub(crate) const USER_AGENT: &str = "Mozilla/5.0";

/// Resolves the portal's endpoint URLs from a base.
#[derive(Debug, Clone)]
pub struct Gateway {
    base: String,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_URL)
    }
}

impl Gateway {
    pub fn new(base: impl Into<String>) -> Self {
        let mut base = base.into();
        while base.ends_with('/') {
            base.pop();
        }
        Self { base }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// Login page, hit once before the login POST to seed baseline cookies.
    pub fn login_page_url(&self) -> String {
        format!(
            "{}/contents/MDC/COMS/client/view/login.jsp?site={}",
            self.base, DEFAULT_LOGIN_SITE
        )
    }

    pub fn login_api_url(&self) -> String {
        format!("{}/contents/MDC/COMS/client/MDCCOMS001D1.cmd", self.base)
    }

    /// Referer expected by the login API.
    pub fn login_referer(&self) -> String {
        format!("{}/contents/MDC/COMS/client/MDCCOMS001.cmd", self.base)
    }

    pub fn extend_session_url(&self) -> String {
        format!("{}/contents/MDC/MAIN/main/extendSession.cmd", self.base)
    }

    /// Referer expected by the session-extension endpoint.
    pub fn extend_session_referer(&self) -> String {
        format!("{}/contents/MDC/MAIN/main/index.cmd", self.base)
    }

    pub fn data_url(&self) -> String {
        format!("{}/comm/bldAttendant/getJsonData.cmd", self.base)
    }

    /// Referer sent on data requests.
    pub fn data_referer(&self) -> String {
        format!("{}/", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_points_at_production() {
        let gw = Gateway::default();
        assert_eq!(gw.base(), "https://data.krx.co.kr");
        assert_eq!(
            gw.data_url(),
            "https://data.krx.co.kr/comm/bldAttendant/getJsonData.cmd"
        );
    }

    #[test]
    fn trailing_slashes_are_stripped() {
        let gw = Gateway::new("http://127.0.0.1:8080/");
        assert_eq!(
            gw.login_page_url(),
            "http://127.0.0.1:8080/contents/MDC/COMS/client/view/login.jsp?site=mdc"
        );
    }
}
