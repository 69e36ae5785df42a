//! Usage: Authentication mode set (which flows a host accepts) and the single mode picked for a run.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AuthenticationModes: u32 {
        const BASIC = 1 << 0;
        const BROWSER = 1 << 1;
        const PAT = 1 << 2;
        const DEVICE_CODE = 1 << 3;
        /// Any OAuth flow.
        const OAUTH = Self::BROWSER.bits() | Self::DEVICE_CODE.bits();
    }
}

/// A concrete flow chosen for one `get`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMode {
    Basic,
    Browser,
    DeviceCode,
    Pat,
}

impl AuthMode {
    pub fn label(self) -> &'static str {
        match self {
            AuthMode::Basic => "Username/password",
            AuthMode::Browser => "Web browser",
            AuthMode::DeviceCode => "Device code",
            AuthMode::Pat => "Personal access token",
        }
    }

    fn flag(self) -> AuthenticationModes {
        match self {
            AuthMode::Basic => AuthenticationModes::BASIC,
            AuthMode::Browser => AuthenticationModes::BROWSER,
            AuthMode::DeviceCode => AuthenticationModes::DEVICE_CODE,
            AuthMode::Pat => AuthenticationModes::PAT,
        }
    }
}

// Prompt order: OAuth first, then tokens, then passwords.
const MODE_ORDER: [AuthMode; 4] = [
    AuthMode::Browser,
    AuthMode::DeviceCode,
    AuthMode::Pat,
    AuthMode::Basic,
];

impl AuthenticationModes {
    /// Parse a user override such as `"oauth,pat"`, `"browser devicecode"` or `"all"`.
    ///
    /// `"none"` parses to the empty set; callers treat that as "no override".
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut modes = AuthenticationModes::empty();
        let mut seen_any = false;
        for token in raw
            .split([',', ' ', '|', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            seen_any = true;
            modes |= match token.to_ascii_lowercase().as_str() {
                "none" => AuthenticationModes::empty(),
                "basic" => AuthenticationModes::BASIC,
                "browser" | "web" => AuthenticationModes::BROWSER,
                "devicecode" | "device" | "device_code" => AuthenticationModes::DEVICE_CODE,
                "pat" | "token" => AuthenticationModes::PAT,
                "oauth" => AuthenticationModes::OAUTH,
                "all" => AuthenticationModes::all(),
                other => return Err(format!("unknown authentication mode '{other}'")),
            };
        }
        if !seen_any {
            return Err("authentication mode list is empty".to_string());
        }
        Ok(modes)
    }

    pub fn contains_mode(self, mode: AuthMode) -> bool {
        self.contains(mode.flag())
    }

    pub fn without_mode(self, mode: AuthMode) -> Self {
        self - mode.flag()
    }

    /// Concrete flows in prompt order.
    pub fn candidates(self) -> Vec<AuthMode> {
        MODE_ORDER
            .into_iter()
            .filter(|mode| self.contains_mode(*mode))
            .collect()
    }
}

impl fmt::Display for AuthenticationModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self
            .candidates()
            .into_iter()
            .map(|mode| match mode {
                AuthMode::Basic => "basic",
                AuthMode::Browser => "browser",
                AuthMode::DeviceCode => "devicecode",
                AuthMode::Pat => "pat",
            })
            .collect();
        f.write_str(&names.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_mixed_separators_and_case() {
        let modes = AuthenticationModes::parse("OAuth, pat").expect("parse");
        assert_eq!(
            modes,
            AuthenticationModes::BROWSER | AuthenticationModes::DEVICE_CODE | AuthenticationModes::PAT
        );
        assert_eq!(
            AuthenticationModes::parse("browser devicecode").expect("parse"),
            AuthenticationModes::OAUTH
        );
    }

    #[test]
    fn parse_all_and_none() {
        assert_eq!(
            AuthenticationModes::parse("all").expect("parse"),
            AuthenticationModes::all()
        );
        assert!(AuthenticationModes::parse("none").expect("parse").is_empty());
    }

    #[test]
    fn parse_rejects_unknown_and_empty() {
        assert!(AuthenticationModes::parse("oauth,kerberos").is_err());
        assert!(AuthenticationModes::parse(" , ").is_err());
    }

    #[test]
    fn candidates_follow_prompt_order() {
        let modes = AuthenticationModes::BASIC | AuthenticationModes::PAT | AuthenticationModes::BROWSER;
        assert_eq!(
            modes.candidates(),
            vec![AuthMode::Browser, AuthMode::Pat, AuthMode::Basic]
        );
    }

    #[test]
    fn without_mode_removes_single_flow() {
        let modes = AuthenticationModes::OAUTH.without_mode(AuthMode::DeviceCode);
        assert_eq!(modes, AuthenticationModes::BROWSER);
    }

    #[test]
    fn display_lists_names() {
        assert_eq!(
            (AuthenticationModes::PAT | AuthenticationModes::BASIC).to_string(),
            "pat, basic"
        );
        assert_eq!(AuthenticationModes::empty().to_string(), "none");
    }
}
