use netpilot_sdk::ConnectionPolicy;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TELNET_PORT: u16 = 23;

/// Connector-level settings shared by every session it opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelnetConfig {
    /// Port used when a device address carries none
    #[serde(default = "TelnetConfig::default_port")]
    pub default_port: u16,
    #[serde(default)]
    pub connection: ConnectionPolicy,
    /// Upper bound of a single command's output, in bytes
    #[serde(default = "TelnetConfig::default_max_output")]
    pub max_output_bytes: usize,
}

impl TelnetConfig {
    fn default_port() -> u16 {
        DEFAULT_TELNET_PORT
    }

    fn default_max_output() -> usize {
        4 * 1024 * 1024
    }

    pub fn with_connection(connection: ConnectionPolicy) -> Self {
        Self {
            connection,
            ..Default::default()
        }
    }
}

impl Default for TelnetConfig {
    fn default() -> Self {
        Self {
            default_port: Self::default_port(),
            connection: ConnectionPolicy::default(),
            max_output_bytes: Self::default_max_output(),
        }
    }
}

/// CLI dialect of one vendor platform.
///
/// Only prompt shapes and mode-switch commands live here. What to run for a
/// given intent is the command catalog's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformProfile {
    pub name: &'static str,
    /// Characters a prompt line may end with
    pub prompt_terminators: &'static [char],
    /// Terminator of an unprivileged prompt; triggers `enable` when a secret is set
    pub user_terminator: Option<char>,
    pub username_prompts: &'static [&'static str],
    pub password_prompts: &'static [&'static str],
    /// Device text that means the login was refused
    pub login_failures: &'static [&'static str],
    /// Device text that means a command was rejected
    pub error_markers: &'static [&'static str],
    pub pager_prompts: &'static [&'static str],
    pub disable_paging: &'static [&'static str],
    pub enable: Option<&'static str>,
    pub config_enter: &'static str,
    pub config_exit: &'static str,
    pub logout: &'static str,
}

const LOGIN_PROMPTS: &[&str] = &["username:", "login:", "user name:"];
const PASSWORD_PROMPTS: &[&str] = &["password:"];
const LOGIN_FAILURES: &[&str] = &[
    "login invalid",
    "login incorrect",
    "authentication failed",
    "access denied",
    "% bad passwords",
];
const PAGER_PROMPTS: &[&str] = &["--more--", "---- more ----"];

const CISCO_ERRORS: &[&str] = &[
    "% invalid input",
    "% incomplete command",
    "% ambiguous command",
    "% unknown command",
    "% error",
];
const HUAWEI_ERRORS: &[&str] = &[
    "error:",
    "unrecognized command",
    "incomplete command",
    "wrong parameter",
];

impl PlatformProfile {
    pub const CISCO_IOS: PlatformProfile = PlatformProfile {
        name: "cisco_ios",
        prompt_terminators: &['#', '>'],
        user_terminator: Some('>'),
        username_prompts: LOGIN_PROMPTS,
        password_prompts: PASSWORD_PROMPTS,
        login_failures: LOGIN_FAILURES,
        error_markers: CISCO_ERRORS,
        pager_prompts: PAGER_PROMPTS,
        disable_paging: &["terminal length 0", "terminal width 511"],
        enable: Some("enable"),
        config_enter: "configure terminal",
        config_exit: "end",
        logout: "exit",
    };

    pub const CISCO_NXOS: PlatformProfile = PlatformProfile {
        name: "cisco_nxos",
        disable_paging: &["terminal length 0"],
        ..Self::CISCO_IOS
    };

    pub const ARISTA_EOS: PlatformProfile = PlatformProfile {
        name: "arista_eos",
        disable_paging: &["terminal length 0"],
        ..Self::CISCO_IOS
    };

    pub const HUAWEI_VRP: PlatformProfile = PlatformProfile {
        name: "huawei_vrp",
        prompt_terminators: &['>', ']'],
        user_terminator: None,
        username_prompts: LOGIN_PROMPTS,
        password_prompts: PASSWORD_PROMPTS,
        login_failures: LOGIN_FAILURES,
        error_markers: HUAWEI_ERRORS,
        pager_prompts: PAGER_PROMPTS,
        disable_paging: &["screen-length 0 temporary"],
        enable: None,
        config_enter: "system-view",
        config_exit: "return",
        logout: "quit",
    };

    pub const H3C_COMWARE: PlatformProfile = PlatformProfile {
        name: "h3c_comware",
        disable_paging: &["screen-length disable"],
        ..Self::HUAWEI_VRP
    };

    /// Profile for `platform`; unknown platforms get the Cisco-like dialect.
    pub fn for_platform(platform: &str) -> PlatformProfile {
        match platform.to_ascii_lowercase().as_str() {
            "cisco_nxos" | "nxos" => Self::CISCO_NXOS,
            "arista_eos" | "eos" => Self::ARISTA_EOS,
            "huawei_vrp" | "huawei" => Self::HUAWEI_VRP,
            "h3c_comware" | "h3c" | "hp_comware" => Self::H3C_COMWARE,
            _ => Self::CISCO_IOS,
        }
    }

    #[inline]
    fn contains_any(text: &str, needles: &[&str]) -> bool {
        let lower = text.to_ascii_lowercase();
        needles.iter().any(|n| lower.contains(n))
    }

    /// Whether the tail of `text` asks for a username.
    pub fn wants_username(&self, text: &str) -> bool {
        Self::contains_any(last_line(text), self.username_prompts)
    }

    pub fn wants_password(&self, text: &str) -> bool {
        Self::contains_any(last_line(text), self.password_prompts)
    }

    pub fn is_login_failure(&self, text: &str) -> bool {
        Self::contains_any(text, self.login_failures)
    }

    pub fn is_pager(&self, text: &str) -> bool {
        Self::contains_any(last_line(text), self.pager_prompts)
    }

    /// First output line carrying an error marker.
    pub fn find_error<'a>(&self, output: &'a str) -> Option<&'a str> {
        output
            .lines()
            .find(|line| Self::contains_any(line, self.error_markers))
            .map(str::trim)
    }

    /// The trailing prompt line of `text`, if the text ends in one.
    ///
    /// With `hostname` set, only prompts starting with it are accepted so
    /// output lines that merely end in `#` are not mistaken for a prompt.
    pub fn trailing_prompt<'a>(&self, text: &'a str, hostname: Option<&str>) -> Option<&'a str> {
        let line = last_line(text).trim();
        if line.is_empty() || line.len() > 128 {
            return None;
        }
        let last = line.chars().last()?;
        if !self.prompt_terminators.contains(&last) {
            return None;
        }
        match hostname {
            Some(host) if !host.is_empty() => line.starts_with(host).then_some(line),
            _ => Some(line),
        }
    }

    /// Host part of a prompt, e.g. `r1` for `r1#` or `HUAWEI` for `<HUAWEI>`.
    pub fn hostname_of(&self, prompt: &str) -> String {
        let body = prompt.trim_end_matches(self.prompt_terminators);
        let body = body.trim_start_matches(['<', '[']);
        body.split('(').next().unwrap_or(body).to_string()
    }
}

/// Text after the last line break.
#[inline]
pub(crate) fn last_line(text: &str) -> &str {
    text.rsplit(['\n', '\r']).next().unwrap_or(text)
}
