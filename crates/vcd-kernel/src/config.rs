use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{KernelError, KernelResult};

const DEFAULT_MAX_RETRY_TIMEOUT: u64 = 60;
const DEFAULT_IMPORT_SEPARATOR: &str = ".";

fn default_max_retry_timeout() -> u64 {
    DEFAULT_MAX_RETRY_TIMEOUT
}

fn default_import_separator() -> String {
    DEFAULT_IMPORT_SEPARATOR.to_string()
}

/// Provider block as supplied by the host at configuration time.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    pub url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub service_account_token_file: Option<PathBuf>,
    /// Org used to authenticate; defaults to `org`.
    #[serde(default)]
    pub sysorg: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub vdc: Option<String>,
    #[serde(default)]
    pub allow_unverified_ssl: bool,
    /// Seconds to wait for a remote task before giving up.
    #[serde(default = "default_max_retry_timeout")]
    pub max_retry_timeout: u64,
    #[serde(default = "default_import_separator")]
    pub import_separator: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: None,
            password: None,
            token: None,
            api_token: None,
            service_account_token_file: None,
            sysorg: None,
            org: None,
            vdc: None,
            allow_unverified_ssl: false,
            max_retry_timeout: DEFAULT_MAX_RETRY_TIMEOUT,
            import_separator: default_import_separator(),
        }
    }
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("ProviderConfig")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &redact(&self.password))
            .field("token", &redact(&self.token))
            .field("api_token", &redact(&self.api_token))
            .field("service_account_token_file", &self.service_account_token_file)
            .field("sysorg", &self.sysorg)
            .field("org", &self.org)
            .field("vdc", &self.vdc)
            .field("allow_unverified_ssl", &self.allow_unverified_ssl)
            .field("max_retry_timeout", &self.max_retry_timeout)
            .field("import_separator", &self.import_separator)
            .finish()
    }
}

/// The single authentication method a provider block resolves to.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password { user: String, password: String },
    Token(String),
    ApiToken(String),
    ServiceAccountFile(PathBuf),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password { user, .. } => write!(f, "Password({user}, <redacted>)"),
            Credentials::Token(_) => f.write_str("Token(<redacted>)"),
            Credentials::ApiToken(_) => f.write_str("ApiToken(<redacted>)"),
            Credentials::ServiceAccountFile(path) => {
                write!(f, "ServiceAccountFile({})", path.display())
            }
        }
    }
}

impl ProviderConfig {
    /// Build from `VCD_*` environment variables.
    pub fn from_env() -> KernelResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> KernelResult<Self> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let allow_unverified_ssl = match get("VCD_ALLOW_UNVERIFIED_SSL") {
            Some(raw) => parse_bool("VCD_ALLOW_UNVERIFIED_SSL", &raw)?,
            None => false,
        };
        let max_retry_timeout = match get("VCD_MAX_RETRY_TIMEOUT") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                KernelError::validation(format!(
                    "VCD_MAX_RETRY_TIMEOUT must be a number of seconds, got '{raw}'"
                ))
            })?,
            None => DEFAULT_MAX_RETRY_TIMEOUT,
        };
        Ok(Self {
            url: get("VCD_URL").unwrap_or_default(),
            user: get("VCD_USER"),
            password: get("VCD_PASSWORD"),
            token: get("VCD_TOKEN"),
            api_token: get("VCD_API_TOKEN"),
            service_account_token_file: get("VCD_SA_TOKEN_FILE").map(PathBuf::from),
            sysorg: get("VCD_SYS_ORG"),
            org: get("VCD_ORG"),
            vdc: get("VCD_VDC"),
            allow_unverified_ssl,
            max_retry_timeout,
            import_separator: get("VCD_IMPORT_SEPARATOR")
                .unwrap_or_else(default_import_separator),
        })
    }

    pub fn endpoint(&self) -> KernelResult<Url> {
        let url = Url::parse(&self.url)
            .map_err(|err| KernelError::validation(format!("invalid url '{}': {err}", self.url)))?;
        if !matches!(url.scheme(), "https" | "http") {
            return Err(KernelError::validation(format!(
                "url '{}' must use https",
                self.url
            )));
        }
        if !url.path().trim_end_matches('/').ends_with("/api") {
            return Err(KernelError::validation(format!(
                "url '{}' must end with /api",
                self.url
            )));
        }
        Ok(url)
    }

    /// Exactly one credential form must be configured.
    pub fn credentials(&self) -> KernelResult<Credentials> {
        let mut found = Vec::new();
        if self.user.is_some() || self.password.is_some() {
            match (&self.user, &self.password) {
                (Some(user), Some(password)) => found.push(Credentials::Password {
                    user: user.clone(),
                    password: password.clone(),
                }),
                _ => {
                    return Err(KernelError::validation(
                        "user and password must be set together",
                    ));
                }
            }
        }
        if let Some(token) = &self.token {
            found.push(Credentials::Token(token.clone()));
        }
        if let Some(token) = &self.api_token {
            found.push(Credentials::ApiToken(token.clone()));
        }
        if let Some(path) = &self.service_account_token_file {
            found.push(Credentials::ServiceAccountFile(path.clone()));
        }
        match found.len() {
            1 => Ok(found.remove(0)),
            0 => Err(KernelError::validation(
                "no credentials configured: set user/password, token, api_token or service_account_token_file",
            )),
            n => Err(KernelError::validation(format!(
                "{n} credential forms configured; use exactly one"
            ))),
        }
    }

    pub fn validate(&self) -> KernelResult<()> {
        self.endpoint()?;
        self.credentials()?;
        if self.import_separator.is_empty() {
            return Err(KernelError::validation("import_separator cannot be empty"));
        }
        Ok(())
    }

    pub fn auth_org(&self) -> Option<&str> {
        self.sysorg.as_deref().or(self.org.as_deref())
    }
}

fn parse_bool(name: &str, raw: &str) -> KernelResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(KernelError::validation(format!(
            "{name} must be a boolean, got '{raw}'"
        ))),
    }
}

/// Timing and defaults the kernel runs with.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub poll_interval: Duration,
    pub task_budget: Duration,
    pub sync_interval: Duration,
    pub sync_budget: Duration,
    pub customization_budget: Duration,
    pub import_separator: String,
    pub default_org: Option<String>,
    pub default_vdc: Option<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            task_budget: Duration::from_secs(DEFAULT_MAX_RETRY_TIMEOUT),
            sync_interval: Duration::from_millis(500),
            sync_budget: Duration::from_secs(60),
            customization_budget: Duration::from_secs(300),
            import_separator: default_import_separator(),
            default_org: None,
            default_vdc: None,
        }
    }
}

impl KernelConfig {
    pub fn from_provider(provider: &ProviderConfig) -> Self {
        Self {
            task_budget: Duration::from_secs(provider.max_retry_timeout),
            import_separator: provider.import_separator.clone(),
            default_org: provider.org.clone(),
            default_vdc: provider.vdc.clone(),
            ..Self::default()
        }
    }

    /// Millisecond polling for in-memory remotes.
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(2),
            task_budget: Duration::from_secs(5),
            sync_interval: Duration::from_millis(2),
            sync_budget: Duration::from_secs(2),
            customization_budget: Duration::from_secs(5),
            ..Self::default()
        }
    }

    pub fn with_defaults(mut self, org: Option<&str>, vdc: Option<&str>) -> Self {
        self.default_org = org.map(String::from);
        self.default_vdc = vdc.map(String::from);
        self
    }

    pub fn with_separator(mut self, separator: &str) -> Self {
        self.import_separator = separator.to_string();
        self
    }
}
