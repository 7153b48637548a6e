//! TOML configuration
//!
//! Tokens never live in the file; each endpoint names the environment
//! variable that holds its token.
//!
//! ```toml
//! artifacts_dir = "mig-artifacts"
//!
//! [source]
//! base_url = "https://git.example.com"
//! token_env = "MIG_SOURCE_TOKEN"
//!
//! [destination]
//! base_url = "https://dev.example.com/org"
//! token_env = "MIG_DESTINATION_TOKEN"
//! api_version = "7.1"
//! ```

use crate::bulk::BulkPolicy;
use crate::error::ConfigError;
use crate::governance::GovernanceTemplate;
use mig_client::{RetryPolicy, SessionContext, System, Timeouts};
use mig_preflight::DEFAULT_OVERSIZE_THRESHOLD;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default source token variable
pub const DEFAULT_SOURCE_TOKEN_ENV: &str = "MIG_SOURCE_TOKEN";
/// Default destination token variable
pub const DEFAULT_DESTINATION_TOKEN_ENV: &str = "MIG_DESTINATION_TOKEN";

/// One platform endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Base URL
    pub base_url: String,
    /// Environment variable holding the token
    #[serde(default)]
    pub token_env: Option<String>,
    /// API version override
    #[serde(default)]
    pub api_version: Option<String>,
}

/// Retry settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first request
    pub attempts: u32,
    /// Base delay in seconds; doubled per retry
    pub backoff_base_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_base_secs: 5.0,
        }
    }
}

/// Timeout settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-attempt API limit in seconds
    pub request_secs: u64,
    /// Per-command transfer limit in seconds
    pub transfer_secs: u64,
    /// Credential scrubbing limit in seconds
    pub scrub_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let defaults = Timeouts::default();
        Self {
            request_secs: defaults.request.as_secs(),
            transfer_secs: defaults.transfer.as_secs(),
            scrub_secs: defaults.scrub.as_secs(),
        }
    }
}

/// Preflight settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Repository size above which a warning is raised without large-object storage
    pub oversize_threshold_bytes: u64,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            oversize_threshold_bytes: DEFAULT_OVERSIZE_THRESHOLD,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Artifact root
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    /// Mirror cache; defaults to `<artifacts_dir>/cache`
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Source platform
    pub source: EndpointConfig,
    /// Destination platform
    pub destination: EndpointConfig,
    /// Retries
    #[serde(default)]
    pub retry: RetryConfig,
    /// Timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Preflight
    #[serde(default)]
    pub preflight: PreflightConfig,
    /// Bulk execution
    #[serde(default)]
    pub bulk: BulkPolicy,
    /// Desired governance
    #[serde(default)]
    pub governance: GovernanceTemplate,
    /// Accept invalid TLS certificates
    #[serde(default)]
    pub skip_certificate_validation: bool,
    /// Per-attempt request logging
    #[serde(default)]
    pub verbose: bool,
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("mig-artifacts")
}

impl MigrationConfig {
    /// Load and validate a file
    ///
    /// Relative paths inside the file resolve against its directory.
    ///
    /// # Errors
    /// Unreadable file, invalid TOML, or invalid values.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml_str(&raw)?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        config.artifacts_dir = base.join(&config.artifacts_dir);
        config.cache_dir = config.cache_dir.map(|dir| base.join(dir));
        if let Some(wiki) = config.governance.wiki.as_mut() {
            if let Some(file) = wiki.content_file.take() {
                let file = base.join(file);
                let content = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
                    path: file.clone(),
                    source,
                })?;
                wiki.content = Some(content);
                wiki.content_file = Some(file);
            }
        }
        Ok(config)
    }

    /// Parse and validate TOML
    ///
    /// # Errors
    /// Invalid TOML or invalid values.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Range checks
    ///
    /// # Errors
    /// `Invalid` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.retry.backoff_base_secs.is_finite() || self.retry.backoff_base_secs < 0.0 {
            return Err(ConfigError::Invalid("retry.backoff_base_secs must be >= 0".into()));
        }
        if self.timeouts.request_secs == 0 || self.timeouts.transfer_secs == 0 || self.timeouts.scrub_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be positive".into()));
        }
        if self.bulk.max_parallel == 0 {
            return Err(ConfigError::Invalid("bulk.max_parallel must be at least 1".into()));
        }
        if self.governance.groups.iter().any(|g| g.name.trim().is_empty()) {
            return Err(ConfigError::Invalid("governance group names must not be empty".into()));
        }
        Ok(())
    }

    /// Mirror cache directory
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.artifacts_dir.join("cache"))
    }

    /// Retry policy
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.attempts,
            Duration::from_secs_f64(self.retry.backoff_base_secs),
        )
    }

    /// Build a session with tokens from the process environment
    ///
    /// # Errors
    /// Missing token variable or invalid session settings.
    pub fn session(&self) -> Result<SessionContext, ConfigError> {
        self.session_with(|var| std::env::var(var).ok())
    }

    /// Build a session with tokens from `lookup`
    ///
    /// # Errors
    /// Missing token variable or invalid session settings.
    pub fn session_with<F>(&self, lookup: F) -> Result<SessionContext, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let source_token = token(&lookup, System::Source, &self.source, DEFAULT_SOURCE_TOKEN_ENV)?;
        let destination_token = token(
            &lookup,
            System::Destination,
            &self.destination,
            DEFAULT_DESTINATION_TOKEN_ENV,
        )?;

        let mut builder = SessionContext::builder()
            .source(self.source.base_url.clone(), source_token)
            .destination(self.destination.base_url.clone(), destination_token)
            .retry(self.retry_policy())
            .skip_certificate_validation(self.skip_certificate_validation)
            .timeouts(Timeouts {
                request: Duration::from_secs(self.timeouts.request_secs),
                transfer: Duration::from_secs(self.timeouts.transfer_secs),
                scrub: Duration::from_secs(self.timeouts.scrub_secs),
            })
            .verbose(self.verbose);
        if let Some(version) = &self.source.api_version {
            builder = builder.source_api_version(version.clone());
        }
        if let Some(version) = &self.destination.api_version {
            builder = builder.api_version(version.clone());
        }
        Ok(builder.build()?)
    }
}

fn token<F>(lookup: &F, system: System, endpoint: &EndpointConfig, default_var: &str) -> Result<SecretString, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let var = endpoint.token_env.as_deref().unwrap_or(default_var);
    match lookup(var) {
        Some(value) if !value.trim().is_empty() => Ok(SecretString::from(value)),
        _ => Err(ConfigError::MissingToken {
            system,
            var: var.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mig_client::ApiVersion;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [source]
        base_url = "https://git.example.com"

        [destination]
        base_url = "https://dev.example.com/org"
        api_version = "7.0"
    "#;

    fn env(var: &str) -> Option<String> {
        match var {
            "MIG_SOURCE_TOKEN" => Some("src-token".into()),
            "MIG_DESTINATION_TOKEN" => Some("dst-token".into()),
            _ => None,
        }
    }

    #[test]
    fn defaults_apply() {
        let config = MigrationConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(config.retry, RetryConfig::default());
        assert_eq!(config.bulk.max_parallel, 1);
        assert!(!config.bulk.stop_on_first_failure);
        assert_eq!(config.cache_dir(), PathBuf::from("mig-artifacts/cache"));
        assert_eq!(config.preflight.oversize_threshold_bytes, DEFAULT_OVERSIZE_THRESHOLD);
    }

    #[test]
    fn session_reads_named_variables() {
        let config = MigrationConfig::from_toml_str(MINIMAL).unwrap();
        let session = config.session_with(env).unwrap();
        assert_eq!(session.destination_version(), ApiVersion::V7_0);
        assert_eq!(session.retry_policy().attempts, 3);
    }

    #[test]
    fn missing_token_names_variable() {
        let raw = MINIMAL.replace(
            "base_url = \"https://git.example.com\"",
            "base_url = \"https://git.example.com\"\ntoken_env = \"OTHER_TOKEN\"",
        );
        let config = MigrationConfig::from_toml_str(&raw).unwrap();
        let err = config.session_with(env).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingToken { system: System::Source, ref var } if var == "OTHER_TOKEN"
        ));
    }

    #[test]
    fn unsupported_api_version_rejected() {
        let config = MigrationConfig::from_toml_str(&MINIMAL.replace("7.0", "5.1")).unwrap();
        assert!(matches!(config.session_with(env), Err(ConfigError::Session(_))));
    }

    #[test]
    fn zero_parallelism_rejected() {
        let raw = format!("{MINIMAL}\n[bulk]\nmax_parallel = 0\n");
        assert!(matches!(MigrationConfig::from_toml_str(&raw), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn wiki_body_loaded_relative_to_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("home.md"), "# Welcome").unwrap();
        let mut file = std::fs::File::create(dir.path().join("mig.toml")).unwrap();
        write!(
            file,
            "{MINIMAL}\n[governance.wiki]\ncontent_file = \"home.md\"\n"
        )
        .unwrap();

        let config = MigrationConfig::load(&dir.path().join("mig.toml")).unwrap();
        let wiki = config.governance.wiki.unwrap();
        assert_eq!(wiki.content.as_deref(), Some("# Welcome"));
        assert_eq!(config.artifacts_dir, dir.path().join("mig-artifacts"));
    }
}
