mod control_plane;
mod data_plane;
mod observability;
mod sessions;

pub use control_plane::*;
pub use data_plane::*;
pub use observability::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    #[serde(default)]
    pub data_plane: DataPlaneConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        let mut error = |field: &str, message: &str| {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            })
        };

        let base_url = self.control_plane.base_url.trim();
        if base_url.is_empty() {
            error("control_plane.base_url", "base_url must not be empty");
        } else if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            error(
                "control_plane.base_url",
                "base_url must start with http:// or https://",
            );
        }

        if self.control_plane.timeout_ms == 0 {
            error("control_plane.timeout_ms", "timeout must be greater than 0");
        }

        if self.control_plane.kernel_name.trim().is_empty() {
            error("control_plane.kernel_name", "kernel_name must not be empty");
        }

        if self.sessions.notebooks_folder.trim().is_empty() {
            error(
                "sessions.notebooks_folder",
                "notebooks_folder must not be empty",
            );
        }

        if self.sessions.bootstrap_recv_timeout_ms == 0 {
            error(
                "sessions.bootstrap_recv_timeout_ms",
                "bootstrap receive timeout must be greater than 0",
            );
        }

        if self.data_plane.ready_timeout_ms == 0 {
            error(
                "data_plane.ready_timeout_ms",
                "ready timeout must be greater than 0",
            );
        }

        if self.control_plane.resolve_token().is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "control_plane.token".into(),
                message: format!(
                    "no credential configured (set {} or control_plane.token)",
                    self.control_plane.token_env
                ),
            });
        }

        issues
    }

    /// Whether any validation issue has error severity.
    pub fn has_errors(issues: &[ConfigIssue]) -> bool {
        issues.iter().any(|i| i.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_errors() {
        let cfg = Config::default();
        let issues = cfg.validate();
        assert!(!Config::has_errors(&issues), "{issues:?}");
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut cfg = Config::default();
        cfg.control_plane.base_url = "ftp://example.com".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "control_plane.base_url" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn rejects_empty_notebooks_folder() {
        let mut cfg = Config::default();
        cfg.sessions.notebooks_folder = "  ".into();
        assert!(Config::has_errors(&cfg.validate()));
    }

    #[test]
    fn missing_token_is_only_a_warning() {
        let mut cfg = Config::default();
        cfg.control_plane.token = None;
        cfg.control_plane.token_env = "JI_TEST_TOKEN_THAT_IS_NEVER_SET".into();
        let issues = cfg.validate();
        let token_issue = issues
            .iter()
            .find(|i| i.field == "control_plane.token")
            .expect("token warning");
        assert_eq!(token_issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn issue_display() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "sessions.notebooks_folder".into(),
            message: "must not be empty".into(),
        };
        assert_eq!(
            issue.to_string(),
            "[ERROR] sessions.notebooks_folder: must not be empty"
        );
    }
}
