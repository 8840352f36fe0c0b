use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::policy::PolicyConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub justification_policy: PolicyConfig,
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub servicenow: Option<ServiceNowConfig>,
    #[serde(default)]
    pub gateway: Option<GatewayConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("qrelease.db")
}

/// Failure notification configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    /// Responsible team's distribution list.
    pub distribution_list: String,
    /// Prepended to every notification subject.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
    /// SMTP relay. Without it alerts are only written to the log.
    #[serde(default)]
    pub smtp: Option<SmtpConfig>,
}

fn default_subject_prefix() -> String {
    "[qrelease]".to_string()
}

/// SMTP relay configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// ServiceNow instance configuration (ticket source, updater and attachment storage)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceNowConfig {
    /// Instance URL (e.g., "https://example.service-now.com")
    pub url: String,
    pub username: String,
    pub password: String,
    /// Only tickets assigned to this group are polled.
    pub assignment_group: String,
    /// Tables to poll (default: incident and sc_req_item)
    #[serde(default = "default_tables")]
    pub tables: Vec<String>,
    /// Record field carrying the quarantined message GUID.
    #[serde(default = "default_guid_field")]
    pub message_guid_field: String,
    /// Maximum records fetched per table per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// State codes written with each outcome.
    #[serde(default)]
    pub states: ServiceNowStates,
}

fn default_tables() -> Vec<String> {
    vec!["incident".to_string(), "sc_req_item".to_string()]
}

fn default_guid_field() -> String {
    "u_message_guid".to_string()
}

fn default_batch_size() -> u32 {
    50
}

fn default_timeout() -> u32 {
    30
}

/// ServiceNow `state` codes per outcome. Unset outcomes only get a work note.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceNowStates {
    #[serde(default)]
    pub released: Option<String>,
    #[serde(default)]
    pub rejected: Option<String>,
    #[serde(default)]
    pub skipped: Option<String>,
    #[serde(default)]
    pub failed: Option<String>,
}

/// Email security gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Gateway API base URL
    pub url: String,
    /// API principal (client id)
    pub principal: String,
    /// API secret
    pub secret: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
    /// Whether the gateway supports the message status query used after
    /// ambiguous release failures.
    #[serde(default = "default_status_query")]
    pub status_query: bool,
}

fn default_status_query() -> bool {
    true
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub engine: EngineConfig,
    pub justification_policy: PolicyConfig,
    pub notifier: SanitizedNotifierConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub servicenow: Option<SanitizedServiceNowConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<SanitizedGatewayConfig>,
}

/// Sanitized notifier config (SMTP password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifierConfig {
    pub distribution_list: String,
    pub subject_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SanitizedSmtpConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSmtpConfig {
    pub host: String,
    pub port: u16,
    pub from_address: String,
    pub credentials_configured: bool,
}

/// Sanitized ServiceNow config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedServiceNowConfig {
    pub url: String,
    pub username: String,
    pub password_configured: bool,
    pub assignment_group: String,
    pub tables: Vec<String>,
    pub message_guid_field: String,
    pub batch_size: u32,
    pub timeout_secs: u32,
}

/// Sanitized gateway config (secret hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGatewayConfig {
    pub url: String,
    pub principal: String,
    pub secret_configured: bool,
    pub timeout_secs: u32,
    pub status_query: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            engine: config.engine.clone(),
            justification_policy: config.justification_policy.clone(),
            notifier: SanitizedNotifierConfig {
                distribution_list: config.notifier.distribution_list.clone(),
                subject_prefix: config.notifier.subject_prefix.clone(),
                smtp: config.notifier.smtp.as_ref().map(|s| SanitizedSmtpConfig {
                    host: s.host.clone(),
                    port: s.port,
                    from_address: s.from_address.clone(),
                    credentials_configured: s.username.is_some() && s.password.is_some(),
                }),
            },
            servicenow: config
                .servicenow
                .as_ref()
                .map(|s| SanitizedServiceNowConfig {
                    url: s.url.clone(),
                    username: s.username.clone(),
                    password_configured: !s.password.is_empty(),
                    assignment_group: s.assignment_group.clone(),
                    tables: s.tables.clone(),
                    message_guid_field: s.message_guid_field.clone(),
                    batch_size: s.batch_size,
                    timeout_secs: s.timeout_secs,
                }),
            gateway: config.gateway.as_ref().map(|g| SanitizedGatewayConfig {
                url: g.url.clone(),
                principal: g.principal.clone(),
                secret_configured: !g.secret.is_empty(),
                timeout_secs: g.timeout_secs,
                status_query: g.status_query,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::JustificationField;

    const MINIMAL: &str = r#"
[notifier]
distribution_list = "secops@example.com"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.notifier.distribution_list, "secops@example.com");
        assert_eq!(config.notifier.subject_prefix, "[qrelease]");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert_eq!(config.database.path.to_str().unwrap(), "qrelease.db");
        assert!(config.engine.enabled);
        assert!(config.servicenow.is_none());
        assert!(config.gateway.is_none());
    }

    #[test]
    fn test_deserialize_missing_notifier_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[server]
host = "127.0.0.1"
port = 9000

[database]
path = "/data/qrelease.sqlite"

[engine]
poll_interval_seconds = 30
max_concurrent_tickets = 2

[justification_policy]
required_fields = ["requester", "reasonCode", "manager_approval"]
approved_reason_codes = ["APPROVED_VENDOR"]

[notifier]
distribution_list = "secops@example.com"

[notifier.smtp]
host = "smtp.example.com"
username = "relay"
password = "hunter2"
from_address = "qrelease@example.com"

[servicenow]
url = "https://example.service-now.com"
username = "svc_qrelease"
password = "snow-secret"
assignment_group = "Email Security"

[servicenow.states]
released = "6"
rejected = "7"

[gateway]
url = "https://gateway.example.com"
principal = "client-id"
secret = "gw-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.max_concurrent_tickets, 2);
        assert!(config
            .justification_policy
            .required_fields
            .contains(&JustificationField::ManagerApproval));
        assert!(config
            .justification_policy
            .approved_reason_codes
            .contains("APPROVED_VENDOR"));

        let smtp = config.notifier.smtp.as_ref().unwrap();
        assert_eq!(smtp.port, 587);

        let snow = config.servicenow.as_ref().unwrap();
        assert_eq!(snow.tables, vec!["incident", "sc_req_item"]);
        assert_eq!(snow.message_guid_field, "u_message_guid");
        assert_eq!(snow.batch_size, 50);
        assert_eq!(snow.states.released.as_deref(), Some("6"));
        assert!(snow.states.failed.is_none());

        let gateway = config.gateway.as_ref().unwrap();
        assert_eq!(gateway.timeout_secs, 30);
        assert!(gateway.status_query);
    }

    #[test]
    fn test_unknown_required_field_fails() {
        let toml = r#"
[justification_policy]
required_fields = ["favourite_colour"]

[notifier]
distribution_list = "secops@example.com"
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[notifier]
distribution_list = "secops@example.com"

[notifier.smtp]
host = "smtp.example.com"
username = "relay"
password = "hunter2"
from_address = "qrelease@example.com"

[servicenow]
url = "https://example.service-now.com"
username = "svc_qrelease"
password = "snow-secret"
assignment_group = "Email Security"

[gateway]
url = "https://gateway.example.com"
principal = "client-id"
secret = "gw-secret"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);

        assert!(sanitized.notifier.smtp.as_ref().unwrap().credentials_configured);
        assert!(sanitized.servicenow.as_ref().unwrap().password_configured);
        assert!(sanitized.gateway.as_ref().unwrap().secret_configured);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("hunter2"));
        assert!(!json.contains("snow-secret"));
        assert!(!json.contains("gw-secret"));
    }
}
