use serde::Deserialize;
use std::time::Duration;

use crate::models::dataset::ColumnNames;
use crate::services::oauth::OAuthSettings;

/// Where annotation files live.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Drive,
    R2,
    Local,
}

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "127.0.0.1:3000").
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    #[serde(default = "default_backend")]
    pub storage_backend: StorageBackend,

    /// Seconds before a background upload is reported as timed out
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    #[serde(default = "default_title_column")]
    pub title_column: String,
    #[serde(default = "default_organization_column")]
    pub organization_column: String,
    #[serde(default = "default_description_column")]
    pub description_column: String,
    #[serde(default = "default_label_column")]
    pub label_column: String,

    // Google OAuth client (drive backend)
    pub google_client_id: Option<String>,
    pub google_client_secret: Option<String>,
    #[serde(default = "default_authorize_url")]
    pub google_authorize_url: String,
    #[serde(default = "default_token_url")]
    pub google_token_url: String,
    #[serde(default = "default_revoke_url")]
    pub google_revoke_url: String,
    #[serde(default = "default_redirect_uri")]
    pub oauth_redirect_uri: String,

    // R2 (S3-compatible) bucket
    pub r2_bucket: Option<String>,
    pub r2_endpoint: Option<String>,
    pub r2_access_key: Option<String>,
    pub r2_secret_key: Option<String>,
    #[serde(default)]
    pub r2_prefix: String,

    /// Directory of CSV files (local backend)
    pub local_data_dir: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_backend() -> StorageBackend {
    StorageBackend::Drive
}

fn default_sync_timeout_secs() -> u64 {
    30
}

fn default_title_column() -> String {
    ColumnNames::default().title
}

fn default_organization_column() -> String {
    ColumnNames::default().organization
}

fn default_description_column() -> String {
    ColumnNames::default().description
}

fn default_label_column() -> String {
    ColumnNames::default().label
}

fn default_authorize_url() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_revoke_url() -> String {
    "https://oauth2.googleapis.com/revoke".to_string()
}

fn default_redirect_uri() -> String {
    "http://localhost:3000/auth/callback".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn columns(&self) -> ColumnNames {
        ColumnNames {
            title: self.title_column.clone(),
            organization: self.organization_column.clone(),
            description: self.description_column.clone(),
            label: self.label_column.clone(),
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_secs(self.sync_timeout_secs)
    }

    pub fn oauth_settings(&self) -> Result<OAuthSettings, ConfigError> {
        Ok(OAuthSettings {
            client_id: required(&self.google_client_id, "GOOGLE_CLIENT_ID")?,
            client_secret: required(&self.google_client_secret, "GOOGLE_CLIENT_SECRET")?,
            authorize_url: self.google_authorize_url.clone(),
            token_url: self.google_token_url.clone(),
            revoke_url: self.google_revoke_url.clone(),
            redirect_uri: self.oauth_redirect_uri.clone(),
        })
    }
}

/// Value of an optional setting that the selected backend needs.
pub fn required(value: &Option<String>, name: &'static str) -> Result<String, ConfigError> {
    value
        .clone()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(name))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set for the configured storage backend")]
    Missing(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_minimal_env() {
        let vars = vec![("STORAGE_BACKEND".to_string(), "local".to_string())];
        let config: AppConfig = envy::from_iter(vars).unwrap();

        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.sync_timeout(), Duration::from_secs(30));
        assert_eq!(config.columns(), ColumnNames::default());
        assert!(config.local_data_dir.is_none());
    }

    #[test]
    fn test_oauth_settings_require_client_credentials() {
        let vars = vec![("GOOGLE_CLIENT_ID".to_string(), "abc".to_string())];
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Drive);
        assert!(matches!(
            config.oauth_settings(),
            Err(ConfigError::Missing("GOOGLE_CLIENT_SECRET"))
        ));
    }

    #[test]
    fn test_column_overrides() {
        let vars = vec![
            ("LABEL_COLUMN".to_string(), "is_ai".to_string()),
            ("SYNC_TIMEOUT_SECS".to_string(), "5".to_string()),
        ];
        let config: AppConfig = envy::from_iter(vars).unwrap();
        assert_eq!(config.columns().label, "is_ai");
        assert_eq!(config.sync_timeout(), Duration::from_secs(5));
    }
}
