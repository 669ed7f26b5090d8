//! Service configuration.
//!
//! Loaded from `leadcast/config.json` under the platform config directory;
//! a missing file falls back to defaults so the service can start and
//! report what needs filling in.

use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// OAuth client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSettings {
    /// Provider preset: "google" or "microsoft".
    pub provider: String,
    /// Client ID from the provider console.
    pub client_id: String,
    /// Client secret (optional for public clients).
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self {
            provider: "google".to_string(),
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://localhost:8823/oauth/callback".to_string(),
        }
    }
}

/// Default campaign content used when a run request carries none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSettings {
    /// Campaign identifier.
    pub id: String,
    /// Template name written back to the sheet.
    pub template_name: String,
    /// Subject line with placeholders.
    pub subject: String,
    /// HTML body with placeholders.
    pub html_body: String,
    /// Maximum leads per batch.
    pub batch_size: usize,
    /// Pacing mode: "random", "progressive", or "smart".
    pub pacing: String,
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            id: "default".to_string(),
            template_name: "intro-v1".to_string(),
            subject: "Quick question, {{name}}".to_string(),
            html_body: "<p>Hi {{name}},</p><p>I noticed {{company}} and wanted to reach out.</p>"
                .to_string(),
            batch_size: 25,
            pacing: "smart".to_string(),
        }
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the operator HTTP surface binds to.
    pub listen_addr: String,
    /// Session database path; defaults under the platform data directory.
    #[serde(default)]
    pub database_path: Option<String>,
    /// Lead sheet rows API base URL.
    pub sheet_base_url: String,
    /// Mail provider API base URL.
    pub mail_base_url: String,
    /// OAuth client settings.
    pub oauth: OAuthSettings,
    /// Default campaign content.
    pub campaign: CampaignSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8823".to_string(),
            database_path: None,
            sheet_base_url: "https://sheets.example.com/v1/workbooks/leads/".to_string(),
            mail_base_url: "https://mail.example.com/v1/me/".to_string(),
            oauth: OAuthSettings::default(),
            campaign: CampaignSettings::default(),
        }
    }
}

impl AppConfig {
    /// Path of the config file.
    #[must_use]
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("leadcast").join("config.json"))
    }

    /// Loads the configuration, falling back to defaults when no file
    /// exists yet.
    ///
    /// # Errors
    ///
    /// Returns an error when the file exists but cannot be read or parsed.
    pub fn load() -> anyhow::Result<Self> {
        let Some(path) = Self::config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config from {}", path.display()))?;
        Ok(config)
    }

    /// Resolves the session database path, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error when the directory cannot be created.
    pub fn resolve_database_path(&self) -> anyhow::Result<String> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }

        let dir = dirs::data_dir()
            .context("no platform data directory available")?
            .join("leadcast");
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        Ok(dir.join("sessions.db").to_string_lossy().into_owned())
    }
}
