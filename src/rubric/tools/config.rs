use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::rubric::tools::error::{Result, ToolError};

/// Endpoint used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.codepost.io/";
/// Environment variable the command line reads the API credential from.
pub const API_KEY_ENV: &str = "CODEPOST_API_KEY";
/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "codepost-config.json";

/// Connection settings threaded through the request layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub api_key: Option<String>,
    pub base_url: Url,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    api_key: Option<String>,
    base_url: Option<String>,
}

impl Config {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            api_key: Some(api_key.into()),
            base_url: default_base_url()?,
        })
    }

    /// Settings without a credential; any request built from them fails
    /// with a configuration error.
    pub fn anonymous() -> Result<Self> {
        Ok(Self {
            api_key: None,
            base_url: default_base_url()?,
        })
    }

    /// Loads a JSON config file of the form `{"api_key": "...", "base_url": "..."}`.
    pub fn load(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        let file: ConfigFile = serde_json::from_str(&source)?;
        debug!(path = %path.display(), "loaded config file");
        let base_url = match file.base_url {
            Some(raw) => parse_base_url(&raw)?,
            None => default_base_url()?,
        };
        Ok(Self {
            api_key: file.api_key.filter(|value| !value.trim().is_empty()),
            base_url,
        })
    }

    /// Replaces the endpoint, normalising it to end with a slash so relative
    /// collection paths join underneath it.
    pub fn with_base_url(mut self, raw: &str) -> Result<Self> {
        self.base_url = parse_base_url(raw)?;
        Ok(self)
    }

    /// The API credential, or a configuration error when none was provided.
    pub fn api_key(&self) -> Result<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            ToolError::config(format!(
                "no API key configured; set {API_KEY_ENV} or add \"api_key\" to \
                 {DEFAULT_CONFIG_FILE}"
            ))
        })
    }
}

fn default_base_url() -> Result<Url> {
    parse_base_url(DEFAULT_BASE_URL)
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let normalised = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    };
    Url::parse(&normalised)
        .map_err(|error| ToolError::config(format!("invalid base URL '{trimmed}': {error}")))
}
