//! Configuration file handling for remotecar

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "remotecar";

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Default region
    pub region: Option<String>,
    /// Default account
    pub username: Option<String>,
    /// Where sessions are persisted
    pub token_store: Option<PathBuf>,
    /// YAML client configuration (timeouts, retries, polling)
    pub client_config: Option<PathBuf>,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(config_dir()?.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(&self, args: Args<'_>) -> Result<MergedConfig> {
        let region = args
            .region
            .map(String::from)
            .or_else(|| self.region.clone())
            .context("No region given; pass --region or set it in the config file")?;
        let token_store = match args.token_store.or(self.token_store.as_deref()) {
            Some(path) => path.to_path_buf(),
            None => config_dir()?.join("tokens.json"),
        };

        Ok(MergedConfig {
            region,
            username: args
                .username
                .map(String::from)
                .or_else(|| self.username.clone()),
            token_store,
            client_config: self.client_config.clone(),
            output: args
                .output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "table".to_string()),
            no_color: args.no_color || self.no_color.unwrap_or(false),
        })
    }
}

/// Command-line values that override the config file
#[derive(Debug, Default, Clone, Copy)]
pub struct Args<'a> {
    pub region: Option<&'a str>,
    pub username: Option<&'a str>,
    pub token_store: Option<&'a Path>,
    pub output: Option<&'a str>,
    pub no_color: bool,
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub region: String,
    pub username: Option<String>,
    pub token_store: PathBuf,
    pub client_config: Option<PathBuf>,
    pub output: String,
    pub no_color: bool,
}

fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .context("Could not determine config directory")?
        .join(APP_DIR))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_override_file() {
        let config: Config = toml::from_str(
            r#"
            region = "china"
            username = "file-user"
            token_store = "/tmp/tokens.json"
            output = "json"
            "#,
        )
        .unwrap();

        let merged = config
            .merge_with_args(Args {
                region: Some("rest_of_world"),
                no_color: true,
                ..Args::default()
            })
            .unwrap();

        assert_eq!(merged.region, "rest_of_world");
        assert_eq!(merged.username.as_deref(), Some("file-user"));
        assert_eq!(merged.token_store, PathBuf::from("/tmp/tokens.json"));
        assert_eq!(merged.output, "json");
        assert!(merged.no_color);
    }

    #[test]
    fn test_region_is_required() {
        let err = Config::default()
            .merge_with_args(Args::default())
            .unwrap_err();
        assert!(err.to_string().contains("--region"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "region = \"north_america\"\nno_color = true\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.region.as_deref(), Some("north_america"));
        assert_eq!(config.no_color, Some(true));
    }
}
