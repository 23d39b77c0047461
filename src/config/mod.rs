use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, Result};
use crate::parser::SearchCriteria;
use crate::sources::KNOWN_SOURCES;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub applicant: ApplicantProfile,
    pub search: SearchConfig,
    pub sources: SourcesConfig,
    pub pacing: PacingConfig,
    pub schedule: ScheduleConfig,
    pub storage: StorageConfig,
    pub notifications: NotificationConfig,
    pub browser: BrowserSettings,
    pub api: ApiConfig,
}

/// Personal data typed into contact forms.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct ApplicantProfile {
    pub salutation: String, // "Herr", "Frau", "Divers"
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub street: String,
    pub postal_code: String,
    pub city: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearchConfig {
    pub cities: Vec<String>,
    pub max_price: f64,
    pub min_rooms: u32,
    pub max_rooms: u32,
}

impl SearchConfig {
    pub fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            max_price: self.max_price,
            min_rooms: self.min_rooms,
            max_rooms: self.max_rooms,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourcesConfig {
    pub enabled: Vec<String>,
    pub immonet: ImmonetSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ImmonetSettings {
    pub base_url: String,
    pub search_path: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub page_settle: Duration,
    pub location_ids: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PacingConfig {
    #[serde(with = "humantime_serde")]
    pub apply_delay_min: Duration,
    #[serde(with = "humantime_serde")]
    pub apply_delay_max: Duration,
    #[serde(with = "humantime_serde")]
    pub discovery_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub database_url: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub notify_on_new_listings: bool,
    pub notify_on_errors: bool,
    pub min_listings: usize,
    pub max_per_day: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_data_root: PathBuf,
    #[serde(with = "humantime_serde")]
    pub launch_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            user_data_root: std::env::temp_dir().join("rental-dispatch"),
            launch_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for ImmonetSettings {
    fn default() -> Self {
        let location_ids = [
            ("Berlin", "AD08DE8634"),
            ("München", "AD08DE8635"),
            ("Hamburg", "AD08DE8636"),
        ]
        .into_iter()
        .map(|(city, id)| (city.to_string(), id.to_string()))
        .collect();

        Self {
            base_url: "https://www.immonet.de".to_string(),
            search_path: "/classified-search".to_string(),
            request_timeout: Duration::from_secs(30),
            page_settle: Duration::from_secs(3),
            location_ids,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            applicant: ApplicantProfile {
                salutation: "Herr".to_string(),
                ..ApplicantProfile::default()
            },
            search: SearchConfig {
                cities: vec!["Berlin".to_string(), "München".to_string(), "Hamburg".to_string()],
                max_price: 2000.0,
                min_rooms: 1,
                max_rooms: 5,
            },
            sources: SourcesConfig {
                enabled: vec!["immonet".to_string()],
                immonet: ImmonetSettings::default(),
            },
            pacing: PacingConfig {
                apply_delay_min: Duration::from_secs(30),
                apply_delay_max: Duration::from_secs(60),
                discovery_timeout: Duration::from_secs(60),
            },
            schedule: ScheduleConfig {
                interval: Duration::from_secs(30 * 60),
                cooldown: Duration::from_secs(10 * 60),
            },
            storage: StorageConfig {
                database_url: "sqlite://rental_dispatch.db".to_string(),
            },
            notifications: NotificationConfig {
                webhook_url: None,
                notify_on_new_listings: true,
                notify_on_errors: true,
                min_listings: 1,
                max_per_day: 10,
            },
            browser: BrowserSettings::default(),
            api: ApiConfig {
                enabled: false,
                port: 8080,
            },
        }
    }
}

#[async_trait::async_trait]
pub trait ConfigManager {
    async fn load_config(&self) -> Result<Config>;
    async fn save_config(&self, config: &Config) -> Result<()>;
    fn validate_config(&self, config: &Config) -> Result<()>;
}

pub struct FileConfigManager {
    config_path: PathBuf,
}

impl FileConfigManager {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.config_path
    }
}

#[async_trait::async_trait]
impl ConfigManager for FileConfigManager {
    async fn load_config(&self) -> Result<Config> {
        info!("Loading configuration from {:?}", self.config_path);

        // check if config file exists, create default if not
        if !self.config_path.exists() {
            warn!("Configuration file not found, creating default config at {:?}", self.config_path);
            self.create_default_config().await?;
        }

        let config_content = fs::read_to_string(&self.config_path)
            .map_err(|e| DispatchError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&config_content)
            .map_err(|e| DispatchError::Config(format!("Failed to parse TOML config: {}", e)))?;

        self.validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    fn validate_config(&self, config: &Config) -> Result<()> {
        debug!("Validating configuration");

        // checking search config
        if config.search.cities.is_empty() {
            return Err(config_error("search.cities cannot be empty"));
        }
        for city in &config.search.cities {
            if city.trim().is_empty() {
                return Err(config_error("City name cannot be empty"));
            }
        }
        if config.search.max_price <= 0.0 {
            return Err(config_error("search.max_price must be greater than 0"));
        }
        if config.search.min_rooms > config.search.max_rooms {
            return Err(config_error("search.min_rooms cannot exceed search.max_rooms"));
        }

        // checking sources
        if config.sources.enabled.is_empty() {
            return Err(config_error("At least one source must be enabled"));
        }
        for name in &config.sources.enabled {
            if !KNOWN_SOURCES.contains(&name.as_str()) {
                return Err(config_error(&format!(
                    "Unknown source '{}', must be one of: {:?}",
                    name, KNOWN_SOURCES
                )));
            }
        }
        let immonet = &config.sources.immonet;
        if !immonet.base_url.starts_with("http://") && !immonet.base_url.starts_with("https://") {
            return Err(config_error("sources.immonet.base_url must start with http:// or https://"));
        }

        // checking pacing
        if config.pacing.apply_delay_min > config.pacing.apply_delay_max {
            return Err(config_error("pacing.apply_delay_min must not exceed apply_delay_max"));
        }
        if config.pacing.discovery_timeout.is_zero() {
            return Err(config_error("pacing.discovery_timeout must be greater than 0"));
        }

        // checking schedule
        if config.schedule.interval.is_zero() {
            return Err(config_error("schedule.interval must be greater than 0"));
        }

        if config.storage.database_url.trim().is_empty() {
            return Err(config_error("storage.database_url cannot be empty"));
        }

        // checking notifications
        if let Some(ref webhook_url) = config.notifications.webhook_url {
            if !webhook_url.starts_with("http://") && !webhook_url.starts_with("https://") {
                return Err(config_error("notifications.webhook_url must start with http:// or https://"));
            }
        }

        if config.api.enabled && config.api.port < 1024 {
            return Err(config_error("api.port must be between 1024 and 65535"));
        }

        // an empty profile is allowed but forms will go out blank
        if config.applicant.email.is_empty() {
            warn!("applicant.email is empty, contact forms will be incomplete");
        }

        debug!("Configuration validation passed");
        Ok(())
    }

    async fn save_config(&self, config: &Config) -> Result<()> {
        info!("Saving configuration to {:?}", self.config_path);

        let toml_content = toml::to_string_pretty(config)
            .map_err(|e| DispatchError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(&self.config_path, toml_content)
            .map_err(|e| DispatchError::Config(format!("Failed to write config file: {}", e)))?;

        info!("Configuration saved successfully");
        Ok(())
    }
}

impl FileConfigManager {
    /// Create a default configuration file
    pub async fn create_default_config(&self) -> Result<()> {
        let default_config = Config::default();
        let toml_content = toml::to_string_pretty(&default_config)
            .map_err(|e| DispatchError::Config(format!("Failed to serialize default config: {}", e)))?;

        if let Some(parent) = self.config_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| DispatchError::Config(format!("Failed to create config directory: {}", e)))?;
            }
        }

        fs::write(&self.config_path, toml_content)
            .map_err(|e| DispatchError::Config(format!("Failed to write default config: {}", e)))?;

        info!("Default configuration file created at {:?}", self.config_path);
        Ok(())
    }
}

fn config_error(message: &str) -> Box<dyn std::error::Error + Send + Sync> {
    DispatchError::Config(message.to_string()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_load_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = FileConfigManager::new(config_path.clone());

        let config = manager.load_config().await.unwrap();

        assert_eq!(config.search.cities, vec!["Berlin", "München", "Hamburg"]);
        assert_eq!(config.pacing.apply_delay_min, Duration::from_secs(30));
        assert_eq!(config.pacing.apply_delay_max, Duration::from_secs(60));
        assert_eq!(config.schedule.cooldown, Duration::from_secs(600));
        assert_eq!(config.schedule.interval, Duration::from_secs(1800));
        assert_eq!(config.notifications.max_per_day, 10);
        assert!(config_path.exists());
    }

    #[tokio::test]
    async fn test_humantime_durations_in_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        let manager = FileConfigManager::new(config_path.clone());

        let mut config = Config::default();
        config.schedule.cooldown = Duration::from_secs(5 * 60);
        manager.save_config(&config).await.unwrap();

        let raw = fs::read_to_string(&config_path).unwrap();
        assert!(raw.contains("cooldown = \"5m\""));

        let edited = raw.replace("cooldown = \"5m\"", "cooldown = \"90s\"");
        fs::write(&config_path, edited).unwrap();

        let reloaded = manager.load_config().await.unwrap();
        assert_eq!(reloaded.schedule.cooldown, Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_invalid_file_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "this is = not [valid").unwrap();

        let manager = FileConfigManager::new(config_path);
        assert!(manager.load_config().await.is_err());
    }

    #[test]
    fn test_config_validation() {
        let manager = FileConfigManager::new(PathBuf::from("test.toml"));

        let valid_config = Config::default();
        assert!(manager.validate_config(&valid_config).is_ok());

        let mut invalid_config = Config::default();
        invalid_config.search.cities.clear();
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.search.min_rooms = 4;
        invalid_config.search.max_rooms = 2;
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.pacing.apply_delay_min = Duration::from_secs(90);
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.sources.enabled = vec!["immoscout".to_string()];
        assert!(manager.validate_config(&invalid_config).is_err());

        let mut invalid_config = Config::default();
        invalid_config.notifications.webhook_url = Some("ftp://example.com".to_string());
        assert!(manager.validate_config(&invalid_config).is_err());
    }

    #[test]
    fn test_criteria_from_search() {
        let config = Config::default();
        let criteria = config.search.criteria();
        assert_eq!(criteria.max_price, 2000.0);
        assert_eq!(criteria.min_rooms, 1);
        assert_eq!(criteria.max_rooms, 5);
    }
}
