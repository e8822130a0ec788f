//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use portal_api_types::CharacterStatus;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::CacheConfig;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "portal";
const DEFAULT_CATALOG_URL: &str = "https://rickandmortyapi.com/api/";
const DEFAULT_CATALOG_TIMEOUT_SECS: u64 = 10;

/// Command-line arguments for the portal-query binary.
#[derive(Debug, Parser)]
#[command(
    name = "portal-query",
    version,
    about = "Browse the character catalog from the terminal"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "PORTAL_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Search characters by name, status and species.
    Characters(CharactersArgs),
    /// List episodes, optionally filtered by name.
    Episodes(EpisodesArgs),
    /// Search locations and show the residents of one of them.
    Locations(LocationsArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the catalog base URL.
    #[arg(long = "catalog-url", value_name = "URL", global = true)]
    pub catalog_url: Option<String>,

    /// Override the catalog request timeout.
    #[arg(long = "catalog-timeout-seconds", value_name = "SECONDS", global = true)]
    pub catalog_timeout_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct CharactersArgs {
    /// Name filter.
    #[arg(long, value_name = "TEXT")]
    pub name: Option<String>,

    /// Status filter (alive|dead|unknown).
    #[arg(long, value_name = "STATUS", value_parser = parse_status)]
    pub status: Option<CharacterStatus>,

    /// Species filter.
    #[arg(long, value_name = "TEXT")]
    pub species: Option<String>,

    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: u32,
}

#[derive(Debug, Args, Clone)]
pub struct EpisodesArgs {
    /// Name filter.
    #[arg(long, value_name = "TEXT")]
    pub name: Option<String>,

    /// 1-based page number.
    #[arg(long, default_value_t = 1)]
    pub page: u32,
}

#[derive(Debug, Args, Clone)]
pub struct LocationsArgs {
    /// Location name search term.
    #[arg(long, value_name = "TEXT")]
    pub query: String,

    /// Zero-based index of the search result whose residents are shown.
    #[arg(long, value_name = "INDEX")]
    pub pick: Option<usize>,
}

fn parse_status(value: &str) -> Result<CharacterStatus, String> {
    CharacterStatus::parse(value)
        .ok_or_else(|| format!("unknown status `{value}`; expected alive, dead or unknown"))
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub catalog: CatalogSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct CatalogSettings {
    /// Base URL; always ends with `/` so endpoint paths join beneath it.
    pub base_url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub search_debounce: Duration,
    pub location_debounce: Duration,
    pub characters_stale: Duration,
    pub episodes_stale: Duration,
    pub location_search_stale: Duration,
    pub location_stale: Duration,
    pub residents_stale: Duration,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PORTAL").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the process arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    catalog: RawCatalogSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.catalog_url.as_ref() {
            self.catalog.base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.catalog_timeout_seconds {
            self.catalog.timeout_seconds = Some(seconds);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            catalog,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            catalog: build_catalog_settings(catalog)?,
            cache: build_cache_settings(cache)?,
        })
    }

    /// Cache subset of the settings in the form the cache layer consumes.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::from(&self.cache)
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::WARN,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_catalog_settings(catalog: RawCatalogSettings) -> Result<CatalogSettings, LoadError> {
    let raw_url = catalog
        .base_url
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_CATALOG_URL.to_string());

    let mut base_url = Url::parse(&raw_url)
        .map_err(|err| LoadError::invalid("catalog.base_url", format!("invalid url: {err}")))?;
    if !matches!(base_url.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "catalog.base_url",
            "scheme must be http or https",
        ));
    }
    if !base_url.path().ends_with('/') {
        let path = format!("{}/", base_url.path());
        base_url.set_path(&path);
    }

    let timeout_seconds = catalog
        .timeout_seconds
        .unwrap_or(DEFAULT_CATALOG_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "catalog.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(CatalogSettings {
        base_url,
        timeout: Duration::from_secs(timeout_seconds),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheConfig::default();

    Ok(CacheSettings {
        search_debounce: non_zero_millis(
            cache.search_debounce_ms.unwrap_or(defaults.search_debounce_ms),
            "cache.search_debounce_ms",
        )?,
        location_debounce: non_zero_millis(
            cache
                .location_debounce_ms
                .unwrap_or(defaults.location_debounce_ms),
            "cache.location_debounce_ms",
        )?,
        characters_stale: non_zero_millis(
            cache.characters_stale_ms.unwrap_or(defaults.characters_stale_ms),
            "cache.characters_stale_ms",
        )?,
        episodes_stale: non_zero_millis(
            cache.episodes_stale_ms.unwrap_or(defaults.episodes_stale_ms),
            "cache.episodes_stale_ms",
        )?,
        location_search_stale: non_zero_millis(
            cache
                .location_search_stale_ms
                .unwrap_or(defaults.location_search_stale_ms),
            "cache.location_search_stale_ms",
        )?,
        location_stale: non_zero_millis(
            cache.location_stale_ms.unwrap_or(defaults.location_stale_ms),
            "cache.location_stale_ms",
        )?,
        residents_stale: non_zero_millis(
            cache.residents_stale_ms.unwrap_or(defaults.residents_stale_ms),
            "cache.residents_stale_ms",
        )?,
        retry_attempts: cache.retry_attempts.unwrap_or(defaults.retry_attempts),
        retry_delay: Duration::from_millis(
            cache.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
        ),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCatalogSettings {
    base_url: Option<String>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    search_debounce_ms: Option<u64>,
    location_debounce_ms: Option<u64>,
    characters_stale_ms: Option<u64>,
    episodes_stale_ms: Option<u64>,
    location_search_stale_ms: Option<u64>,
    location_stale_ms: Option<u64>,
    residents_stale_ms: Option<u64>,
    retry_attempts: Option<u32>,
    retry_delay_ms: Option<u64>,
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}
