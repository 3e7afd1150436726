//! Manages application configuration by loading settings from standard locations.
//!
//! This crate provides a unified configuration object (`Config`) that aggregates
//! settings from files and environment variables, making them accessible
//! globally via a lazily initialized static reference (`CONFIG`).

use std::path::PathBuf;
use std::sync::LazyLock;

use etcetera::BaseStrategy;
use figment::providers::{Env, Format, Toml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};

/// The default configuration values
const DEFAULT_TOML_CONFIG: &str = include_str!("./floc.default.toml");

//================================================================================================
// Statics
//================================================================================================

/// Provides a lazily instantiated static reference to the application `Config`.
///
/// This static variable ensures that configuration is parsed only once from
/// canonical locations and then made immutably available throughout the
/// application's lifecycle.
pub static CONFIG: LazyLock<Config> = LazyLock::new(load_config);

//================================================================================================
// Types
//================================================================================================

/// Defines cache-related configuration settings.
#[derive(Deserialize, Serialize)]
pub struct CacheConfig {
    /// The root directory for download and git checkout caches.
    pub root: PathBuf,
}

/// Represents the application's primary configuration structure.
#[derive(Deserialize, Serialize, Default)]
pub struct Config {
    /// Store-related settings.
    #[serde(default)]
    pub store: StoreConfig,
    /// Cache-related settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Locations of the persistent flake registries.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Settings for the GitHub tarball fetcher.
    #[serde(default)]
    pub github: GithubConfig,
    /// Settings shared by the git fetchers.
    #[serde(default)]
    pub git: GitConfig,
    /// Settings governing fetch caching.
    #[serde(default)]
    pub fetch: FetchConfig,
}

/// Settings governing fetch caching.
#[derive(Deserialize, Serialize)]
pub struct FetchConfig {
    /// How long, in seconds, a cached tarball for a mutable reference stays fresh.
    pub tarball_ttl: u64,
}

/// Settings shared by the git fetchers.
#[derive(Deserialize, Serialize)]
pub struct GitConfig {
    /// The branch assumed when a reference carries neither `ref` nor `rev`.
    pub default_ref: String,
}

/// Settings for the GitHub tarball fetcher.
#[derive(Deserialize, Serialize)]
pub struct GithubConfig {
    /// Base URL of the GitHub REST API.
    pub api_base: String,
}

/// Locations of the persistent flake registries.
#[derive(Deserialize, Serialize)]
pub struct RegistryConfig {
    /// The per-user registry, consulted after the global registry.
    pub user: PathBuf,
    /// The system-wide registry, consulted after the user registry.
    pub system: PathBuf,
}

/// Defines store-related configuration settings.
#[derive(Deserialize, Serialize)]
pub struct StoreConfig {
    /// The root directory of the local source store.
    pub root: PathBuf,
}

//================================================================================================
// Impls
//================================================================================================

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: cache_dir().join("floc"),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { tarball_ttl: 3600 }
    }
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_ref: "master".into(),
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.github.com".into(),
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            user: config_dir().join("nix/registry.json"),
            system: data_dir().join("nix/flake-registry.json"),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("floc/store"),
        }
    }
}

impl Config {
    /// Constructs a `Figment` instance for configuration loading.
    ///
    /// This method builds a configuration provider by layering default settings,
    /// user-specific configuration files, and environment variables.
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Config::default()).merge(Toml::string(DEFAULT_TOML_CONFIG));

        if let Ok(c) = etcetera::choose_base_strategy() {
            let config = c.config_dir().join("floc.toml");
            fig = fig.admerge(Toml::file(config));
        }

        fig.admerge(Env::prefixed("FLOC_"))
    }

    /// Creates a `Config` instance from a given provider.
    pub fn from<T: Provider>(provider: T) -> Result<Config, Box<figment::Error>> {
        Figment::from(provider).extract().map_err(Box::new)
    }
}

impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        Metadata::named("Floc CLI Config")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Determines the appropriate cache directory based on the operating system.
fn cache_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.cache_dir()
    } else {
        std::env::temp_dir()
    }
}

/// Determines the appropriate configuration directory based on the operating system.
fn config_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.config_dir()
    } else {
        std::env::temp_dir()
    }
}

/// Determines the appropriate data directory based on the operating system.
fn data_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.data_dir()
    } else {
        std::env::temp_dir()
    }
}

/// Loads the application configuration using the default `Figment` provider.
///
/// This function is used to initialize the `CONFIG` static variable.
fn load_config() -> Config {
    Config::figment().extract().unwrap_or_else(|e| {
        tracing::error!(error = %e, "problem loading config from default sources, falling back to built-in defaults");
        Config::default()
    })
}
