//! Steerscope - dashboards over the Neuronpedia feature API
//!
//! This crate provides:
//! - A typed client for the Neuronpedia search, neuron and steer-chat endpoints
//! - Session state for feature selection, steering chats and token inspection
//! - Command handlers that separate state transitions from remote calls
//! - An HTTP server hosting the Steer and Microscope dashboards

pub mod activation;
pub mod api;
pub mod client;
pub mod dashboard;
pub mod inspection;
pub mod render;
pub mod selection;
pub mod steering;
pub mod tokenizer;

pub use client::{ClientError, NeuronpediaApi, NeuronpediaClient};
pub use dashboard::{MicroscopeDashboard, Notice, SteerDashboard};
pub use tokenizer::tokenize;

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Environment variable that overrides the configured API key
pub const API_KEY_ENV: &str = "NEURONPEDIA_API_KEY";

/// Errors loading configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Configuration for both dashboards
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    /// Base URL of the Neuronpedia API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// API key sent as `X-Api-Key`
    #[serde(default)]
    pub api_key: String,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Log level for the binaries: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub steer: SteerConfig,

    #[serde(default)]
    pub microscope: MicroscopeConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

fn default_api_base_url() -> String { "https://www.neuronpedia.org".to_string() }
fn default_timeout_secs() -> u64 { 120 }
fn default_log_level() -> String { "info".to_string() }

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            api_key: String::new(),
            timeout_secs: default_timeout_secs(),
            log_level: default_log_level(),
            steer: SteerConfig::default(),
            microscope: MicroscopeConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl ScopeConfig {
    /// Parse a config from TOML text
    pub fn from_toml(path: &str, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    /// Load config from a file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&display, &contents)
    }

    /// Replace the API key with the environment override, if set
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
        self
    }
}

/// Steer dashboard settings
#[derive(Debug, Clone, Deserialize)]
pub struct SteerConfig {
    /// Model the steering chat runs against
    #[serde(default = "default_steer_model")]
    pub model_id: String,
}

fn default_steer_model() -> String { "gemma-2-9b-it".to_string() }

impl Default for SteerConfig {
    fn default() -> Self {
        Self { model_id: default_steer_model() }
    }
}

/// Microscope dashboard settings
#[derive(Debug, Clone, Deserialize)]
pub struct MicroscopeConfig {
    #[serde(default = "default_microscope_model")]
    pub model_id: String,

    /// SAE source set searched for token explanations
    #[serde(default = "default_source_set")]
    pub source_set: String,

    #[serde(default = "default_selected_layers")]
    pub selected_layers: Vec<String>,

    /// Maximum explanation results per token
    #[serde(default = "default_num_results")]
    pub num_results: u32,
}

fn default_microscope_model() -> String { "gpt2-small".to_string() }
fn default_source_set() -> String { "res-jb".to_string() }
fn default_selected_layers() -> Vec<String> { vec!["6-res-jb".to_string()] }
fn default_num_results() -> u32 { 50 }

impl Default for MicroscopeConfig {
    fn default() -> Self {
        Self {
            model_id: default_microscope_model(),
            source_set: default_source_set(),
            selected_layers: default_selected_layers(),
            num_results: default_num_results(),
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Dashboard sessions unused for this long are dropped (seconds)
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_bind() -> String { "0.0.0.0:8080".to_string() }
fn default_session_idle_secs() -> u64 { 3600 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}
