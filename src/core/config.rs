use serde::{Deserialize, Serialize};
use crate::core::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub expression_cache_size: usize,           // Compiled expressions kept by SharedDatabase
    pub sample_seed: Option<u64>,               // Used when a sampling call brings no seed
    pub allow_backslash_continuation: bool,     // `value\` joins the next physical line
}

impl Default for Config {
    fn default() -> Self {
        Config {
            expression_cache_size: 128,
            sample_seed: None,
            allow_backslash_continuation: true,
        }
    }
}

impl Config {
    /// Load a config from JSON; missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
