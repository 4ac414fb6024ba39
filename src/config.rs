use ::config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

use crate::levels::AllocationPolicy;
use crate::normalize::truncate::DEFAULT_MAX_WORDS;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{0}` (set DUST_{upper} or add it to dust.toml)", upper = .0.to_uppercase())]
    Missing(&'static str),
    #[error(transparent)]
    Load(#[from] ::config::ConfigError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub apify_token: Option<String>,
    pub apify_actor_id: String,
    pub apify_fallback_actor_id: Option<String>,
    pub apify_timeout_secs: u64,
    pub spider_api_key: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_base_url: String,
    pub llm_model: String,
    pub convex_url: Option<String>,
    pub workers: usize,
    pub retries: u32,
    pub max_words: usize,
    pub cache_dir: String,
    pub allocation: AllocationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            apify_token: None,
            apify_actor_id: "apify/website-content-crawler".into(),
            apify_fallback_actor_id: None,
            apify_timeout_secs: 120,
            spider_api_key: None,
            llm_api_key: None,
            llm_base_url: "https://api.deepinfra.com/v1/openai".into(),
            llm_model: "meta-llama/Llama-3.3-70B-Instruct-Turbo".into(),
            convex_url: None,
            workers: 40,
            retries: 2,
            max_words: DEFAULT_MAX_WORDS,
            cache_dir: "cache".into(),
            allocation: AllocationPolicy::Submission,
        }
    }
}

impl PipelineConfig {
    /// Optional `dust.toml`, then `DUST_*` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(File::with_name("dust").required(false))
            .add_source(Environment::with_prefix("DUST").try_parsing(true))
            .build()?;
        Self::from_config(settings)
    }

    fn from_config(settings: Config) -> Result<Self, ConfigError> {
        let mut cfg: Self = settings.try_deserialize()?;
        // Blank values behave as unset.
        for field in [
            &mut cfg.apify_token,
            &mut cfg.apify_fallback_actor_id,
            &mut cfg.spider_api_key,
            &mut cfg.llm_api_key,
            &mut cfg.convex_url,
        ] {
            if field.as_deref().is_some_and(|v| v.trim().is_empty()) {
                *field = None;
            }
        }
        cfg.workers = cfg.workers.max(1);
        Ok(cfg)
    }

    pub fn llm_api_key(&self) -> Result<&str, ConfigError> {
        self.llm_api_key
            .as_deref()
            .ok_or(ConfigError::Missing("llm_api_key"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_sources() {
        let cfg = PipelineConfig::from_config(Config::builder().build().unwrap()).unwrap();
        assert_eq!(cfg.workers, 40);
        assert_eq!(cfg.retries, 2);
        assert_eq!(cfg.max_words, 1000);
        assert_eq!(cfg.apify_actor_id, "apify/website-content-crawler");
        assert_eq!(cfg.allocation, AllocationPolicy::Submission);
        assert!(cfg.convex_url.is_none());
    }

    #[test]
    fn overrides_and_blank_values() {
        let settings = Config::builder()
            .set_override("workers", 8)
            .unwrap()
            .set_override("allocation", "complexity")
            .unwrap()
            .set_override("convex_url", "  ")
            .unwrap()
            .set_override("llm_api_key", "sk-test")
            .unwrap()
            .build()
            .unwrap();
        let cfg = PipelineConfig::from_config(settings).unwrap();
        assert_eq!(cfg.workers, 8);
        assert_eq!(cfg.allocation, AllocationPolicy::Complexity);
        assert!(cfg.convex_url.is_none());
        assert_eq!(cfg.llm_api_key().unwrap(), "sk-test");
    }

    #[test]
    fn missing_key_names_the_setting() {
        let err = PipelineConfig::default().llm_api_key().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required setting `llm_api_key` (set DUST_LLM_API_KEY or add it to dust.toml)"
        );
    }
}
