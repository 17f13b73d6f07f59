use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use csrd_extraction::{PipelineConfig, RetryPolicy};
use dotenvy::dotenv;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model_name: String,
    pub temperature: f32,
    /// Retries after the first model call; 3 means up to 4 attempts
    pub max_retries: u32,
    pub model_timeout: Duration,
    pub chunk_concurrency: usize,
    pub max_chunk_chars: usize,
    pub relevance_filter: bool,
    pub pattern_scan: bool,
    pub verify_low_confidence: bool,
    pub max_pages_per_group: usize,
    pub confidence_threshold: f64,
    pub report_year: i32,
    pub indicators_path: Option<PathBuf>,
    pub data_raw_dir: PathBuf,
    pub data_output_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://csrd.db?mode=rwc".to_string()),
            port: parse_var("PORT", 8080).context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()),
            openai_base_url: env::var("OPENAI_BASE_URL").ok().filter(|u| !u.is_empty()),
            model_name: env::var("MODEL_NAME").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            temperature: parse_var("EXTRACTION_TEMPERATURE", 0.0)
                .context("EXTRACTION_TEMPERATURE must be a number")?,
            max_retries: parse_var("MAX_RETRIES", 3).context("MAX_RETRIES must be a number")?,
            model_timeout: Duration::from_secs(
                parse_var("MODEL_TIMEOUT_SECS", 120)
                    .context("MODEL_TIMEOUT_SECS must be a number")?,
            ),
            chunk_concurrency: parse_var("CHUNK_CONCURRENCY", 4)
                .context("CHUNK_CONCURRENCY must be a number")?,
            max_chunk_chars: parse_var("MAX_CHUNK_CHARS", 40_000)
                .context("MAX_CHUNK_CHARS must be a number")?,
            relevance_filter: parse_var("RELEVANCE_FILTER", true)
                .context("RELEVANCE_FILTER must be true or false")?,
            pattern_scan: parse_var("PATTERN_SCAN", true)
                .context("PATTERN_SCAN must be true or false")?,
            verify_low_confidence: parse_var("VERIFY_LOW_CONFIDENCE", true)
                .context("VERIFY_LOW_CONFIDENCE must be true or false")?,
            max_pages_per_group: parse_var("MAX_PAGES_PER_GROUP", 20)
                .context("MAX_PAGES_PER_GROUP must be a number")?,
            confidence_threshold: parse_var("CONFIDENCE_THRESHOLD", 0.6)
                .context("CONFIDENCE_THRESHOLD must be a number")?,
            report_year: parse_var("REPORT_YEAR", 2024).context("REPORT_YEAR must be a year")?,
            indicators_path: env::var("INDICATORS_PATH").ok().map(PathBuf::from),
            data_raw_dir: env::var("DATA_RAW_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/raw")),
            data_output_dir: env::var("DATA_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/output")),
        })
    }

    /// Pipeline tunables derived from this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_retry(RetryPolicy::new(self.max_retries.saturating_add(1)))
            .with_call_timeout(self.model_timeout)
            .with_chunk_concurrency(self.chunk_concurrency)
            .with_max_chunk_chars(self.max_chunk_chars)
            .with_relevance_filter(self.relevance_filter)
            .with_pattern_scan(self.pattern_scan)
            .with_verification(self.verify_low_confidence)
            .with_max_pages_per_group(self.max_pages_per_group)
            .with_confidence_threshold(self.confidence_threshold)
    }
}

/// Read and parse a variable, falling back to `default` when unset.
fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {}: {:?}", name, raw)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_and_value() {
        assert_eq!(parse_var::<u16>("CSRD_TEST_UNSET_VAR", 8080).unwrap(), 8080);

        env::set_var("CSRD_TEST_PORT_VAR", "9090");
        assert_eq!(parse_var::<u16>("CSRD_TEST_PORT_VAR", 8080).unwrap(), 9090);

        env::set_var("CSRD_TEST_BAD_VAR", "abc");
        assert!(parse_var::<u16>("CSRD_TEST_BAD_VAR", 8080).is_err());
    }

    fn config(max_retries: u32) -> Config {
        Config {
            database_url: "sqlite::memory:".to_string(),
            port: 8080,
            openai_api_key: None,
            openai_base_url: None,
            model_name: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_retries,
            model_timeout: Duration::from_secs(30),
            chunk_concurrency: 2,
            max_chunk_chars: 20_000,
            relevance_filter: false,
            pattern_scan: false,
            verify_low_confidence: true,
            max_pages_per_group: 10,
            confidence_threshold: 0.7,
            report_year: 2024,
            indicators_path: None,
            data_raw_dir: PathBuf::from("data/raw"),
            data_output_dir: PathBuf::from("data/output"),
        }
    }

    #[test]
    fn test_max_retries_counts_retries_after_first_attempt() {
        assert_eq!(config(3).pipeline_config().retry.max_attempts, 4);
        assert_eq!(config(0).pipeline_config().retry.max_attempts, 1);
        assert_eq!(config(u32::MAX).pipeline_config().retry.max_attempts, u32::MAX);
    }

    #[test]
    fn test_pipeline_config_carries_settings() {
        let pipeline = config(1).pipeline_config();
        assert_eq!(pipeline.call_timeout, Duration::from_secs(30));
        assert_eq!(pipeline.chunk_concurrency, 2);
        assert!(!pipeline.relevance_filter);
        assert!(!pipeline.pattern_scan);
        assert!(pipeline.verify_low_confidence);
        assert_eq!(pipeline.confidence_threshold, 0.7);
    }
}
