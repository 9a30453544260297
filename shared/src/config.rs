//! Configuration management for Lambda functions.

use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Database host
    pub db_host: String,
    /// Database name
    pub db_name: String,
    /// ARN of the secret containing database credentials
    pub db_secret_arn: String,
    /// AWS region
    pub aws_region: String,
    /// DeepCitation SaaS API key
    pub deepcitation_api_key: Option<String>,
    /// DeepCitation SaaS base URL
    pub deepcitation_api_url: String,
    /// Redis URL; when present, chat streams become resumable
    pub redis_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, env::VarError> {
        Ok(Self {
            db_host: env::var("DB_HOST")?,
            db_name: env::var("DB_NAME").unwrap_or_else(|_| "citechat".to_string()),
            db_secret_arn: env::var("DB_SECRET_ARN")?,
            aws_region: env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            deepcitation_api_key: env::var("DEEPCITATION_API_KEY").ok(),
            deepcitation_api_url: env::var("DEEPCITATION_API_URL")
                .unwrap_or_else(|_| "https://api.deepcitation.com/v1".to_string()),
            redis_url: env::var("REDIS_URL").ok(),
        })
    }
}
