//! Telegram connection settings shared by every client of a host.
//! Loaded from TELEGRAM_API_URL (or TELOXIDE_API_URL); the token comes from each application's config.

use anyhow::Result;
use std::env;

#[derive(Debug, Clone, Default)]
pub struct TelegramConfig {
    /// Bot API base URL; None uses api.telegram.org.
    pub telegram_api_url: Option<String>,
}

impl TelegramConfig {
    /// Loads from environment variables; an unparsable URL is an error.
    pub fn from_env() -> Result<Self> {
        let telegram_api_url = env::var("TELEGRAM_API_URL")
            .or_else(|_| env::var("TELOXIDE_API_URL"))
            .ok()
            .filter(|s| !s.trim().is_empty());
        let config = Self { telegram_api_url };
        config.validate()?;
        Ok(config)
    }

    pub fn with_api_url(url: impl Into<String>) -> Self {
        Self {
            telegram_api_url: Some(url.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(ref url_str) = self.telegram_api_url {
            if reqwest::Url::parse(url_str).is_err() {
                anyhow::bail!(
                    "TELEGRAM_API_URL (or TELOXIDE_API_URL) is set but not a valid URL: {}",
                    url_str
                );
            }
        }
        Ok(())
    }

    /// Builds a teloxide Bot for `token`, honouring the API URL override.
    pub fn build_bot(&self, token: &str) -> teloxide::Bot {
        let bot = teloxide::Bot::new(token);
        match self
            .telegram_api_url
            .as_deref()
            .map(reqwest::Url::parse)
        {
            Some(Ok(url)) => bot.set_api_url(url),
            _ => bot,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_no_override() {
        let config = TelegramConfig::default();
        assert!(config.telegram_api_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        assert!(TelegramConfig::with_api_url("not a url").validate().is_err());
        assert!(TelegramConfig::with_api_url("http://127.0.0.1:8081")
            .validate()
            .is_ok());
    }
}
