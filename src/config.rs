use std::collections::BTreeMap;
use std::time::Duration;

use url::Url;

use crate::Result;

/// Default period between automatic re-sends and between reconnect attempts.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(3000);

/// Configuration for a single managed connection.
#[derive(Debug, Clone)]
pub struct Settings {
    url: String,
    interval: Duration,
    additional_query_params: BTreeMap<String, String>,
}

impl Settings {
    /// Creates settings for the given WebSocket URL with the default interval
    /// and no extra query parameters.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: DEFAULT_INTERVAL,
            additional_query_params: BTreeMap::new(),
        }
    }

    /// Sets the default period used for `Firing::EveryDefault` operations and
    /// for the reconnect loop.
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Appends a query parameter to the connection URL.
    #[must_use]
    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_query_params.insert(key.into(), value.into());
        self
    }

    pub(crate) fn default_interval(&self) -> Duration {
        self.interval
    }

    /// Builds the final endpoint, appending the configured query parameters.
    pub(crate) fn endpoint(&self) -> Result<String> {
        let mut url = Url::parse(&self.url)?;

        if !self.additional_query_params.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.additional_query_params {
                pairs.append_pair(key, value);
            }
        }

        Ok(String::from(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_without_params_is_normalized_url() {
        let settings = Settings::new("wss://example.com");

        assert_eq!(settings.endpoint().unwrap(), "wss://example.com/");
    }

    #[test]
    fn endpoint_appends_params_in_key_order() {
        let settings = Settings::new("wss://example.com/stream")
            .query_param("token", "abc")
            .query_param("channel", "trades");

        assert_eq!(
            settings.endpoint().unwrap(),
            "wss://example.com/stream?channel=trades&token=abc"
        );
    }

    #[test]
    fn endpoint_rejects_invalid_url() {
        let settings = Settings::new("not a url");

        settings.endpoint().unwrap_err();
    }

    #[test]
    fn default_interval_is_three_seconds() {
        let settings = Settings::new("wss://example.com");

        assert_eq!(settings.default_interval(), Duration::from_secs(3));
    }
}
