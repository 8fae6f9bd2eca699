pub mod api;
pub mod domain;
pub mod kpi;
pub mod orchestrator;
pub mod render;
pub mod sequencer;
pub mod view;

pub mod config {
    use anyhow::Context;
    use std::time::Duration;

    const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
    const DEFAULT_REFRESH_ALL_TIMEOUT_SECS: u64 = 120;
    const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
    const DEFAULT_PREDICT_DELAY_MS: u64 = 500;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub api_base_url: Option<String>,
        pub csrf_token: Option<String>,
        pub sentry_dsn: Option<String>,
        pub http_timeout: Duration,
        pub refresh_all_timeout: Duration,
        pub poll_interval: Duration,
        pub predict_delay: Duration,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let settings = Self {
                api_base_url: non_empty_var("SIGBOARD_API_BASE_URL"),
                csrf_token: non_empty_var("SIGBOARD_CSRF_TOKEN"),
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                http_timeout: Duration::from_secs(parse_var(
                    "SIGBOARD_HTTP_TIMEOUT_SECS",
                    DEFAULT_HTTP_TIMEOUT_SECS,
                )?),
                refresh_all_timeout: Duration::from_secs(parse_var(
                    "SIGBOARD_REFRESH_ALL_TIMEOUT_SECS",
                    DEFAULT_REFRESH_ALL_TIMEOUT_SECS,
                )?),
                poll_interval: Duration::from_secs(parse_var(
                    "SIGBOARD_POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL_SECS,
                )?),
                predict_delay: Duration::from_millis(parse_var(
                    "SIGBOARD_PREDICT_DELAY_MS",
                    DEFAULT_PREDICT_DELAY_MS,
                )?),
            };
            anyhow::ensure!(
                !settings.poll_interval.is_zero(),
                "SIGBOARD_POLL_INTERVAL_SECS must be at least 1"
            );
            Ok(settings)
        }

        pub fn require_api_base_url(&self) -> anyhow::Result<&str> {
            self.api_base_url
                .as_deref()
                .context("SIGBOARD_API_BASE_URL is required")
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                api_base_url: None,
                csrf_token: None,
                sentry_dsn: None,
                http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
                refresh_all_timeout: Duration::from_secs(DEFAULT_REFRESH_ALL_TIMEOUT_SECS),
                poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
                predict_delay: Duration::from_millis(DEFAULT_PREDICT_DELAY_MS),
            }
        }
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn parse_var(key: &str, default: u64) -> anyhow::Result<u64> {
        match non_empty_var(key) {
            Some(s) => s
                .parse::<u64>()
                .with_context(|| format!("{key} must be a non-negative integer (got {s:?})")),
            None => Ok(default),
        }
    }
}
