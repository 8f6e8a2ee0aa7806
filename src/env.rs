//! Environment variable names used to configure a logger from a service's
//! environment.
//!
//! These are purely helpers; [`LoggerOptions`] itself never reads the
//! environment.

use crate::config::LoggerOptions;
use crate::error::LoggerError;
use std::str::FromStr;
use std::time::Duration;

/// Server URL, e.g. `wss://logs.internal:9443/stream`. Required.
pub const WS_LOG_URL_ENV: &str = "WS_LOG_URL";

/// Client identity stamped on every record.
pub const WS_LOG_SOURCE_ENV: &str = "WS_LOG_SOURCE";

/// Publish topic.
pub const WS_LOG_TOPIC_ENV: &str = "WS_LOG_TOPIC";

/// Topic subscribed to after each connect.
pub const WS_LOG_SUBSCRIPTION_TOPIC_ENV: &str = "WS_LOG_SUBSCRIPTION_TOPIC";

/// Sent as the `X-API-Key` handshake header.
pub const WS_LOG_API_KEY_ENV: &str = "WS_LOG_API_KEY";

/// Buffer capacity while disconnected.
pub const WS_LOG_BUFFER_SIZE_ENV: &str = "WS_LOG_BUFFER_SIZE";

/// Reconnect delay in milliseconds; `0` disables reconnection.
pub const WS_LOG_RECONNECT_INTERVAL_MS_ENV: &str = "WS_LOG_RECONNECT_INTERVAL_MS";

/// `true`/`false` (also `1`/`0`) to mirror records to the console.
pub const WS_LOG_ENABLE_CONSOLE_ENV: &str = "WS_LOG_ENABLE_CONSOLE";

/// Read an environment variable or fall back to a provided default.
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, LoggerError> {
    match env_opt(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LoggerError::InvalidEnv { key, value: raw }),
    }
}

fn env_bool(key: &'static str) -> Result<Option<bool>, LoggerError> {
    match env_opt(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => Err(LoggerError::InvalidEnv { key, value: raw }),
        },
    }
}

impl LoggerOptions {
    /// Build options from the `WS_LOG_*` variables. Unset or empty variables
    /// leave the corresponding option at its default.
    pub fn from_env() -> Result<Self, LoggerError> {
        let ws_url = env_opt(WS_LOG_URL_ENV).ok_or(LoggerError::MissingUrl)?;
        Ok(LoggerOptions {
            ws_url,
            source: env_opt(WS_LOG_SOURCE_ENV),
            topic: env_opt(WS_LOG_TOPIC_ENV),
            subscription_topic: env_opt(WS_LOG_SUBSCRIPTION_TOPIC_ENV),
            api_key: env_opt(WS_LOG_API_KEY_ENV),
            max_buffer_size: env_parse(WS_LOG_BUFFER_SIZE_ENV)?,
            reconnect_interval: env_parse::<u64>(WS_LOG_RECONNECT_INTERVAL_MS_ENV)?
                .map(Duration::from_millis),
            enable_console: env_bool(WS_LOG_ENABLE_CONSOLE_ENV)?,
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    // Tests in this module mutate the process environment.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ALL_VARS: [&str; 8] = [
        WS_LOG_URL_ENV,
        WS_LOG_SOURCE_ENV,
        WS_LOG_TOPIC_ENV,
        WS_LOG_SUBSCRIPTION_TOPIC_ENV,
        WS_LOG_API_KEY_ENV,
        WS_LOG_BUFFER_SIZE_ENV,
        WS_LOG_RECONNECT_INTERVAL_MS_ENV,
        WS_LOG_ENABLE_CONSOLE_ENV,
    ];

    fn with_env<R>(vars: &[(&str, &str)], f: impl FnOnce() -> R) -> R {
        let _guard = ENV_LOCK.lock();
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
        for (key, value) in vars {
            std::env::set_var(key, value);
        }
        let out = f();
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
        out
    }

    #[test]
    fn reads_every_variable() {
        let opts = with_env(
            &[
                (WS_LOG_URL_ENV, "ws://127.0.0.1:9000"),
                (WS_LOG_SOURCE_ENV, "billing-1"),
                (WS_LOG_TOPIC_ENV, "audit"),
                (WS_LOG_SUBSCRIPTION_TOPIC_ENV, "billing"),
                (WS_LOG_API_KEY_ENV, "k"),
                (WS_LOG_BUFFER_SIZE_ENV, "250"),
                (WS_LOG_RECONNECT_INTERVAL_MS_ENV, "0"),
                (WS_LOG_ENABLE_CONSOLE_ENV, "off"),
            ],
            LoggerOptions::from_env,
        )
        .unwrap();

        assert_eq!(opts.ws_url, "ws://127.0.0.1:9000");
        assert_eq!(opts.source.as_deref(), Some("billing-1"));
        assert_eq!(opts.topic.as_deref(), Some("audit"));
        assert_eq!(opts.subscription_topic.as_deref(), Some("billing"));
        assert_eq!(opts.api_key.as_deref(), Some("k"));
        assert_eq!(opts.max_buffer_size, Some(250));
        assert_eq!(opts.reconnect_interval, Some(Duration::ZERO));
        assert_eq!(opts.enable_console, Some(false));
    }

    #[test]
    fn missing_url_is_an_error() {
        let res = with_env(&[(WS_LOG_TOPIC_ENV, "audit")], LoggerOptions::from_env);
        assert!(matches!(res, Err(LoggerError::MissingUrl)));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let res = with_env(
            &[
                (WS_LOG_URL_ENV, "ws://x"),
                (WS_LOG_BUFFER_SIZE_ENV, "lots"),
            ],
            LoggerOptions::from_env,
        );
        match res {
            Err(LoggerError::InvalidEnv { key, value }) => {
                assert_eq!(key, WS_LOG_BUFFER_SIZE_ENV);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn env_or_falls_back() {
        let value = with_env(&[], || env_or(WS_LOG_TOPIC_ENV, "logs"));
        assert_eq!(value, "logs");
    }
}
