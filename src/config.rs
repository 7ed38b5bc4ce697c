//! Runtime configuration loaded from the environment.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::frame::DEFAULT_MAX_PAYLOAD;
use crate::types::UserId;

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:5896";
pub const DEFAULT_OUTBOUND_QUEUE: usize = 256;

/// Supabase project settings shared by the REST backend and the token verifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    pub url: String,
    /// Service key used for PostgREST calls
    pub api_key: String,
    /// Anon key sent alongside user tokens to the auth endpoint
    pub anon_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RapidApiConfig {
    pub key: String,
    pub host: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub max_payload: u32,
    pub outbound_queue: usize,
    /// Close connections that send no complete frame for this long (None = never)
    pub idle_timeout: Option<Duration>,
    /// Address for the HTTP status endpoint (None = not served)
    pub status_addr: Option<SocketAddr>,
    /// Static token table used when Supabase auth is not configured
    pub dev_tokens: HashMap<String, UserId>,
    pub supabase: Option<SupabaseConfig>,
    pub rapidapi: Option<RapidApiConfig>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5896)),
            max_payload: DEFAULT_MAX_PAYLOAD,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            idle_timeout: None,
            status_addr: None,
            dev_tokens: HashMap::new(),
            supabase: None,
            rapidapi: None,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

/// Parse an optional variable, falling back to `default` with a warning when it is malformed
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_string(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid {}={:?}, using default", key, raw);
            default
        }),
        None => default,
    }
}

/// Parse `token=user_id` pairs separated by commas
pub fn parse_dev_tokens(raw: &str) -> HashMap<String, UserId> {
    raw.split(',')
        .filter_map(|pair| {
            let (token, user) = pair.split_once('=')?;
            let (token, user) = (token.trim(), user.trim());
            if token.is_empty() || user.is_empty() {
                tracing::warn!("Skipping malformed RELAY_DEV_TOKENS entry {:?}", pair);
                return None;
            }
            Some((token.to_string(), user.to_string()))
        })
        .collect()
}

impl RelayConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let listen_addr = env_parse("RELAY_LISTEN_ADDR", defaults.listen_addr);
        let max_payload = env_parse("RELAY_MAX_PAYLOAD", defaults.max_payload);

        let outbound_queue = match env_parse("RELAY_OUTBOUND_QUEUE", defaults.outbound_queue) {
            0 => {
                tracing::warn!("RELAY_OUTBOUND_QUEUE must be positive, using default");
                DEFAULT_OUTBOUND_QUEUE
            }
            n => n,
        };

        let idle_timeout = env_string("RELAY_IDLE_TIMEOUT_SECS")
            .and_then(|raw| match raw.parse::<u64>() {
                Ok(0) => None,
                Ok(secs) => Some(Duration::from_secs(secs)),
                Err(_) => {
                    tracing::warn!("Ignoring invalid RELAY_IDLE_TIMEOUT_SECS={:?}", raw);
                    None
                }
            });

        let status_addr = env_string("RELAY_STATUS_ADDR").and_then(|raw| {
            raw.parse()
                .map_err(|_| tracing::warn!("Ignoring invalid RELAY_STATUS_ADDR={:?}", raw))
                .ok()
        });

        let dev_tokens = env_string("RELAY_DEV_TOKENS")
            .map(|raw| parse_dev_tokens(&raw))
            .unwrap_or_default();

        let supabase = match (
            env_string("SUPABASE_URL"),
            env_string("SUPABASE_API_KEY"),
        ) {
            (Some(url), Some(api_key)) => {
                let anon_key = env_string("SUPABASE_ANON_KEY").unwrap_or_else(|| {
                    tracing::warn!("SUPABASE_ANON_KEY not set, using the service key for auth");
                    api_key.clone()
                });
                Some(SupabaseConfig {
                    url: url.trim_end_matches('/').to_string(),
                    api_key,
                    anon_key,
                })
            }
            (None, None) => None,
            _ => {
                tracing::warn!("SUPABASE_URL and SUPABASE_API_KEY must both be set to use Supabase");
                None
            }
        };

        let rapidapi = match (env_string("RAPIDAPI_KEY"), env_string("RAPIDAPI_HOST")) {
            (Some(key), Some(host)) => Some(RapidApiConfig { key, host }),
            _ => None,
        };

        Self {
            listen_addr,
            max_payload,
            outbound_queue,
            idle_timeout,
            status_addr,
            dev_tokens,
            supabase,
            rapidapi,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "RELAY_LISTEN_ADDR",
        "RELAY_MAX_PAYLOAD",
        "RELAY_OUTBOUND_QUEUE",
        "RELAY_IDLE_TIMEOUT_SECS",
        "RELAY_STATUS_ADDR",
        "RELAY_DEV_TOKENS",
        "SUPABASE_URL",
        "SUPABASE_API_KEY",
        "SUPABASE_ANON_KEY",
        "RAPIDAPI_KEY",
        "RAPIDAPI_HOST",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = RelayConfig::from_env();
        assert_eq!(config.listen_addr.to_string(), DEFAULT_LISTEN_ADDR);
        assert_eq!(config.max_payload, 10_485_760);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert!(config.idle_timeout.is_none());
        assert!(config.status_addr.is_none());
        assert!(config.supabase.is_none());
        assert!(config.rapidapi.is_none());
    }

    #[test]
    #[serial]
    fn test_overrides() {
        clear_env();
        std::env::set_var("RELAY_LISTEN_ADDR", "127.0.0.1:7000");
        std::env::set_var("RELAY_MAX_PAYLOAD", "4096");
        std::env::set_var("RELAY_IDLE_TIMEOUT_SECS", "30");
        std::env::set_var("RELAY_STATUS_ADDR", "127.0.0.1:7001");
        std::env::set_var("SUPABASE_URL", "https://example.supabase.co/");
        std::env::set_var("SUPABASE_API_KEY", "service");
        std::env::set_var("SUPABASE_ANON_KEY", "anon");

        let config = RelayConfig::from_env();
        assert_eq!(config.listen_addr.port(), 7000);
        assert_eq!(config.max_payload, 4096);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.status_addr.map(|a| a.port()), Some(7001));
        assert_eq!(
            config.supabase,
            Some(SupabaseConfig {
                url: "https://example.supabase.co".to_string(),
                api_key: "service".to_string(),
                anon_key: "anon".to_string(),
            })
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        clear_env();
        std::env::set_var("RELAY_MAX_PAYLOAD", "lots");
        std::env::set_var("RELAY_OUTBOUND_QUEUE", "0");
        std::env::set_var("RELAY_IDLE_TIMEOUT_SECS", "soon");
        std::env::set_var("SUPABASE_URL", "https://example.supabase.co");

        let config = RelayConfig::from_env();
        assert_eq!(config.max_payload, DEFAULT_MAX_PAYLOAD);
        assert_eq!(config.outbound_queue, DEFAULT_OUTBOUND_QUEUE);
        assert!(config.idle_timeout.is_none());
        // URL without a key is not enough
        assert!(config.supabase.is_none());
        clear_env();
    }

    #[test]
    fn test_parse_dev_tokens() {
        let tokens = parse_dev_tokens("alpha=user-a, beta = user-b,broken,=x");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["alpha"], "user-a");
        assert_eq!(tokens["beta"], "user-b");
    }
}
