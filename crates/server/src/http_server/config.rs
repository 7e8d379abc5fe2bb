use http::HeaderValue;
use serde::{Deserialize, Serialize};

/// Default max-age for current metadata, in seconds
pub const DEFAULT_CURRENT_MAX_AGE: u32 = 300;
/// Default max-age for metadata addressed by version or checksum, in seconds
pub const DEFAULT_CONSISTENT_MAX_AGE: u32 = 31_536_000;

#[derive(Debug, Clone)]
pub struct Config {
    // Listen address, e.g. `0.0.0.0:4443`
    pub listen_addr: String,
    // log level for http tracing
    pub log_level: tracing::Level,
}

impl Config {
    pub fn new(listen_addr: impl Into<String>) -> Self {
        let listen_addr = listen_addr.into();
        tracing::info!("Creating HTTP server Config: listen_addr={}", listen_addr);
        Self {
            listen_addr,
            log_level: tracing::Level::INFO,
        }
    }
}

/// Cache lifetimes advertised on successful metadata reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControlConfig {
    #[serde(default = "default_current_max_age")]
    pub current_max_age: u32,
    #[serde(default = "default_consistent_max_age")]
    pub consistent_max_age: u32,
}

fn default_current_max_age() -> u32 {
    DEFAULT_CURRENT_MAX_AGE
}

fn default_consistent_max_age() -> u32 {
    DEFAULT_CONSISTENT_MAX_AGE
}

impl Default for CacheControlConfig {
    fn default() -> Self {
        Self {
            current_max_age: DEFAULT_CURRENT_MAX_AGE,
            consistent_max_age: DEFAULT_CONSISTENT_MAX_AGE,
        }
    }
}

impl CacheControlConfig {
    pub fn current(&self) -> HeaderValue {
        cache_control_value(self.current_max_age)
    }

    pub fn consistent(&self) -> HeaderValue {
        cache_control_value(self.consistent_max_age)
    }
}

fn cache_control_value(max_age: u32) -> HeaderValue {
    if max_age == 0 {
        return HeaderValue::from_static("max-age=0, no-cache, no-store, must-revalidate");
    }
    HeaderValue::from_str(&format!("public, max-age={}, s-maxage={}", max_age, max_age))
        .unwrap_or_else(|_| HeaderValue::from_static("no-cache"))
}
