// Server configuration, loaded from environment variables
//
// Mirrors the teacher's `RtmpServerConfiguration::load_from_env` convention:
// each tunable has a `get_env_*` lookup with a default, validated up front so
// a bad value fails fast at startup instead of surfacing as a mysterious
// runtime error later.

use crate::log::Logger;
use crate::log_error;
use crate::utils::{get_env_bool, get_env_string, get_env_u32};

const RTMP_PORT_DEFAULT: u32 = 1935;
const MAX_PORT: u32 = 65535;

pub const RTMP_CHUNK_SIZE_DEFAULT: usize = 128;
pub const RTMP_MIN_CHUNK_SIZE: usize = 128;
pub const RTMP_MAX_CHUNK_SIZE: usize = 65536;
const OUT_CHUNK_SIZE_DEFAULT: usize = 4096;

const READ_TIMEOUT_DEFAULT_SECONDS: u64 = 10;
const WRITE_TIMEOUT_DEFAULT_SECONDS: u64 = 10;
const STALENESS_SWEEP_DEFAULT_SECONDS: u64 = 5;
const STREAM_GRACE_DEFAULT_SECONDS: u64 = 20;

const SUBSCRIBER_QUEUE_CAPACITY_DEFAULT: usize = 1024;

const HLS_SEGMENT_TARGET_DEFAULT_SECONDS: u64 = 5;
const HLS_SEGMENT_MIN_DEFAULT_SECONDS: u64 = 1;
const HLS_WINDOW_SIZE_DEFAULT: usize = 6;

/// RTMP ingress configuration
#[derive(Clone)]
pub struct RtmpServerConfig {
    /// Port to bind for RTMP ingress/egress
    pub port: u32,

    /// Bind address
    pub bind_address: String,

    /// Initial chunk size advertised to clients (bytes)
    pub chunk_size: usize,

    /// Chunk size this side uses when writing to peers (bytes)
    pub out_chunk_size: usize,
}

impl RtmpServerConfig {
    /// Loads configuration from environment variables
    pub fn load_from_env(logger: &Logger) -> Result<RtmpServerConfig, ()> {
        let port = get_env_u32("RTMP_PORT", RTMP_PORT_DEFAULT);

        if port == 0 || port > MAX_PORT {
            log_error!(logger, format!("RTMP_PORT has an invalid value: {}", port));
            return Err(());
        }

        let bind_address = get_env_string("BIND_ADDRESS", "0.0.0.0");

        let chunk_size = get_env_u32("RTMP_CHUNK_SIZE", RTMP_CHUNK_SIZE_DEFAULT as u32) as usize;

        if !(RTMP_MIN_CHUNK_SIZE..=RTMP_MAX_CHUNK_SIZE).contains(&chunk_size) {
            log_error!(
                logger,
                format!(
                    "RTMP_CHUNK_SIZE has an invalid value: {}. Min: {}. Max: {}",
                    chunk_size, RTMP_MIN_CHUNK_SIZE, RTMP_MAX_CHUNK_SIZE
                )
            );
            return Err(());
        }

        let out_chunk_size =
            get_env_u32("RTMP_OUT_CHUNK_SIZE", OUT_CHUNK_SIZE_DEFAULT as u32) as usize;

        Ok(RtmpServerConfig {
            port,
            bind_address,
            chunk_size,
            out_chunk_size,
        })
    }

    /// Gets the TCP address to listen on
    pub fn get_tcp_listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Timeout and housekeeping configuration shared by every session (C8)
#[derive(Clone, Copy)]
pub struct TimingConfig {
    pub read_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    pub staleness_sweep_seconds: u64,
    pub stream_grace_seconds: u64,
}

impl TimingConfig {
    pub fn load_from_env() -> TimingConfig {
        TimingConfig {
            read_timeout_seconds: get_env_u32(
                "READ_TIMEOUT_SECONDS",
                READ_TIMEOUT_DEFAULT_SECONDS as u32,
            ) as u64,
            write_timeout_seconds: get_env_u32(
                "WRITE_TIMEOUT_SECONDS",
                WRITE_TIMEOUT_DEFAULT_SECONDS as u32,
            ) as u64,
            staleness_sweep_seconds: get_env_u32(
                "STALENESS_SWEEP_SECONDS",
                STALENESS_SWEEP_DEFAULT_SECONDS as u32,
            ) as u64,
            stream_grace_seconds: get_env_u32(
                "STREAM_GRACE_SECONDS",
                STREAM_GRACE_DEFAULT_SECONDS as u32,
            ) as u64,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        TimingConfig {
            read_timeout_seconds: READ_TIMEOUT_DEFAULT_SECONDS,
            write_timeout_seconds: WRITE_TIMEOUT_DEFAULT_SECONDS,
            staleness_sweep_seconds: STALENESS_SWEEP_DEFAULT_SECONDS,
            stream_grace_seconds: STREAM_GRACE_DEFAULT_SECONDS,
        }
    }
}

/// Stream registry / fan-out configuration (C6)
#[derive(Clone, Copy)]
pub struct RegistryConfig {
    pub subscriber_queue_capacity: usize,
}

impl RegistryConfig {
    pub fn load_from_env() -> RegistryConfig {
        RegistryConfig {
            subscriber_queue_capacity: get_env_u32(
                "SUBSCRIBER_QUEUE_CAPACITY",
                SUBSCRIBER_QUEUE_CAPACITY_DEFAULT as u32,
            ) as usize,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            subscriber_queue_capacity: SUBSCRIBER_QUEUE_CAPACITY_DEFAULT,
        }
    }
}

/// HLS segmenter configuration (C7)
#[derive(Clone, Copy)]
pub struct HlsConfig {
    pub segment_target_seconds: u64,
    pub segment_min_seconds: u64,
    pub window_size: usize,
}

impl HlsConfig {
    pub fn load_from_env() -> HlsConfig {
        HlsConfig {
            segment_target_seconds: get_env_u32(
                "HLS_SEGMENT_TARGET_SECONDS",
                HLS_SEGMENT_TARGET_DEFAULT_SECONDS as u32,
            ) as u64,
            segment_min_seconds: get_env_u32(
                "HLS_SEGMENT_MIN_SECONDS",
                HLS_SEGMENT_MIN_DEFAULT_SECONDS as u32,
            ) as u64,
            window_size: get_env_u32("HLS_WINDOW_SIZE", HLS_WINDOW_SIZE_DEFAULT as u32) as usize,
        }
    }
}

impl Default for HlsConfig {
    fn default() -> Self {
        HlsConfig {
            segment_target_seconds: HLS_SEGMENT_TARGET_DEFAULT_SECONDS,
            segment_min_seconds: HLS_SEGMENT_MIN_DEFAULT_SECONDS,
            window_size: HLS_WINDOW_SIZE_DEFAULT,
        }
    }
}

/// Log level toggles, loaded the same way `main.rs` builds the `LogConfig`
/// in the teacher crate
pub fn log_config_from_env(prefix: &str) -> crate::log::LogConfig {
    crate::log::LogConfig {
        prefix: prefix.to_string(),
        error_enabled: get_env_bool("LOG_ERROR", true),
        warning_enabled: get_env_bool("LOG_WARNING", true),
        info_enabled: get_env_bool("LOG_INFO", true),
        debug_enabled: get_env_bool("LOG_DEBUG", false),
        trace_enabled: get_env_bool("LOG_TRACE", false),
    }
}
