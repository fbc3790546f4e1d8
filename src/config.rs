//! Runtime configuration loaded from the environment

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Top-level application configuration
#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP/WebSocket listen address
    pub bind_addr: SocketAddr,
    /// Grace period for draining connections and workers on shutdown
    pub shutdown_timeout: Duration,
    pub security: SecurityConfig,
    pub runtime: RuntimeConfig,
    pub ai: AiConfig,
    pub leaderboard: LeaderboardConfig,
}

/// Secrets for signing and verification
#[derive(Clone, Debug)]
pub struct SecurityConfig {
    /// Secret used to verify bearer tokens on the upgrade request
    pub token_secret: String,
    /// Match-engine secret for question HMAC tokens
    pub question_hmac_secret: String,
}

/// Gameplay defaults
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub default_question_count: usize,
    pub default_per_question_seconds: u64,
    /// Added to question_count * per_question_seconds for the match deadline
    pub global_timeout_padding_seconds: u64,
    /// Queue wait before a bot opponent may be offered (reserved path)
    pub bot_wait_seconds: u64,
    /// Private-room start countdown
    pub start_countdown_seconds: u64,
}

/// AI question generator endpoint
#[derive(Clone, Debug)]
pub struct AiConfig {
    pub generator_url: String,
    pub generator_key: String,
    pub timeout: Duration,
}

/// Leaderboard worker and publishing knobs
#[derive(Clone, Debug)]
pub struct LeaderboardConfig {
    pub snapshot_interval: Duration,
    pub snapshot_top_n: usize,
    pub top_n: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().unwrap(),
            shutdown_timeout: Duration::from_secs(20),
            security: SecurityConfig {
                token_secret: "dev-token-secret".to_string(),
                question_hmac_secret: "dev-question-secret".to_string(),
            },
            runtime: RuntimeConfig {
                default_question_count: 10,
                default_per_question_seconds: 15,
                global_timeout_padding_seconds: 20,
                bot_wait_seconds: 10,
                start_countdown_seconds: 5,
            },
            ai: AiConfig {
                generator_url: String::new(),
                generator_key: String::new(),
                timeout: Duration::from_secs(6),
            },
            leaderboard: LeaderboardConfig {
                snapshot_interval: Duration::from_secs(300),
                snapshot_top_n: 50,
                top_n: 50,
            },
        }
    }
}

impl Config {
    /// Build a configuration from environment variables, falling back to
    /// development defaults for anything unset.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Some(addr) = read("HTTP_ADDR").and_then(|v| v.parse().ok()) {
            cfg.bind_addr = addr;
        }
        if let Some(secs) = read_u64("GRACEFUL_SHUTDOWN_SECONDS") {
            cfg.shutdown_timeout = Duration::from_secs(secs);
        }
        if let Some(secret) = read("TOKEN_SECRET") {
            cfg.security.token_secret = secret;
        }
        if let Some(secret) = read("QUESTION_HMAC_SECRET") {
            cfg.security.question_hmac_secret = secret;
        }
        if let Some(count) = read_u64("DEFAULT_QUESTION_COUNT") {
            cfg.runtime.default_question_count = count as usize;
        }
        if let Some(secs) = read_u64("DEFAULT_PER_QUESTION_SECONDS") {
            cfg.runtime.default_per_question_seconds = secs;
        }
        if let Some(secs) = read_u64("GLOBAL_TIMEOUT_PADDING_SECONDS") {
            cfg.runtime.global_timeout_padding_seconds = secs;
        }
        if let Some(secs) = read_u64("QUEUE_BOT_WAIT_SECONDS") {
            cfg.runtime.bot_wait_seconds = secs;
        }
        if let Some(url) = read("AI_GENERATOR_URL") {
            cfg.ai.generator_url = url;
        }
        if let Some(key) = read("AI_GENERATOR_API_KEY") {
            cfg.ai.generator_key = key;
        }
        if let Some(secs) = read_u64("AI_HTTP_TIMEOUT_SECONDS") {
            cfg.ai.timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_u64("LEADERBOARD_SNAPSHOT_INTERVAL_SECONDS") {
            cfg.leaderboard.snapshot_interval = Duration::from_secs(secs);
        }
        if let Some(n) = read_u64("LEADERBOARD_SNAPSHOT_TOP") {
            cfg.leaderboard.snapshot_top_n = n as usize;
        }
        if let Some(n) = read_u64("LEADERBOARD_TOP") {
            cfg.leaderboard.top_n = n as usize;
        }

        cfg
    }
}

fn read(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn read_u64(key: &str) -> Option<u64> {
    read(key).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.bind_addr.port(), 8080);
        assert_eq!(cfg.runtime.default_question_count, 10);
        assert_eq!(cfg.runtime.default_per_question_seconds, 15);
        assert_eq!(cfg.runtime.global_timeout_padding_seconds, 20);
        assert_eq!(cfg.leaderboard.snapshot_interval, Duration::from_secs(300));
    }
}
