use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration, read from the environment
#[derive(Debug, Clone)]
pub struct DashConfig {
    /// Base URL of the game server's HTTP API
    pub server_url: String,
    /// WebSocket URL of the push channel
    pub push_url: String,
    /// Sent as `X-Admin-Token` on control requests
    pub admin_token: Option<String>,
    pub poll_interval: Duration,
    pub advance_delay: Duration,
    pub request_timeout: Duration,
    /// Directory holding the persisted slots
    pub state_dir: PathBuf,
    pub listen_port: u16,
}

impl Default for DashConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:5000".to_string(),
            push_url: "ws://localhost:5000/ws".to_string(),
            admin_token: None,
            poll_interval: Duration::from_secs(3),
            advance_delay: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
            state_dir: PathBuf::from(".undercover-dash"),
            listen_port: 5080,
        }
    }
}

impl DashConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let server_url = non_empty("UNDERCOVER_SERVER_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.server_url);

        // Without an explicit push URL, derive it from the server URL
        let push_url = non_empty("UNDERCOVER_PUSH_URL").unwrap_or_else(|| {
            let ws_base = server_url
                .replacen("https://", "wss://", 1)
                .replacen("http://", "ws://", 1);
            format!("{}/ws", ws_base)
        });

        let admin_token = non_empty("UNDERCOVER_ADMIN_TOKEN");
        if admin_token.is_none() {
            tracing::warn!("UNDERCOVER_ADMIN_TOKEN not set, control requests are unauthenticated");
        }

        Self {
            server_url,
            push_url,
            admin_token,
            poll_interval: secs("UNDERCOVER_POLL_SECS").unwrap_or(defaults.poll_interval),
            advance_delay: secs("UNDERCOVER_ADVANCE_SECS").unwrap_or(defaults.advance_delay),
            request_timeout: secs("UNDERCOVER_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
            state_dir: non_empty("UNDERCOVER_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            listen_port: std::env::var("UNDERCOVER_LISTEN_PORT")
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.listen_port),
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}
