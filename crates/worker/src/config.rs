/// Process-level configuration loaded from environment variables.
///
/// Engine timings and provider credentials live in
/// [`genforge_pipeline::EngineConfig`]; this covers the HTTP surface, asset
/// storage and logging.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Directory assets are stored under (default: `./assets`).
    pub asset_root: String,
    /// Prefix of stored asset references (default: `/assets`).
    pub asset_public_prefix: String,
    /// Per-request timeout for asset downloads in seconds (default: `300`).
    pub download_timeout_secs: u64,
    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default    |
    /// |-------------------------|------------|
    /// | `HOST`                  | `0.0.0.0`  |
    /// | `PORT`                  | `3000`     |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`       |
    /// | `ASSET_ROOT`            | `./assets` |
    /// | `ASSET_PUBLIC_PREFIX`   | `/assets`  |
    /// | `DOWNLOAD_TIMEOUT_SECS` | `300`      |
    /// | `LOG_FORMAT`            | `text`     |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let download_timeout_secs: u64 = std::env::var("DOWNLOAD_TIMEOUT_SECS")
            .unwrap_or_else(|_| "300".into())
            .parse()
            .expect("DOWNLOAD_TIMEOUT_SECS must be a valid u64");

        let log_json = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Self {
            host,
            port,
            request_timeout_secs,
            asset_root: std::env::var("ASSET_ROOT").unwrap_or_else(|_| "./assets".into()),
            asset_public_prefix: std::env::var("ASSET_PUBLIC_PREFIX")
                .unwrap_or_else(|_| "/assets".into()),
            download_timeout_secs,
            log_json,
        }
    }
}
