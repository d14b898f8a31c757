use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default mount path of the proxy endpoint
pub const DEFAULT_PROXY_PATH: &str = "/proxy";

/// Default cap on redirect hops followed for a single request
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

/// Default cap on a buffered playlist body, before and after decompression
pub const DEFAULT_MAX_PLAYLIST_BYTES: usize = 16 * 1024 * 1024;

/// Browser-like User-Agent sent upstream; some origins block non-browser clients
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Accept header preferring playlist, binary and plain-text types
pub const DEFAULT_ACCEPT: &str = "application/vnd.apple.mpegurl, application/x-mpegurl, application/octet-stream, text/plain;q=0.9, */*;q=0.8";

/// Content types that may carry an HLS playlist.
///
/// `application/octet-stream` and `text/plain` are included because many
/// origins mislabel playlists; the `#EXTM3U` marker check filters false positives.
pub const DEFAULT_PLAYLIST_CONTENT_TYPES: [&str; 4] = [
    "application/vnd.apple.mpegurl",
    "application/x-mpegurl",
    "application/octet-stream",
    "text/plain",
];

/// Optional site-identity headers attached to every upstream request
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpstreamIdentity {
    pub referer: Option<String>,
    pub origin: Option<String>,
    pub authorization: Option<String>,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub is_dev: bool,
    /// Path the proxy endpoint is mounted on; also the prefix of rewritten references
    pub proxy_path: String,
    /// Maximum redirect hops before the request fails with 502
    pub max_redirects: u32,
    /// Upstream TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Upstream idle read timeout (applies between body chunks, not to the whole transfer)
    pub read_timeout: Duration,
    pub user_agent: String,
    pub accept: String,
    pub identity: UpstreamIdentity,
    /// Lower-cased media types treated as playlist candidates
    pub playlist_content_types: Vec<String>,
    /// Largest playlist body buffered for rewriting; bigger bodies are relayed unchanged
    pub max_playlist_bytes: usize,
    /// Rewrite `http://` targets and references to `https://`
    pub force_https_upgrade: bool,
    /// Reject targets that point at private or loopback addresses
    pub block_private_origins: bool,
    /// Directory served as the player's static assets (disabled when `None`)
    pub static_dir: Option<PathBuf>,
    /// File served for `/` and for missing static paths
    pub static_index: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            is_dev: true,
            proxy_path: DEFAULT_PROXY_PATH.to_string(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            identity: UpstreamIdentity::default(),
            playlist_content_types: DEFAULT_PLAYLIST_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            max_playlist_bytes: DEFAULT_MAX_PLAYLIST_BYTES,
            force_https_upgrade: false,
            block_private_origins: false,
            static_dir: None,
            static_index: "player.html".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    /// In DEV mode, provides sensible defaults. In PROD mode, PORT is required.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let defaults = Config::default();

        // Check if running in dev mode
        let is_dev = env::var("DEV_MODE")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);

        // Port: required in prod, defaults to 3000 in dev
        let port = if is_dev {
            env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?
        } else {
            env::var("PORT")
                .map_err(|_| "PORT is required in production")?
                .parse()?
        };

        let proxy_path = env::var("PROXY_PATH").unwrap_or(defaults.proxy_path);
        if !proxy_path.starts_with('/') || proxy_path.len() < 2 {
            return Err(format!("PROXY_PATH must start with '/': {proxy_path}").into());
        }

        let max_redirects = parse_or("MAX_REDIRECTS", defaults.max_redirects);
        let connect_timeout =
            Duration::from_secs(parse_or("UPSTREAM_CONNECT_TIMEOUT_SECS", 10u64));
        let read_timeout = Duration::from_secs(parse_or("UPSTREAM_READ_TIMEOUT_SECS", 30u64));

        let user_agent = non_empty("UPSTREAM_USER_AGENT").unwrap_or(defaults.user_agent);
        let accept = non_empty("UPSTREAM_ACCEPT").unwrap_or(defaults.accept);

        // Deployment-specific identity headers, never baked in
        let identity = UpstreamIdentity {
            referer: non_empty("UPSTREAM_REFERER"),
            origin: non_empty("UPSTREAM_ORIGIN"),
            authorization: non_empty("UPSTREAM_AUTHORIZATION"),
        };

        let playlist_content_types = match non_empty("PLAYLIST_CONTENT_TYPES") {
            Some(list) => list
                .split(',')
                .map(|s| s.trim().to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            None => defaults.playlist_content_types,
        };

        let max_playlist_bytes = parse_or("MAX_PLAYLIST_BYTES", defaults.max_playlist_bytes);

        let force_https_upgrade = parse_or("FORCE_HTTPS_UPGRADE", false);
        let block_private_origins = parse_or("BLOCK_PRIVATE_ORIGINS", false);

        let static_dir = non_empty("STATIC_DIR").map(PathBuf::from);
        let static_index = non_empty("STATIC_INDEX").unwrap_or(defaults.static_index);

        Ok(Config {
            port,
            is_dev,
            proxy_path,
            max_redirects,
            connect_timeout,
            read_timeout,
            user_agent,
            accept,
            identity,
            playlist_content_types,
            max_playlist_bytes,
            force_https_upgrade,
            block_private_origins,
            static_dir,
            static_index,
        })
    }
}

/// Read an env var, treating blank values as unset
fn non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an env var, falling back to `default` when missing or malformed
fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    non_empty(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
