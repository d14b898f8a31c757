//! Upstream GET with manual, bounded redirect following.
//!
//! The shared [`Client`] never follows redirects on its own: each hop is
//! resolved here against the URL that produced it, so the final URL is known
//! (playlists resolve relative references against it) and the hop cap is
//! enforced in one place.

use crate::{
    config::{Config, DEFAULT_ACCEPT, DEFAULT_MAX_REDIRECTS, DEFAULT_USER_AGENT},
    error::{ProxyError, Result},
    server::url_validation::validate_origin_url,
};
use reqwest::{
    Client, Response,
    header::{
        ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue, LOCATION,
        ORIGIN, RANGE, REFERER, USER_AGENT,
    },
    redirect,
};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Per-request settings for [`fetch_following_redirects`].
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Redirect hops allowed before giving up
    pub max_redirects: u32,
    pub user_agent: String,
    pub accept: String,
    /// Site-identity headers (Referer/Origin/Authorization) sent on every hop
    pub extra_headers: HeaderMap,
    /// Upgrade `http://` hops to `https://`
    pub force_https: bool,
    /// Run the private-address guard on every hop
    pub block_private_origins: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept: DEFAULT_ACCEPT.to_string(),
            extra_headers: HeaderMap::new(),
            force_https: false,
            block_private_origins: false,
        }
    }
}

impl FetchConfig {
    pub fn from_config(config: &Config) -> Self {
        let mut extra_headers = HeaderMap::new();
        let identity = [
            (REFERER, &config.identity.referer),
            (ORIGIN, &config.identity.origin),
            (AUTHORIZATION, &config.identity.authorization),
        ];
        for (name, value) in identity {
            if let Some(value) = value {
                insert_header(&mut extra_headers, name, value);
            }
        }

        Self {
            max_redirects: config.max_redirects,
            user_agent: config.user_agent.clone(),
            accept: config.accept.clone(),
            extra_headers,
            force_https: config.force_https_upgrade,
            block_private_origins: config.block_private_origins,
        }
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => warn!("Ignoring invalid value for upstream header {}", name),
    }
}

/// Build the shared upstream client: pooled, timeouts bounded, redirects off.
pub fn build_client(config: &Config) -> reqwest::Result<Client> {
    Client::builder()
        .redirect(redirect::Policy::none())
        .connect_timeout(config.connect_timeout)
        .read_timeout(config.read_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
}

/// A final (non-followed) upstream response and where it came from.
#[derive(Debug)]
pub struct Fetched {
    /// URL that produced `response`, after all redirects
    pub url: Url,
    pub response: Response,
    /// Number of redirect hops followed
    pub redirects: u32,
}

/// Upgrade an `http://` URL to `https://` in place.
pub fn upgrade_to_https(url: &mut Url) {
    if url.scheme() == "http" {
        // http -> https is always a permitted scheme change
        let _ = url.set_scheme("https");
    }
}

/// GET `target`, following 3xx responses that carry a `Location` header.
///
/// `range` is forwarded verbatim on every hop. A 3xx without a usable
/// `Location` is returned like any other response.
///
/// # Errors
///
/// - [`ProxyError::Upstream`] on network failure (refused, DNS, timeout)
/// - [`ProxyError::TooManyRedirects`] once more than `config.max_redirects`
///   hops would be needed
/// - [`ProxyError::BlockedOrigin`] if the private-address guard rejects a hop
pub async fn fetch_following_redirects(
    client: &Client,
    target: Url,
    range: Option<&HeaderValue>,
    config: &FetchConfig,
) -> Result<Fetched> {
    let start_url = target.to_string();
    let mut current = target;
    let mut redirects = 0u32;

    loop {
        if config.force_https {
            upgrade_to_https(&mut current);
        }
        if config.block_private_origins {
            validate_origin_url(current.as_str())?;
        }

        let mut request = client
            .get(current.clone())
            .header(USER_AGENT, config.user_agent.as_str())
            .header(ACCEPT, config.accept.as_str())
            .header(ACCEPT_ENCODING, "identity")
            .headers(config.extra_headers.clone());
        if let Some(range) = range {
            request = request.header(RANGE, range.clone());
        }

        let response = request.send().await.map_err(|e| {
            warn!("Upstream fetch failed for {}: {}", current, e);
            e
        })?;

        let status = response.status();
        debug!("Upstream {} answered {}", current, status);

        if status.is_redirection() {
            let next = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|location| match current.join(location) {
                    Ok(next) => Some(next),
                    Err(e) => {
                        warn!("Unusable Location {:?} from {}: {}", location, current, e);
                        None
                    }
                });

            if let Some(next) = next {
                redirects += 1;
                if redirects > config.max_redirects {
                    return Err(ProxyError::TooManyRedirects {
                        limit: config.max_redirects,
                        url: start_url,
                    });
                }
                debug!("Following redirect #{} to {}", redirects, next);
                current = next;
                continue;
            }
        }

        return Ok(Fetched {
            url: current,
            response,
            redirects,
        });
    }
}
