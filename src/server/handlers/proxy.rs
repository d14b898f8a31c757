//! The proxy endpoint: `GET <proxy-path>?url=<target>`.
//!
//! Two paths after the upstream fetch. Anything that is not a `200` with a
//! playlist-like content type streams straight through. Playlist candidates
//! are sniffed on their first bytes; bodies that cannot be playlists go back
//! to streaming, the rest are buffered (up to a cap), decoded and rewritten.

use crate::{
    decode,
    error::{ProxyError, Result},
    hls::sniff::{
        HLS_CONTENT_TYPE, PlaylistPrefix, classify_prefix, has_playlist_marker,
        is_playlist_content_type,
    },
    metrics::{self, Outcome},
    server::{state::AppState, url_validation::parse_target_url},
    upstream::{Fetched, fetch_following_redirects},
};
use axum::{
    body::{Body, Bytes},
    extract::{RawQuery, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::{Stream, StreamExt, TryStreamExt, stream};
use std::borrow::Cow;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Hop-by-hop headers that must not be relayed to the client
static HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Query string of the proxy endpoint
#[derive(Debug, Default)]
pub struct ProxyParams {
    /// Absolute target URL, percent-decoded once
    pub url: Option<String>,
}

impl ProxyParams {
    /// Parse a raw query string. Only the first `url` pair counts.
    pub fn from_query(query: Option<&str>) -> Self {
        let url = query.and_then(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .find(|(key, _)| key == "url")
                .map(|(_, value)| value.into_owned())
        });
        Self { url }
    }
}

/// A validated proxy call
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target_url: Url,
    /// Inbound `Range`, forwarded verbatim
    pub range: Option<HeaderValue>,
}

impl ProxyRequest {
    /// Validate the `url` query parameter and pick up the inbound `Range`.
    ///
    /// A target that only parses after one more round of percent-decoding
    /// (double-encoded by the caller) is accepted.
    pub fn from_parts(params: &ProxyParams, headers: &HeaderMap) -> Result<Self> {
        let raw = params
            .url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ProxyError::MissingUrl)?;

        let target_url = match parse_target_url(raw) {
            Ok(url) => url,
            Err(e) if raw.contains('%') => urlencoding::decode(raw)
                .ok()
                .and_then(|decoded| parse_target_url(&decoded).ok())
                .ok_or(e)?,
            Err(e) => return Err(e),
        };

        Ok(Self {
            target_url,
            range: headers.get(header::RANGE).cloned(),
        })
    }
}

/// Proxy a target URL, rewriting HLS playlists on the way through
pub async fn proxy(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    let start = Instant::now();
    let params = ProxyParams::from_query(query.as_deref());

    let result = match ProxyRequest::from_parts(&params, &headers) {
        Ok(request) => relay(&state, request).await,
        Err(e) => Err(e),
    };

    match result {
        Ok((outcome, response)) => {
            metrics::record_request(outcome, response.status().as_u16());
            metrics::record_duration(outcome, start);
            response
        }
        Err(e) => {
            if matches!(e, ProxyError::Upstream(_)) {
                metrics::record_upstream_error();
            }
            metrics::record_request(Outcome::Failed, e.status().as_u16());
            metrics::record_duration(Outcome::Failed, start);
            e.into_response()
        }
    }
}

/// Answer `OPTIONS` on any path with the CORS pre-flight response
pub async fn answer_preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return preflight().await.into_response();
    }
    next.run(request).await
}

/// CORS pre-flight
pub async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (header::ACCESS_CONTROL_ALLOW_METHODS, "OPTIONS, GET"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "*"),
        ],
    )
}

async fn relay(state: &AppState, request: ProxyRequest) -> Result<(Outcome, Response)> {
    info!("Proxying {}", request.target_url);

    let Fetched {
        url,
        response,
        redirects,
    } = fetch_following_redirects(
        &state.http_client,
        request.target_url,
        request.range.as_ref(),
        &state.fetch,
    )
    .await?;
    metrics::record_redirects(redirects);

    let status = response.status();
    let upstream_headers = response.headers().clone();
    let mut body = Box::pin(response.bytes_stream());

    if status != StatusCode::OK {
        debug!("Relaying {} from {} unchanged", status, url);
        return Ok((
            Outcome::Relayed,
            stream_response(status, &upstream_headers, false, body),
        ));
    }

    let content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if !is_playlist_content_type(
        content_type,
        state.config.playlist_content_types.as_slice(),
    ) {
        debug!("Streaming {} ({}) through", url, content_type);
        return Ok((
            Outcome::Passthrough,
            stream_response(status, &upstream_headers, true, body),
        ));
    }

    // Encoded bodies can only be sniffed after decoding, so they are buffered as-is
    let limit = state.config.max_playlist_bytes;
    let mut decided = has_content_encoding(&upstream_headers);
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;

    while let Some(chunk) = body.try_next().await? {
        buffered += chunk.len();
        chunks.push(chunk);

        if buffered > limit {
            warn!(
                "{} exceeds the {} byte playlist limit, relaying unchanged",
                url, limit
            );
            metrics::record_oversized_playlist();
            let replay = stream::iter(chunks.into_iter().map(Ok)).chain(body);
            return Ok((
                Outcome::Passthrough,
                stream_response(status, &upstream_headers, true, replay),
            ));
        }

        if !decided {
            match classify_prefix(&chunks.concat()) {
                PlaylistPrefix::Playlist => decided = true,
                PlaylistPrefix::Undecided => {}
                PlaylistPrefix::NotPlaylist => {
                    debug!("{} ({}) is not a playlist, streaming", url, content_type);
                    let replay = stream::iter(chunks.into_iter().map(Ok)).chain(body);
                    return Ok((
                        Outcome::Passthrough,
                        stream_response(status, &upstream_headers, true, replay),
                    ));
                }
            }
        }
    }

    let body = Bytes::from(chunks.concat());

    match playlist_text(&body, &upstream_headers, limit) {
        Some(text) => {
            let rewritten = state.rewriter.rewrite(&text, &url);
            info!(
                "Rewrote playlist {} ({} references)",
                url, rewritten.references
            );
            metrics::record_rewritten_references(rewritten.references);
            Ok((Outcome::Rewritten, playlist_response(rewritten.body)))
        }
        None => {
            debug!("{} is not a playlist, relaying {} bytes", url, body.len());
            Ok((
                Outcome::Passthrough,
                buffered_response(status, &upstream_headers, body),
            ))
        }
    }
}

/// Decode a buffered body and return its text if it is an HLS playlist.
///
/// Failed decompression falls back to the raw bytes.
fn playlist_text(body: &Bytes, headers: &HeaderMap, limit: usize) -> Option<String> {
    let encoding = headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());

    let decoded: Cow<'_, [u8]> = match encoding {
        Some(encoding) => match decode::decompress_limited(body, encoding, limit) {
            Ok(decoded) => Cow::Owned(decoded),
            Err(e) => {
                warn!("Could not decode {} body, using raw bytes: {}", encoding, e);
                metrics::record_decode_fallback();
                Cow::Borrowed(body.as_ref())
            }
        },
        None => Cow::Borrowed(body.as_ref()),
    };

    let text = match std::str::from_utf8(&decoded) {
        Ok(text) => text,
        Err(_) => {
            debug!("Playlist candidate is not valid UTF-8");
            return None;
        }
    };

    has_playlist_marker(text).then(|| text.to_string())
}

fn has_content_encoding(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().eq_ignore_ascii_case("identity"))
}

fn relayed_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = upstream.clone();
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers
}

fn apply_no_cache(headers: &mut HeaderMap) {
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

/// Stream an upstream body to the client without buffering.
///
/// Dropping the returned body (client disconnect) drops the upstream
/// stream and aborts the origin transfer.
fn stream_response<S>(
    status: StatusCode,
    upstream: &HeaderMap,
    no_cache: bool,
    body: S,
) -> Response
where
    S: Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
{
    let mut headers = relayed_headers(upstream);
    if no_cache {
        apply_no_cache(&mut headers);
    }

    let stream = body.inspect_ok(|chunk| metrics::record_streamed_bytes(chunk.len()));

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Relay an already-buffered body with the upstream status and headers.
fn buffered_response(status: StatusCode, upstream: &HeaderMap, body: Bytes) -> Response {
    let mut headers = relayed_headers(upstream);
    apply_no_cache(&mut headers);

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn playlist_response(body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(HLS_CONTENT_TYPE),
    );
    apply_no_cache(&mut headers);

    (StatusCode::OK, headers, body).into_response()
}
