//! Line-oriented HLS playlist rewriting.
//!
//! Every reference a playlist makes to another network resource (variant
//! playlists, media segments, keys, init sections, alternate renditions) is
//! resolved against the playlist's own URL and wrapped as
//! `<proxy-path>?url=<percent-encoded absolute URL>`, so the player's nested
//! fetches come back through the proxy.
//!
//! The rewrite works on raw lines rather than a parsed playlist: line order,
//! line count, unknown tags and attribute spelling all survive untouched.

use regex::{Captures, Regex};
use std::sync::LazyLock;
use tracing::{debug, warn};
use url::Url;

/// Tags whose attribute lists may carry a quoted `URI` attribute.
static URI_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^#EXT-X-(?:KEY|MAP|MEDIA|I-FRAME-STREAM-INF|SESSION-DATA|SESSION-KEY|STREAM-INF):",
    )
    .expect("URI tag pattern is valid")
});

/// One `NAME=value` entry of an attribute list.
///
/// Matches are taken left to right over the whole list, so a quoted value is
/// consumed in one piece and text inside it is never seen as an attribute.
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?P<lead>[:,]\s*)(?P<name>[A-Za-z0-9-]+)=(?:"(?P<dq>[^"]*)"|'(?P<sq>[^']*)'|(?P<bare>[^,]*))"#,
    )
    .expect("attribute pattern is valid")
});

/// Result of rewriting one playlist
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteOutcome {
    pub body: String,
    /// Number of URI lines and attributes that were wrapped
    pub references: usize,
}

/// Rewrites playlist references to route back through the proxy.
#[derive(Debug, Clone)]
pub struct PlaylistRewriter {
    proxy_path: String,
    marker: String,
    force_https: bool,
}

impl PlaylistRewriter {
    /// Create a rewriter emitting references under `proxy_path` (e.g. `/proxy`).
    pub fn new(proxy_path: impl Into<String>) -> Self {
        let proxy_path = proxy_path.into();
        let marker = format!("{}?url=", proxy_path);
        Self {
            proxy_path,
            marker,
            force_https: false,
        }
    }

    /// Upgrade every resolved `http://` reference to `https://`.
    pub fn with_https_upgrade(mut self, enabled: bool) -> Self {
        self.force_https = enabled;
        self
    }

    pub fn proxy_path(&self) -> &str {
        &self.proxy_path
    }

    /// Returns `true` if `reference` already points at this proxy.
    pub fn is_proxied(&self, reference: &str) -> bool {
        reference.contains(&self.marker)
    }

    /// Wrap an absolute URL as a proxy-relative reference.
    pub fn proxied_url(&self, absolute: &Url) -> String {
        format!("{}{}", self.marker, urlencoding::encode(absolute.as_str()))
    }

    /// Resolve `reference` against `base`, keeping only http(s) results.
    pub fn resolve(&self, reference: &str, base: &Url) -> Option<Url> {
        let mut resolved = match base.join(reference) {
            Ok(url) => url,
            Err(e) => {
                warn!("Leaving unresolvable reference {:?}: {}", reference, e);
                return None;
            }
        };

        match resolved.scheme() {
            "https" => {}
            "http" if self.force_https => {
                // http -> https is always a permitted scheme change
                let _ = resolved.set_scheme("https");
            }
            "http" => {}
            other => {
                debug!("Leaving non-HTTP reference with scheme {}", other);
                return None;
            }
        }

        Some(resolved)
    }

    /// Rewrite every reference in `text`, resolving relative ones against `base`.
    pub fn rewrite(&self, text: &str, base: &Url) -> RewriteOutcome {
        let normalized = text.replace("\r\n", "\n");
        let mut references = 0;

        let lines: Vec<String> = normalized
            .split('\n')
            .map(|line| {
                let trimmed = line.trim();

                if trimmed.is_empty() {
                    return line.to_string();
                }

                if !trimmed.starts_with('#') {
                    return match self.rewrite_uri_line(trimmed, base) {
                        Some(rewritten) => {
                            references += 1;
                            rewritten
                        }
                        None => line.to_string(),
                    };
                }

                if URI_TAG.is_match(trimmed) {
                    let (rewritten, count) = self.rewrite_uri_attributes(line, base);
                    references += count;
                    return rewritten;
                }

                line.to_string()
            })
            .collect();

        RewriteOutcome {
            body: lines.join("\n"),
            references,
        }
    }

    fn rewrite_uri_line(&self, reference: &str, base: &Url) -> Option<String> {
        if self.is_proxied(reference) {
            return None;
        }
        self.resolve(reference, base)
            .map(|absolute| self.proxied_url(&absolute))
    }

    fn rewrite_uri_attributes(&self, line: &str, base: &Url) -> (String, usize) {
        let mut count = 0;
        let rewritten = ATTRIBUTE.replace_all(line, |caps: &Captures| {
            if &caps["name"] != "URI" {
                return caps[0].to_string();
            }
            let (value, quote) = match (caps.name("dq"), caps.name("sq")) {
                (Some(v), _) => (v.as_str(), '"'),
                (None, Some(v)) => (v.as_str(), '\''),
                (None, None) => return caps[0].to_string(),
            };

            if value.is_empty() || self.is_proxied(value) {
                return caps[0].to_string();
            }

            match self.resolve(value, base) {
                Some(absolute) => {
                    count += 1;
                    format!(
                        "{}URI={quote}{}{quote}",
                        &caps["lead"],
                        self.proxied_url(&absolute)
                    )
                }
                None => caps[0].to_string(),
            }
        });
        (rewritten.into_owned(), count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://origin.example/path/master.m3u8";

    fn base() -> Url {
        Url::parse(BASE).unwrap()
    }

    fn rewriter() -> PlaylistRewriter {
        PlaylistRewriter::new("/proxy")
    }

    fn proxied(absolute: &str) -> String {
        format!("/proxy?url={}", urlencoding::encode(absolute))
    }

    #[test]
    fn relative_segment_resolves_against_playlist_url() {
        let out = rewriter().rewrite("#EXTM3U\nseg/chunk1.ts", &base());
        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(
            lines[1],
            "/proxy?url=https%3A%2F%2Forigin.example%2Fpath%2Fseg%2Fchunk1.ts"
        );
        assert_eq!(out.references, 1);
    }

    #[test]
    fn absolute_and_root_relative_references() {
        let text = "#EXTM3U\nhttps://cdn.example/a.ts\n/live/b.ts\n../c.ts";
        let out = rewriter().rewrite(text, &base());
        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(lines[1], proxied("https://cdn.example/a.ts"));
        assert_eq!(lines[2], proxied("https://origin.example/live/b.ts"));
        assert_eq!(lines[3], proxied("https://origin.example/c.ts"));
    }

    #[test]
    fn key_attribute_rewritten_other_attributes_preserved() {
        let line = r#"#EXT-X-KEY:METHOD=AES-128,URI="key.bin",IV=0x0102"#;
        let out = rewriter().rewrite(line, &base());
        assert_eq!(
            out.body,
            format!(
                r#"#EXT-X-KEY:METHOD=AES-128,URI="{}",IV=0x0102"#,
                proxied("https://origin.example/path/key.bin")
            )
        );
        assert_eq!(out.references, 1);
    }

    #[test]
    fn single_quoted_attribute_keeps_quote_style() {
        let line = "#EXT-X-MAP:URI='init.mp4',BYTERANGE=\"720@0\"";
        let out = rewriter().rewrite(line, &base());
        assert_eq!(
            out.body,
            format!(
                "#EXT-X-MAP:URI='{}',BYTERANGE=\"720@0\"",
                proxied("https://origin.example/path/init.mp4")
            )
        );
    }

    #[test]
    fn media_and_iframe_tags_rewritten() {
        let text = concat!(
            "#EXTM3U\n",
            "#EXT-X-MEDIA:TYPE=AUDIO,GROUP-ID=\"aud\",NAME=\"en\",URI=\"audio/en.m3u8\"\n",
            "#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH=86000,URI=\"iframe.m3u8\"\n",
            "#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"https://keys.example/k\"\n",
            "#EXT-X-SESSION-DATA:DATA-ID=\"com.example\",URI=\"data.json\""
        );
        let out = rewriter().rewrite(text, &base());
        assert_eq!(out.references, 4);
        assert!(
            out.body
                .contains(&proxied("https://origin.example/path/audio/en.m3u8"))
        );
        assert!(out.body.contains("GROUP-ID=\"aud\",NAME=\"en\""));
        assert!(out.body.contains(&proxied("https://keys.example/k")));
    }

    #[test]
    fn uri_text_inside_another_quoted_value_is_not_an_attribute() {
        let line = r#"#EXT-X-SESSION-DATA:DATA-ID="a,URI='b'",URI="data.json""#;
        let out = rewriter().rewrite(line, &base());
        assert_eq!(
            out.body,
            format!(
                r#"#EXT-X-SESSION-DATA:DATA-ID="a,URI='b'",URI="{}""#,
                proxied("https://origin.example/path/data.json")
            )
        );
        assert_eq!(out.references, 1);

        let line = r#"#EXT-X-STREAM-INF:CODECS="avc1.4d401f,mp4a.40.2",BANDWIDTH=1"#;
        assert_eq!(rewriter().rewrite(line, &base()).body, line);
    }

    #[test]
    fn untracked_tags_and_comments_untouched() {
        let text = "#EXTM3U\n#EXTINF:10.0,\n#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"p.mp4\"\n# comment URI=\"x\"";
        let out = rewriter().rewrite(&format!("{text}\nseg.ts"), &base());
        assert!(out.body.starts_with(text));
        assert_eq!(out.references, 1);
    }

    #[test]
    fn blank_lines_and_line_count_preserved() {
        let text = "#EXTM3U\n\n#EXTINF:4,\nseg1.ts\n\n#EXTINF:4,\nseg2.ts\n";
        let out = rewriter().rewrite(text, &base());
        assert_eq!(out.body.split('\n').count(), text.split('\n').count());
        let lines: Vec<&str> = out.body.split('\n').collect();
        assert_eq!(lines[1], "");
        assert_eq!(lines[4], "");
        assert!(out.body.ends_with('\n'));
    }

    #[test]
    fn crlf_is_normalized() {
        let out = rewriter().rewrite("#EXTM3U\r\nseg1.ts\r\n", &base());
        assert!(!out.body.contains('\r'));
        assert_eq!(
            out.body,
            format!("#EXTM3U\n{}\n", proxied("https://origin.example/path/seg1.ts"))
        );
    }

    #[test]
    fn surrounding_whitespace_trimmed_before_resolving() {
        let out = rewriter().rewrite("#EXTM3U\n   seg1.ts  ", &base());
        assert!(out.body.ends_with(&proxied("https://origin.example/path/seg1.ts")));
    }

    #[test]
    fn rewriting_is_idempotent() {
        let text = concat!(
            "#EXTM3U\n",
            "#EXT-X-KEY:METHOD=AES-128,URI=\"key.bin\"\n",
            "#EXT-X-MAP:URI='init.mp4'\n",
            "#EXTINF:4,\n",
            "seg1.ts\n",
            "https://cdn.example/seg2.ts"
        );
        let once = rewriter().rewrite(text, &base());
        let twice = rewriter().rewrite(&once.body, &base());
        assert_eq!(once.body, twice.body);
        assert_eq!(twice.references, 0);
    }

    #[test]
    fn malformed_attribute_left_unchanged() {
        let line = r#"#EXT-X-KEY:METHOD=AES-128,URI="http://[::1",IV=0x01"#;
        let out = rewriter().rewrite(line, &base());
        assert_eq!(out.body, line);
        assert_eq!(out.references, 0);
    }

    #[test]
    fn malformed_uri_line_left_unchanged() {
        let out = rewriter().rewrite("#EXTM3U\nhttp://[::1\nok.ts", &base());
        let lines: Vec<&str> = out.body.lines().collect();
        assert_eq!(lines[1], "http://[::1");
        assert_eq!(lines[2], proxied("https://origin.example/path/ok.ts"));
    }

    #[test]
    fn non_http_references_left_unchanged() {
        let line = r#"#EXT-X-KEY:METHOD=SAMPLE-AES,URI="skd://key-id""#;
        let out = rewriter().rewrite(line, &base());
        assert_eq!(out.body, line);
    }

    #[test]
    fn https_upgrade_applies_to_resolved_references() {
        let rewriter = PlaylistRewriter::new("/proxy").with_https_upgrade(true);
        let base = Url::parse("http://origin.example/live/index.m3u8").unwrap();
        let out = rewriter.rewrite("#EXTM3U\nseg.ts", &base);
        assert!(out.body.ends_with(&proxied("https://origin.example/live/seg.ts")));
    }

    #[test]
    fn custom_proxy_path_used_as_prefix_and_marker() {
        let rewriter = PlaylistRewriter::new("/api/proxy");
        let out = rewriter.rewrite("#EXTM3U\nseg.ts", &base());
        assert!(out.body.contains("\n/api/proxy?url=https%3A%2F%2F"));
        assert!(rewriter.is_proxied(out.body.lines().last().unwrap()));
        assert!(!PlaylistRewriter::new("/proxy").is_proxied("/other?url=x"));
    }

    #[test]
    fn rewritten_master_playlist_still_parses() {
        let text = concat!(
            "#EXTM3U\n",
            "#EXT-X-STREAM-INF:BANDWIDTH=1280000,RESOLUTION=640x360\n",
            "low/index.m3u8\n",
            "#EXT-X-STREAM-INF:BANDWIDTH=2560000,RESOLUTION=1280x720\n",
            "high/index.m3u8\n"
        );
        let out = rewriter().rewrite(text, &base());
        match m3u8_rs::parse_playlist_res(out.body.as_bytes()) {
            Ok(m3u8_rs::Playlist::MasterPlaylist(master)) => {
                assert_eq!(master.variants.len(), 2);
                assert_eq!(
                    master.variants[0].uri,
                    proxied("https://origin.example/path/low/index.m3u8")
                );
            }
            other => panic!("expected master playlist, got {:?}", other),
        }
    }
}
