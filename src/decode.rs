//! `Content-Encoding` reversal for buffered playlist bodies.
//!
//! Upstream requests ask for `identity`, but origins do not always honour it.
//! Only the buffered (playlist) path decodes; pass-through streams keep the
//! original encoding and headers so the client can decode them itself.

use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::{self, Read};
use tracing::debug;

/// A single coding named in a `Content-Encoding` header.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ContentEncoding {
    Gzip,
    Deflate,
    Brotli,
    Zstd,
    Identity,
}

impl ContentEncoding {
    fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            "zstd" => Some(Self::Zstd),
            "identity" | "" => Some(Self::Identity),
            _ => None,
        }
    }

    fn decode(self, data: &[u8], limit: usize) -> io::Result<Vec<u8>> {
        match self {
            Self::Gzip => read_limited(GzDecoder::new(data), limit),
            // "deflate" is specified as zlib-wrapped, but raw deflate is common in the wild
            Self::Deflate => read_limited(ZlibDecoder::new(data), limit)
                .or_else(|_| read_limited(DeflateDecoder::new(data), limit)),
            Self::Brotli => read_limited(brotli::Decompressor::new(data, 4096), limit),
            Self::Zstd => read_limited(zstd::stream::read::Decoder::new(data)?, limit),
            Self::Identity => read_limited(data, limit),
        }
    }
}

/// Read `reader` to the end, failing once more than `limit` bytes come out.
fn read_limited<R: Read>(reader: R, limit: usize) -> io::Result<Vec<u8>> {
    let cap = u64::try_from(limit).unwrap_or(u64::MAX).saturating_add(1);
    let mut out = Vec::new();
    reader.take(cap).read_to_end(&mut out)?;
    if out.len() > limit {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("decoded body exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

/// Parse a `Content-Encoding` header value into the codings in applied order.
///
/// Returns an error for codings we cannot undo.
pub fn parse_encodings(header: &str) -> io::Result<Vec<ContentEncoding>> {
    header
        .split(',')
        .map(|token| {
            ContentEncoding::from_token(token).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("unsupported content-encoding: {}", token.trim()),
                )
            })
        })
        .filter(|enc| !matches!(enc, Ok(ContentEncoding::Identity)))
        .collect()
}

/// Undo every coding listed in `content_encoding`, last-applied first.
pub fn decompress(body: &[u8], content_encoding: &str) -> io::Result<Vec<u8>> {
    decompress_limited(body, content_encoding, usize::MAX)
}

/// Like [`decompress`], but every decoding stage may produce at most `limit` bytes.
pub fn decompress_limited(
    body: &[u8],
    content_encoding: &str,
    limit: usize,
) -> io::Result<Vec<u8>> {
    let encodings = parse_encodings(content_encoding)?;
    let mut current = body.to_vec();
    for encoding in encodings.into_iter().rev() {
        current = encoding.decode(&current, limit)?;
        debug!("Decoded {:?} body to {} bytes", encoding, current.len());
    }
    Ok(current)
}
