//! Gzip re-encoding of response bodies.
//!
//! # Design Decisions
//! - Only identity-encoded bodies are touched; anything that already declares a
//!   content-coding passes through, so a body is never compressed twice
//! - Small bodies are left alone (`min_length`)
//! - Encoding failures fall back to the original response

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::CompressionConfig;
use crate::http::response::Response;

/// Gzip the body of `response` when the client asked for it and it is worth it.
pub fn maybe_compress(response: Response, requested: bool, config: &CompressionConfig) -> Response {
    if !config.enabled
        || !requested
        || response.has_content_encoding()
        || response.body.is_empty()
        || response.body.len() < config.min_length
    {
        return response;
    }

    match gzip(&response.body, config.level) {
        Ok(encoded) => {
            let original_len = response.body.len();
            let mut response = response;
            response.body = encoded;
            response.headers.insert("Content-Encoding", "gzip");
            response.headers.insert("Content-Length", response.body.len().to_string());
            if !response.headers.has_token("vary", "accept-encoding") {
                response.headers.append("Vary", "Accept-Encoding");
            }
            tracing::trace!(
                original_len,
                compressed_len = response.body.len(),
                "Response body compressed"
            );
            response
        }
        Err(e) => {
            tracing::warn!(error = %e, "Gzip encoding failed, sending body unchanged");
            response
        }
    }
}

fn gzip(body: &[u8], level: u32) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 2), Compression::new(level));
    encoder.write_all(body)?;
    encoder.finish()
}
