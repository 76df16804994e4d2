// src/storage/codec.rs

//! Snapshot wire codec with optional gzip compression.
//!
//! Large snapshots store `text` (and `html`) as gzip+base64 with sentinel
//! fields; small ones stay plain JSON. Compression is only applied when it
//! actually shrinks the encoding, and decode is transparent either way.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Snapshot;

const COMPRESSION_FIELD: &str = "compression";
const TEXT_FIELD: &str = "text_gzip_base64";
const HTML_FIELD: &str = "html_gzip_base64";
const TEXT_LEN_FIELD: &str = "text_len";

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Encode a snapshot, compressing `text`/`html` when that shrinks the record.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let plain = serde_json::to_vec(snapshot)?;

    let mut value = serde_json::to_value(snapshot)?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| AppError::store("snapshot did not serialize to an object"))?;

    object.remove("text");
    object.insert(
        TEXT_FIELD.into(),
        Value::String(BASE64.encode(gzip(snapshot.text.as_bytes())?)),
    );
    object.insert(TEXT_LEN_FIELD.into(), Value::from(snapshot.text.len()));
    if let Some(html) = &snapshot.html {
        object.remove("html");
        object.insert(
            HTML_FIELD.into(),
            Value::String(BASE64.encode(gzip(html.as_bytes())?)),
        );
    }
    object.insert(COMPRESSION_FIELD.into(), Value::String("gzip".into()));

    let compressed = serde_json::to_vec(&value)?;
    if compressed.len() < plain.len() {
        Ok(compressed)
    } else {
        Ok(plain)
    }
}

/// Decode either encoding back to a snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    let mut value: Value = serde_json::from_slice(bytes)?;

    let is_compressed = value
        .get(COMPRESSION_FIELD)
        .and_then(|v| v.as_str())
        .map(|v| v == "gzip")
        .unwrap_or(false);

    if is_compressed {
        let object = value
            .as_object_mut()
            .ok_or_else(|| AppError::store("compressed snapshot is not an object"))?;

        let text_b64 = object
            .remove(TEXT_FIELD)
            .and_then(|v| v.as_str().map(String::from))
            .ok_or_else(|| AppError::store("compressed snapshot missing text payload"))?;
        let text_bytes = gunzip(
            &BASE64
                .decode(text_b64)
                .map_err(|e| AppError::store(format!("bad base64 in snapshot: {e}")))?,
        )?;
        let text = String::from_utf8(text_bytes)
            .map_err(|e| AppError::store(format!("snapshot text is not UTF-8: {e}")))?;
        object.insert("text".into(), Value::String(text));

        if let Some(html_b64) = object
            .remove(HTML_FIELD)
            .and_then(|v| v.as_str().map(String::from))
        {
            let html_bytes = gunzip(
                &BASE64
                    .decode(html_b64)
                    .map_err(|e| AppError::store(format!("bad base64 in snapshot: {e}")))?,
            )?;
            let html = String::from_utf8(html_bytes)
                .map_err(|e| AppError::store(format!("snapshot html is not UTF-8: {e}")))?;
            object.insert("html".into(), Value::String(html));
        }

        object.remove(COMPRESSION_FIELD);
        object.remove(TEXT_LEN_FIELD);
    }

    serde_json::from_value(value).map_err(AppError::Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::snapshot::sha256_hex;
    use crate::models::{FetchMetrics, SnapshotMode};
    use chrono::Utc;

    fn snapshot(text: &str, html: Option<&str>) -> Snapshot {
        Snapshot {
            url: "https://example.com/".into(),
            final_url: "https://example.com/".into(),
            fetched_at: Utc::now(),
            status: 200,
            mode: SnapshotMode::Text,
            text: text.into(),
            html: html.map(String::from),
            content_hash: sha256_hex(text),
            etag: Some("\"abc\"".into()),
            last_modified: None,
            metrics: FetchMetrics {
                bytes: text.len() as u64,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_small_snapshot_stays_plain() {
        let s = snapshot("tiny", None);
        let encoded = encode_snapshot(&s).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert!(value.get(COMPRESSION_FIELD).is_none());
        assert_eq!(value["text"], "tiny");
    }

    #[test]
    fn test_large_snapshot_compresses() {
        let text = "repetitive content ".repeat(500);
        let s = snapshot(&text, None);
        let encoded = encode_snapshot(&s).unwrap();
        let value: Value = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(value[COMPRESSION_FIELD], "gzip");
        assert!(value.get("text").is_none());
        assert_eq!(value[TEXT_LEN_FIELD], text.len());
        assert!(encoded.len() < serde_json::to_vec(&s).unwrap().len());
    }

    #[test]
    fn test_decode_encode_is_identity_on_text_and_html() {
        let text = "line one\nline two ".repeat(300);
        let html = format!("<div>{}</div>", "markup ".repeat(300));
        let s = snapshot(&text, Some(&html));

        let decoded = decode_snapshot(&encode_snapshot(&s).unwrap()).unwrap();
        assert_eq!(decoded.text, s.text);
        assert_eq!(decoded.html, s.html);
        assert_eq!(decoded.content_hash, s.content_hash);
        assert_eq!(decoded.etag, s.etag);
    }

    #[test]
    fn test_decode_plain_json() {
        let s = snapshot("plain", None);
        let plain = serde_json::to_vec(&s).unwrap();
        let decoded = decode_snapshot(&plain).unwrap();
        assert_eq!(decoded.text, "plain");
    }
}
