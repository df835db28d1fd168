//! Output handling for finished claim reports.
//!
//! The rendered report can be written to a local file or packed into a
//! gzipped JSON envelope and uploaded to S3, which is how the report job
//! hands results to its consumers.

use anyhow::Result;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::io::Write;
use tracing::{debug, info};

use crate::engine::ClaimReport;

/// The JSON envelope consumers download: the flat per-trip summaries plus
/// the rendered legacy report text.
#[derive(Serialize)]
struct ReportEnvelope<'a> {
    summaries: &'a [crate::engine::TripSummary],
    report: &'a str,
}

/// Writes the rendered report text to a local file.
pub fn write_report_file(path: &str, report: &ClaimReport) -> Result<()> {
    debug!(path, bytes = report.rendered.len(), "writing report file");
    std::fs::write(path, &report.rendered)?;
    Ok(())
}

/// Serializes the report envelope to JSON bytes.
pub fn envelope_json(report: &ClaimReport) -> Result<Vec<u8>> {
    let envelope = ReportEnvelope {
        summaries: &report.summaries,
        report: &report.rendered,
    };
    Ok(serde_json::to_vec(&envelope)?)
}

/// Gzip-compresses a byte buffer.
pub fn gzip_bytes(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

/// Uploads the finished artifact to S3.
pub async fn upload_report(
    client: &aws_sdk_s3::Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
    gzipped: bool,
) -> Result<()> {
    let mut put = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(body.into())
        .content_type("application/json");
    if gzipped {
        put = put.content_encoding("gzip");
    }
    put.send().await?;

    info!(bucket, key, "report uploaded");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    #[test]
    fn test_gzip_round_trip() {
        let payload = b"Route No.,OD,IB/OB".to_vec();
        let compressed = gzip_bytes(&payload).unwrap();

        let mut decoder = GzDecoder::new(compressed.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed).unwrap();

        assert_eq!(decompressed, payload);
    }

    #[test]
    fn test_envelope_contains_report_text() {
        let report = ClaimReport {
            summaries: Vec::new(),
            routes: Vec::new(),
            rendered: "Grand Total :".to_string(),
        };
        let json = envelope_json(&report).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();

        assert_eq!(value["report"], "Grand Total :");
        assert!(value["summaries"].as_array().unwrap().is_empty());
    }
}
