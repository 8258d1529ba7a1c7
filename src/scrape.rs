//! Scrape pipeline: fetch a rule's result, inflate, decode, convert, write.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;

use flate2::bufread::MultiGzDecoder;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING, USER_AGENT};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::convert::{convert_response, encode_text};
use crate::credentials::CredentialProvider;
use crate::metrics;
use crate::models::Response;
use crate::{BridgeError, Result};

pub const ACCEPT_HEADER: &str = "application/json,text/plain;q=0.5,*/*;q=0.1";
pub const USER_AGENT_HEADER: &str = concat!("bosun_bridge/", env!("CARGO_PKG_VERSION"));
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

/// Content type of everything `Scraper::scrape` writes.
pub const EXPOSITION_CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// One rule to evaluate and the family its results are published under.
#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeTarget {
    pub name: String,
    pub rule: String,
    pub metric: String,
    pub timeout: Duration,
}

/// Gzip output buffer kept by a `Scraper` between scrapes.
///
/// The buffer keeps its capacity across calls and is cleared by `reset` before
/// every use. The decoder itself is built per body; concatenated gzip members
/// are all inflated.
#[derive(Debug, Default)]
pub struct Decompressor {
    inflated: Vec<u8>,
}

impl Decompressor {
    pub fn reset(&mut self) {
        self.inflated.clear();
    }

    pub fn inflate(&mut self, compressed: &[u8]) -> io::Result<&[u8]> {
        self.reset();
        MultiGzDecoder::new(compressed).read_to_end(&mut self.inflated)?;
        Ok(&self.inflated)
    }
}

/// Scrape session for one target.
///
/// Holds reusable buffers, so `scrape` takes `&mut self`: one scrape per session
/// at a time. Give every target its own session.
pub struct Scraper {
    client: reqwest::Client,
    endpoint: String,
    target: ScrapeTarget,
    credentials: Arc<CredentialProvider>,
    body: Vec<u8>,
    decompressor: Option<Decompressor>,
}

impl Scraper {
    pub fn new(
        client: reqwest::Client,
        endpoint: impl Into<String>,
        target: ScrapeTarget,
        credentials: Arc<CredentialProvider>,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            target,
            credentials,
            body: Vec::new(),
            decompressor: None,
        }
    }

    pub fn target(&self) -> &ScrapeTarget {
        &self.target
    }

    /// Runs one scrape and writes the exposition text to `w`.
    ///
    /// Nothing is written unless the whole response was fetched, decoded and
    /// encoded. Cancelling `cancel` aborts the request as a transport error.
    pub async fn scrape<W: Write + ?Sized>(
        &mut self,
        cancel: &CancellationToken,
        w: &mut W,
    ) -> Result<&'static str> {
        let _timer = metrics::start_scrape(&self.target.name);
        let outcome = self.run(cancel, w).await;
        if let Err(e) = &outcome {
            metrics::record_scrape_failure(&self.target.name, e.kind());
            warn!(scrape_target = %self.target.name, "Scrape failed: {}", e);
        }
        outcome
    }

    async fn run<W: Write + ?Sized>(
        &mut self,
        cancel: &CancellationToken,
        w: &mut W,
    ) -> Result<&'static str> {
        let gzipped = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(BridgeError::Transport("scrape cancelled".to_string()));
            }
            fetched = self.fetch() => fetched?,
        };

        let response = if gzipped {
            let decompressor = self.decompressor.get_or_insert_with(Decompressor::default);
            let inflated = decompressor
                .inflate(&self.body)
                .map_err(|e| BridgeError::Decode(format!("bad gzip body: {}", e)))?;
            Response::from_slice(inflated)?
        } else {
            Response::from_slice(&self.body)?
        };

        let samples = convert_response(&response);
        let encoded = encode_text(&self.target.metric, &samples)?;
        w.write_all(&encoded)
            .map_err(|e| BridgeError::Serialization(e.to_string()))?;

        metrics::record_samples(&self.target.name, samples.len());
        debug!(
            scrape_target = %self.target.name,
            results = response.results.len(),
            samples = samples.len(),
            "Converted response"
        );
        Ok(EXPOSITION_CONTENT_TYPE)
    }

    /// Sends the rule and buffers the body. Returns whether it is gzip encoded.
    async fn fetch(&mut self) -> Result<bool> {
        let mut response = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(USER_AGENT, USER_AGENT_HEADER)
            .header(ACCEPT_ENCODING, "gzip")
            .header(
                SCRAPE_TIMEOUT_HEADER,
                format!("{:.6}", self.target.timeout.as_secs_f64()),
            )
            .header(AUTHORIZATION, self.credentials.current())
            .timeout(self.target.timeout)
            .body(self.target.rule.clone())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(
                scrape_target = %self.target.name,
                status = %status,
                "Translation endpoint rejected the request"
            );
            return Err(BridgeError::Transport(format!(
                "server returned HTTP status {}",
                status
            )));
        }

        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .is_some_and(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"));

        self.body.clear();
        while let Some(chunk) = response.chunk().await? {
            self.body.extend_from_slice(&chunk);
        }
        Ok(gzipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decompressor_is_reusable() {
        let mut decompressor = Decompressor::default();
        assert_eq!(decompressor.inflate(&gzip(b"first body")).unwrap(), b"first body");
        assert_eq!(decompressor.inflate(&gzip(b"second")).unwrap(), b"second");
    }

    #[test]
    fn test_decompressor_rejects_garbage() {
        let mut decompressor = Decompressor::default();
        assert!(decompressor.inflate(b"not gzip at all").is_err());
        assert_eq!(decompressor.inflate(&gzip(b"ok")).unwrap(), b"ok");
    }

    #[test]
    fn test_decompressor_reads_every_member() {
        let mut body = gzip(br#"{"type":"0","results":"#);
        body.extend(gzip(br#"[{"value":1,"group":{}}]}"#));

        let mut decompressor = Decompressor::default();
        let inflated = decompressor.inflate(&body).unwrap();
        assert_eq!(inflated, br#"{"type":"0","results":[{"value":1,"group":{}}]}"#);
        assert_eq!(Response::from_slice(inflated).unwrap().results.len(), 1);
    }

    #[test]
    fn test_timeout_header_format() {
        assert_eq!(format!("{:.6}", Duration::from_millis(2500).as_secs_f64()), "2.500000");
    }
}
