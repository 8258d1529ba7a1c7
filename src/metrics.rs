use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramTimer, HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

use crate::Result;

lazy_static! {
    // Scrape metrics
    pub static ref SCRAPES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "bosun_bridge_scrapes_total",
        "Total number of scrapes attempted",
        &["target"]
    ).unwrap();

    pub static ref SCRAPE_FAILURES: IntCounterVec = register_int_counter_vec!(
        "bosun_bridge_scrape_failures_total",
        "Total number of failed scrapes by error kind",
        &["target", "kind"]
    ).unwrap();

    pub static ref SCRAPE_DURATION: HistogramVec = register_histogram_vec!(
        "bosun_bridge_scrape_duration_seconds",
        "Scrape duration in seconds",
        &["target"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]
    ).unwrap();

    pub static ref SAMPLES_CONVERTED: IntCounterVec = register_int_counter_vec!(
        "bosun_bridge_samples_converted_total",
        "Total number of samples written to exposition output",
        &["target"]
    ).unwrap();

    // Background task metrics
    pub static ref TOKEN_REFRESH_FAILURES: IntCounter = register_int_counter!(
        "bosun_bridge_token_refresh_failures_total",
        "Total number of failed credential refreshes"
    ).unwrap();

    pub static ref CONFIG_RELOADS: IntCounter = register_int_counter!(
        "bosun_bridge_config_reloads_total",
        "Total number of local config rewrites from the remote store"
    ).unwrap();
}

/// Counts a scrape and times it until the returned timer is dropped.
pub fn start_scrape(target: &str) -> HistogramTimer {
    SCRAPES_TOTAL.with_label_values(&[target]).inc();
    SCRAPE_DURATION.with_label_values(&[target]).start_timer()
}

pub fn record_scrape_failure(target: &str, kind: &str) {
    SCRAPE_FAILURES.with_label_values(&[target, kind]).inc();
}

pub fn record_samples(target: &str, count: usize) {
    SAMPLES_CONVERTED
        .with_label_values(&[target])
        .inc_by(count as u64);
}

pub fn record_token_refresh_failure() {
    TOKEN_REFRESH_FAILURES.inc();
}

pub fn record_config_reload() {
    CONFIG_RELOADS.inc();
}

/// Renders the process registry in text format.
pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| crate::BridgeError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_show_up_in_gather() {
        record_scrape_failure("metrics-test", "transport");
        record_samples("metrics-test", 3);
        drop(start_scrape("metrics-test"));

        let text = gather_text().unwrap();
        assert!(text.contains(
            "bosun_bridge_scrape_failures_total{kind=\"transport\",target=\"metrics-test\"} 1"
        ));
        assert!(text.contains("bosun_bridge_samples_converted_total{target=\"metrics-test\"} 3"));
        assert!(text.contains("bosun_bridge_scrapes_total{target=\"metrics-test\"} 1"));
    }
}
