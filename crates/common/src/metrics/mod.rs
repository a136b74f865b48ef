//! Metrics and observability utilities
//!
//! Provides metric descriptions and record helpers for chat turns,
//! searches, ingestion, tool dispatches, and cache traffic, using the
//! `metrics` facade with standardized naming.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all LoreForge metrics
pub const METRICS_PREFIX: &str = "loreforge";

/// Register all metric descriptions
pub fn register_metrics() {
    // Chat metrics
    describe_counter!(
        format!("{}_chat_turns_total", METRICS_PREFIX),
        Unit::Count,
        "Total chat turns served"
    );

    describe_histogram!(
        format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end chat turn latency in seconds"
    );

    // Search metrics
    describe_counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total search queries"
    );

    describe_histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Search latency in seconds"
    );

    describe_gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        Unit::Count,
        "Number of results returned from search"
    );

    // Ingestion metrics
    describe_counter!(
        format!("{}_documents_ingested_total", METRICS_PREFIX),
        Unit::Count,
        "Total documents ingested"
    );

    describe_counter!(
        format!("{}_chunks_created_total", METRICS_PREFIX),
        Unit::Count,
        "Total chunks created"
    );

    describe_histogram!(
        format!("{}_ingestion_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Ingestion run latency in seconds"
    );

    // Tool metrics
    describe_counter!(
        format!("{}_tool_dispatches_total", METRICS_PREFIX),
        Unit::Count,
        "Total tool dispatches"
    );

    describe_histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Tool dispatch latency in seconds"
    );

    // Cache metrics
    describe_counter!(
        format!("{}_cache_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache hits"
    );

    describe_counter!(
        format!("{}_cache_misses_total", METRICS_PREFIX),
        Unit::Count,
        "Total cache misses"
    );

    tracing::info!("Metrics registered");
}

/// Helper to time a chat turn
pub struct TurnMetrics {
    start: Instant,
    intent: String,
}

impl TurnMetrics {
    /// Start tracking a turn
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
            intent: "unknown".to_string(),
        }
    }

    /// Record the classified intent
    pub fn intent(&mut self, intent: &str) {
        self.intent = intent.to_string();
    }

    /// Record turn completion
    pub fn finish(self) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_chat_turns_total", METRICS_PREFIX),
            "intent" => self.intent.clone()
        )
        .increment(1);

        histogram!(
            format!("{}_chat_turn_duration_seconds", METRICS_PREFIX),
            "intent" => self.intent
        )
        .record(duration);
    }
}

/// Helper to record search metrics
pub fn record_search(duration_secs: f64, mode: &str, method: &str, result_count: usize) {
    counter!(
        format!("{}_search_queries_total", METRICS_PREFIX),
        "mode" => mode.to_string(),
        "method" => method.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_search_duration_seconds", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .record(duration_secs);

    gauge!(
        format!("{}_search_results_count", METRICS_PREFIX),
        "mode" => mode.to_string()
    )
    .set(result_count as f64);
}

/// Helper to record ingestion metrics
pub fn record_ingestion(duration_secs: f64, documents: usize, chunks_created: usize) {
    counter!(format!("{}_documents_ingested_total", METRICS_PREFIX)).increment(documents as u64);
    counter!(format!("{}_chunks_created_total", METRICS_PREFIX)).increment(chunks_created as u64);
    histogram!(format!("{}_ingestion_duration_seconds", METRICS_PREFIX)).record(duration_secs);
}

/// Helper to record a tool dispatch
pub fn record_tool(duration_secs: f64, tool: &str, success: bool) {
    let status = if success { "success" } else { "error" };

    counter!(
        format!("{}_tool_dispatches_total", METRICS_PREFIX),
        "tool" => tool.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_tool_duration_seconds", METRICS_PREFIX),
        "tool" => tool.to_string()
    )
    .record(duration_secs);
}

/// Helper to record cache metrics
pub fn record_cache(hit: bool, cache_name: &str) {
    if hit {
        counter!(
            format!("{}_cache_hits_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    } else {
        counter!(
            format!("{}_cache_misses_total", METRICS_PREFIX),
            "cache" => cache_name.to_string()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_helpers_do_not_panic() {
        // The facade has no recorder installed under test; calls are no-ops
        record_search(0.05, "hybrid", "standard", 8);
        record_ingestion(1.2, 3, 42);
        record_tool(0.5, "search_knowledge", true);
        record_cache(true, "embedding");

        let mut turn = TurnMetrics::start();
        turn.intent("search");
        turn.finish();
    }
}
