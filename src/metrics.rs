use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

const DECISION_LATENCY_BUCKETS: &[f64] = &[
    0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1,
];

pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full("flowgate_decision_latency_seconds".to_string()),
                DECISION_LATENCY_BUCKETS,
            )
            .expect("failed to set decision latency buckets")
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        register_metric_descriptions();
        set_build_info();

        handle
    })
}

fn register_metric_descriptions() {
    describe_gauge!("flowgate_build_info", "Build information with version label");
    describe_gauge!("flowgate_up", "Service health status (1 = healthy, 0 = unhealthy)");
    describe_gauge!(
        "flowgate_pool_allocated",
        "Number of backend sessions currently opened by the connection pool"
    );
    describe_gauge!(
        "flowgate_pool_idle",
        "Number of backend sessions currently idle in the connection pool"
    );
    describe_counter!(
        "flowgate_verdict_allow_total",
        "Total number of Allow verdicts"
    );
    describe_counter!(
        "flowgate_verdict_block_t1_total",
        "Total number of BlockT1 verdicts"
    );
    describe_counter!(
        "flowgate_verdict_block_t2_total",
        "Total number of BlockT2 verdicts"
    );
    describe_counter!(
        "flowgate_store_errors_total",
        "Total number of client store errors, by operation"
    );
    describe_counter!(
        "flowgate_subscriber_disconnects_total",
        "Total number of threshold subscriber listener exits, by channel"
    );
    describe_histogram!(
        "flowgate_decision_latency_seconds",
        "Latency of a single verdict decision"
    );
}

fn set_build_info() {
    gauge!("flowgate_build_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn set_health_status(healthy: bool) {
    gauge!("flowgate_up").set(if healthy { 1.0 } else { 0.0 });
}

pub fn set_pool_gauges(allocated: usize, idle: usize) {
    gauge!("flowgate_pool_allocated").set(allocated as f64);
    gauge!("flowgate_pool_idle").set(idle as f64);
}

pub fn inc_verdict_allow() {
    counter!("flowgate_verdict_allow_total").increment(1);
}

pub fn inc_verdict_block_t1() {
    counter!("flowgate_verdict_block_t1_total").increment(1);
}

pub fn inc_verdict_block_t2() {
    counter!("flowgate_verdict_block_t2_total").increment(1);
}

pub fn inc_store_error(operation: &'static str) {
    counter!("flowgate_store_errors_total", "operation" => operation).increment(1);
}

pub fn inc_subscriber_disconnect(channel: &'static str) {
    counter!("flowgate_subscriber_disconnects_total", "channel" => channel).increment(1);
}

pub fn record_decision_latency(seconds: f64) {
    histogram!("flowgate_decision_latency_seconds").record(seconds);
}

pub fn gather_metrics() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(|h| h.render())
        .unwrap_or_default()
}
