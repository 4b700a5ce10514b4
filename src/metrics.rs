use metrics::{gauge, histogram, increment_counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::info;

/// Install the global Prometheus recorder. Without it every recording below
/// is a no-op.
pub fn install_prometheus() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("Prometheus recorder installed");
    Ok(handle)
}

pub struct SolveMetrics;

impl SolveMetrics {
    pub fn record_submission() {
        increment_counter!("hcaptcha_tasks_submitted_total");
    }

    pub fn record_outcome(success: bool, elapsed: Duration) {
        if success {
            increment_counter!("hcaptcha_tasks_succeeded_total");
        } else {
            increment_counter!("hcaptcha_tasks_failed_total");
        }
        histogram!("hcaptcha_solve_duration_seconds", elapsed.as_secs_f64());
    }

    pub fn record_timeout() {
        increment_counter!("hcaptcha_tasks_timed_out_total");
    }

    pub fn record_pool(pool: &str, available: usize, size: usize) {
        gauge!("hcaptcha_pool_available", available as f64, "pool" => pool.to_string());
        gauge!("hcaptcha_pool_size", size as f64, "pool" => pool.to_string());
    }
}
