use tracing::trace;

// Request and job timing signals, logged through tracing rather than the
// metrics macros so the exporter can stay optional.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "rastro.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn job_elapsed(task: &str, elapsed_ms: u128) {
    trace!(
        target = "rastro.metrics",
        task = task,
        elapsed_ms = elapsed_ms as u64,
        "job_elapsed"
    );
}

pub fn step_elapsed(step: &str, elapsed_ms: u128) {
    trace!(
        target = "rastro.metrics",
        step = step,
        elapsed_ms = elapsed_ms as u64,
        "step_elapsed"
    );
}
