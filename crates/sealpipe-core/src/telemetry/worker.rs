use std::time::Duration;

use crate::telemetry::{self, profile, tags};

const PROFILE_TAG_STACK_STAGE: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_STAGE];

/// Telemetry contract for stage workers.
///
/// Stage runners call these hooks so metrics and profiling events stay
/// independent of a specific backend.
pub trait StageTelemetry: Send + Sync {
    fn on_task_started(&self, stage: &'static str, worker_id: usize);
    fn on_task_finished(&self, stage: &'static str, worker_id: usize, elapsed: Duration);
    fn on_task_failed(&self, stage: &'static str, worker_id: usize, elapsed: Duration);
}

/// Default telemetry implementation that reports stage worker metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStageTelemetry;

impl StageTelemetry for DefaultStageTelemetry {
    fn on_task_started(&self, stage: &'static str, _worker_id: usize) {
        telemetry::add_gauge(
            tags::METRIC_STAGE_ACTIVE_COUNT,
            1,
            &[("subsystem", "stage"), ("stage", stage), ("op", "task_start")],
        );
    }

    fn on_task_finished(&self, stage: &'static str, _worker_id: usize, elapsed: Duration) {
        let elapsed_us = profile::duration_us(elapsed);
        let labels = [("subsystem", "stage"), ("stage", stage), ("result", "ok")];

        telemetry::increment_counter(tags::METRIC_STAGE_TASK_COUNT, 1, &labels);
        telemetry::record_histogram(tags::METRIC_STAGE_TASK_LATENCY_US, elapsed_us, &labels);
        telemetry::sub_gauge_saturating(tags::METRIC_STAGE_ACTIVE_COUNT, 1, &labels);

        profile::event(
            tags::PROFILE_STAGE,
            &PROFILE_TAG_STACK_STAGE,
            "task_finish",
            "ok",
            elapsed_us,
            "stage task finished",
        );
    }

    fn on_task_failed(&self, stage: &'static str, _worker_id: usize, elapsed: Duration) {
        let elapsed_us = profile::duration_us(elapsed);
        let labels = [("subsystem", "stage"), ("stage", stage), ("result", "error")];

        telemetry::increment_counter(tags::METRIC_STAGE_TASK_FAIL_COUNT, 1, &labels);
        telemetry::record_histogram(tags::METRIC_STAGE_TASK_LATENCY_US, elapsed_us, &labels);
        telemetry::sub_gauge_saturating(tags::METRIC_STAGE_ACTIVE_COUNT, 1, &labels);

        profile::event(
            tags::PROFILE_STAGE,
            &PROFILE_TAG_STACK_STAGE,
            "task_finish",
            "error",
            elapsed_us,
            "stage task failed",
        );
    }
}
