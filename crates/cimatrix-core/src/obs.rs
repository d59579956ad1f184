//! Structured lifecycle events for builds, legs and post-build stages.
//!
//! Every emitter logs an `event` field so log pipelines can filter on it
//! (`event = "leg.finished"` and so on). Credentials never pass through
//! here.

use std::fmt::Display;

use tracing::{info, warn};

use crate::domain::{LegReport, LegStatus, MatrixLeg, StepResult};

/// Span carrying `build_id`; attach it to the build future with `Instrument`.
pub fn build_span(build_id: &str) -> tracing::Span {
    tracing::info_span!("cimatrix.build", build_id = %build_id)
}

/// Span for one leg; attach it to the leg's task with `Instrument`.
pub fn leg_span(index: usize, leg: &MatrixLeg) -> tracing::Span {
    tracing::info_span!("cimatrix.leg", index = index, leg = %leg.slug())
}

pub fn emit_build_started(build_id: &str, matrix_digest: &str, legs: usize, record_index: usize) {
    info!(
        event = "build.started",
        build_id = %build_id,
        matrix_digest = %matrix_digest,
        legs = legs,
        record_index = record_index,
    );
}

pub fn emit_build_finished(build_id: &str, duration_ms: u64, passed: usize, failed: usize, success: bool) {
    info!(
        event = "build.finished",
        build_id = %build_id,
        duration_ms = duration_ms,
        passed = passed,
        failed = failed,
        success = success,
    );
}

pub fn emit_build_cancelled(build_id: &str) {
    warn!(event = "build.cancelled", build_id = %build_id);
}

pub fn emit_leg_started(index: usize, leg: &MatrixLeg) {
    info!(event = "leg.started", index = index, leg = %leg);
}

pub fn emit_leg_finished(report: &LegReport) {
    match report.status {
        LegStatus::Passed => info!(
            event = "leg.finished",
            index = report.index,
            leg = %report.leg,
            duration_ms = report.duration_ms,
            success = true,
        ),
        _ => warn!(
            event = "leg.finished",
            index = report.index,
            leg = %report.leg,
            duration_ms = report.duration_ms,
            success = false,
            status = ?report.status,
            reason = %report.failure.as_ref().map(|f| f.message.as_str()).unwrap_or(""),
        ),
    }
}

pub fn emit_step_finished(leg: &MatrixLeg, step: &StepResult) {
    info!(
        event = "step.finished",
        leg = %leg,
        step = %step.step_name,
        exit_code = step.exit_code,
        duration_ms = step.duration_ms,
    );
}

/// The seed used for bucketed test ordering, logged so a failing order can
/// be replayed.
pub fn emit_shuffle_seed(leg: &MatrixLeg, seed: u64) {
    info!(event = "tests.seed", leg = %leg, seed = seed);
}

pub fn emit_gate_evaluated(gate: &str, open: bool, reasons: &[String]) {
    info!(
        event = "gate.evaluated",
        gate = %gate,
        open = open,
        reasons = %reasons.join("; "),
    );
}

pub fn emit_docs_published(branch: &str) {
    info!(event = "docs.published", branch = %branch);
}

pub fn emit_docs_failed(error: &dyn Display) {
    warn!(event = "docs.failed", error = %error);
}

pub fn emit_deploy_outcome(coordinate: &str, leg: Option<&MatrixLeg>, outcome: &str) {
    let leg = leg.map(MatrixLeg::slug).unwrap_or_else(|| "build".to_string());
    info!(event = "deploy.outcome", coordinate = %coordinate, leg = %leg, outcome = %outcome);
}

pub fn emit_deploy_rejected(coordinate: &str, reason: &str) {
    warn!(event = "deploy.rejected", coordinate = %coordinate, reason = %reason);
}

pub fn emit_notification(build_id: &str, sent: bool) {
    info!(event = "build.notification_decided", build_id = %build_id, sent = sent);
}

/// A post-build step failed in a way the build tolerates.
pub fn emit_best_effort_error(stage: &str, error: &dyn Display) {
    warn!(event = "build.best_effort_error", stage = %stage, error = %error);
}
