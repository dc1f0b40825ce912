//! Executor: the orchestration loop for one convergence run.
//!
//! check stage order → run-started event → for each stage: begin → converge
//! → end → run-completed event. The first fatal error records a run-failed
//! event and aborts; resources created by earlier stages stay in place.

use super::context::{CancelToken, ConvergeContext};
use super::error::{CastError, Result};
use super::resolver::{self, Stage, STAGE_ORDER};
use super::types::*;
use crate::cloud::ControlPlane;
use crate::stages;
use crate::tripwire::{eventlog, hasher};
use std::path::Path;
use std::time::Instant;

/// Configuration for a convergence run.
pub struct ConvergeConfig<'a> {
    pub doc: &'a TopologyDoc,
    /// Document label for the event log (usually its path)
    pub document: &'a str,
    /// BLAKE3 digest of the document text
    pub digest: &'a str,
    /// Credential source, recorded in the run-started event
    pub credentials: &'a str,
    pub event_log: Option<&'a Path>,
    pub cancel: CancelToken,
}

/// Drive every stage in order against `plane`.
pub fn converge(plane: &mut dyn ControlPlane, cfg: &ConvergeConfig) -> Result<RunReport> {
    let start = Instant::now();
    resolver::check_stage_order(&STAGE_ORDER)?;

    let run_id = eventlog::generate_run_id();
    let events = eventlog::EventLog::new(cfg.event_log.map(Path::to_path_buf));
    let mut ctx = ConvergeContext::new(plane, cfg.doc, events, cfg.cancel.clone());
    ctx.report.run_id = run_id.clone();

    log::info!(
        "Converging {} ({}) as run {}",
        cfg.document,
        hasher::short_digest(cfg.digest),
        run_id
    );
    ctx.record_event(ProvenanceEvent::RunStarted {
        run_id: run_id.clone(),
        document: cfg.document.to_string(),
        digest: cfg.digest.to_string(),
        credentials: cfg.credentials.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    });

    for &stage in STAGE_ORDER.iter() {
        if let Err(e) = run_stage(&mut ctx, stage) {
            log::error!("Stage {} failed: {}", stage, e);
            // empty when the stage never began
            let failed = match ctx.current_stage() {
                "" => stage.name(),
                running => running,
            }
            .to_string();
            ctx.record_event(ProvenanceEvent::RunFailed {
                run_id,
                stage: failed,
                error: e.to_string(),
            });
            return Err(e);
        }
    }

    let (mut report, mut events) = ctx.finish();
    report.duration = start.elapsed();
    for summary in &report.stages {
        log::debug!(
            "  {:<22} {} created, {} updated",
            summary.stage,
            summary.created,
            summary.updated
        );
    }
    events.record(ProvenanceEvent::RunCompleted {
        run_id,
        created: report.created,
        updated: report.updated,
        warnings: report.warnings.len() as u32,
        seconds: report.duration.as_secs_f64(),
    });
    Ok(report)
}

fn run_stage(ctx: &mut ConvergeContext<'_>, stage: Stage) -> Result<()> {
    if ctx.cancel.is_cancelled() {
        return Err(CastError::Cancelled(format!("stage {}", stage)));
    }
    ctx.begin_stage(stage)?;
    stages::run(ctx, stage)?;
    ctx.end_stage(stage);
    Ok(())
}
