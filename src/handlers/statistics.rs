use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::monitor::Record;
use crate::AppState;

use super::AppError;

// ─── Request / response types ────────────────────────────────────

/// Body of `POST /api/statistics`: a single record or a batch.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RecordBatch {
    One(Record),
    Many(Vec<Record>),
}

impl RecordBatch {
    fn into_records(self) -> Vec<Record> {
        match self {
            Self::One(record) => vec![record],
            Self::Many(records) => records,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CollectOutcome {
    /// Queued for the writer
    pub accepted: usize,
    /// Lost to a full queue
    pub dropped: usize,
    /// Unparseable, or missing service or method
    pub rejected: usize,
}

#[derive(Debug, Serialize)]
pub struct QueueStatus {
    pub running: bool,
    pub depth: usize,
    pub capacity: usize,
    pub dropped: u64,
}

// ─── POST /api/statistics ────────────────────────────────────────

pub async fn collect(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<RecordBatch>,
) -> Result<(StatusCode, Json<CollectOutcome>), AppError> {
    if !state.monitor.is_running() {
        return Err(AppError::ShuttingDown);
    }

    let mut outcome = CollectOutcome::default();
    for record in batch.into_records() {
        tally(&state, record, &mut outcome);
    }

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

// ─── POST /api/statistics/urls ───────────────────────────────────

pub async fn collect_urls(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<(StatusCode, Json<CollectOutcome>), AppError> {
    if !state.monitor.is_running() {
        return Err(AppError::ShuttingDown);
    }

    let mut outcome = CollectOutcome::default();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        match line.parse::<Record>() {
            Ok(record) => tally(&state, record, &mut outcome),
            Err(e) => {
                tracing::warn!(line, error = %e, "rejected statistics line");
                outcome.rejected += 1;
            }
        }
    }

    if outcome.accepted == 0 && outcome.dropped == 0 && outcome.rejected > 0 {
        return Err(AppError::BadRequest(format!(
            "no valid statistics in {} line(s)",
            outcome.rejected
        )));
    }

    Ok((StatusCode::ACCEPTED, Json(outcome)))
}

fn tally(state: &AppState, record: Record, outcome: &mut CollectOutcome) {
    if let Err(e) = record.validate() {
        tracing::warn!(%record, error = %e, "rejected statistics record");
        outcome.rejected += 1;
    } else if state.monitor.collect(record) {
        outcome.accepted += 1;
    } else {
        outcome.dropped += 1;
    }
}

// ─── GET /api/statistics/lookup ──────────────────────────────────

pub async fn lookup(
    State(state): State<Arc<AppState>>,
    Query(parameters): Query<HashMap<String, String>>,
) -> Json<Vec<Record>> {
    let mut query = Record::new("count", "");
    query.parameters = parameters;
    Json(state.monitor.lookup(&query))
}

// ─── GET /api/queue ──────────────────────────────────────────────

pub async fn queue_status(State(state): State<Arc<AppState>>) -> Json<QueueStatus> {
    let queue = state.monitor.queue();
    Json(QueueStatus {
        running: state.monitor.is_running(),
        depth: queue.len(),
        capacity: queue.capacity(),
        dropped: queue.dropped(),
    })
}
