//! JSONL audit trail: one row per committed batch.
//!
//! Rows are serialized on a dedicated thread so a slow disk never stalls the
//! sampler. Each row is flushed as soon as it is written, so an interrupted
//! run still leaves every committed batch on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::confidence::MetricVerdict;
use crate::outcome::RunningTally;

#[derive(Debug, Clone, Serialize)]
pub struct BatchTrace {
    pub recorded_at: DateTime<Utc>,
    pub run_id: Uuid,
    /// 1-based.
    pub batch_index: u64,
    pub batch_size: u64,
    pub trials_completed: u64,
    /// blake3 of the rendered prompts, so rows never carry the content itself.
    pub prompt_a_hash: String,
    pub prompt_b_hash: String,
    pub structured_output: bool,
    pub tally_a: RunningTally,
    pub tally_b: RunningTally,
    pub verdicts: Vec<MetricVerdict>,
    /// Oracle calls beyond the first, summed over the batch.
    pub retries: u64,
    /// Slots that ended on the all-zero fallback.
    pub fallback_samples: u64,
    /// Oracle replies with no outcome fields, retried or not.
    pub unparseable_replies: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TraceError {
    #[error("trace io: {0}")]
    Io(#[from] std::io::Error),
    #[error("trace encoding: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("trace writer has stopped")]
    Closed,
    #[error("trace writer panicked")]
    Panicked,
}

/// Destination for batch rows. Failures are reported, never fatal to a run.
pub trait TraceSink: Send + Sync {
    fn record(&self, row: BatchTrace) -> Result<(), TraceError>;
}

/// Appends rows to a JSONL file.
#[derive(Debug, Clone)]
pub struct JsonlTraceSink {
    rows: Sender<BatchTrace>,
}

/// Handle on the writer thread behind a [`JsonlTraceSink`].
#[derive(Debug)]
pub struct TraceWorker {
    thread: JoinHandle<Result<u64, TraceError>>,
}

impl JsonlTraceSink {
    /// Open (or create) `path` in append mode and start the writer.
    pub fn new(path: impl AsRef<Path>) -> Result<(Self, TraceWorker), TraceError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        let (rows, inbox) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("viral-trace".into())
            .spawn(move || drain_rows(file, inbox))?;
        Ok((Self { rows }, TraceWorker { thread }))
    }
}

impl TraceSink for JsonlTraceSink {
    fn record(&self, row: BatchTrace) -> Result<(), TraceError> {
        self.rows.send(row).map_err(|_| TraceError::Closed)
    }
}

impl TraceWorker {
    /// Wait until every queued row is on disk and return how many were written.
    ///
    /// Only returns once all [`JsonlTraceSink`] clones are dropped.
    pub fn join(self) -> Result<u64, TraceError> {
        self.thread.join().map_err(|_| TraceError::Panicked)?
    }
}

fn drain_rows(file: File, inbox: Receiver<BatchTrace>) -> Result<u64, TraceError> {
    let mut out = BufWriter::new(file);
    let mut written = 0;
    for row in inbox {
        serde_json::to_writer(&mut out, &row)?;
        out.write_all(b"\n")?;
        out.flush()?;
        written += 1;
    }
    Ok(written)
}
