//! Append-only per-(run, phase) transcripts.
//!
//! Every prompt and every outcome lands in
//! `<state_dir>/<run_id>/transcripts/<phase>.jsonl`, one JSON object per
//! line. Entries are only ever appended; the BLAKE3 hash of the raw text is
//! the `raw_output_ref` recorded in the corresponding phase result, so a
//! checkpoint can be traced back to the exact agent output that produced it.

use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use devflow_utils::types::Phase;

/// Direction of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Prompt,
    Response,
    Failure,
}

/// One line of the transcript file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub model: String,
    /// BLAKE3 hex of `text`, stable across re-reads.
    pub text_hash: String,
    pub text: String,
}

impl TranscriptEntry {
    fn new(direction: Direction, model: &str, text: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            direction,
            model: model.to_string(),
            text_hash: hash_text(text),
            text: text.to_string(),
        }
    }
}

/// BLAKE3 hex digest used as a raw-output reference.
#[must_use]
pub fn hash_text(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Appends transcript entries for one run.
///
/// Transcript writes are diagnostics, not state: a failed append is logged
/// at warn level and never fails the phase.
#[derive(Debug, Clone)]
pub struct TranscriptWriter {
    run_dir: Utf8PathBuf,
}

impl TranscriptWriter {
    #[must_use]
    pub fn new(run_dir: impl Into<Utf8PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    #[must_use]
    pub fn transcript_path(&self, phase: Phase) -> Utf8PathBuf {
        self.run_dir
            .join("transcripts")
            .join(format!("{phase}.jsonl"))
    }

    pub fn record_prompt(&self, phase: Phase, model: &str, prompt: &str) {
        self.append(phase, TranscriptEntry::new(Direction::Prompt, model, prompt));
    }

    /// Record an agent response; returns the raw-output reference.
    pub fn record_response(&self, phase: Phase, model: &str, raw_text: &str) -> String {
        let entry = TranscriptEntry::new(Direction::Response, model, raw_text);
        let text_hash = entry.text_hash.clone();
        self.append(phase, entry);
        text_hash
    }

    pub fn record_failure(&self, phase: Phase, model: &str, detail: &str) {
        self.append(
            phase,
            TranscriptEntry::new(Direction::Failure, model, detail),
        );
    }

    fn append(&self, phase: Phase, entry: TranscriptEntry) {
        let path = self.transcript_path(phase);
        if let Err(e) = append_line(&path, &entry) {
            warn!(phase = %phase, path = %path, error = %e, "failed to append transcript entry");
        }
    }
}

fn append_line(path: &Utf8Path, entry: &TranscriptEntry) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
