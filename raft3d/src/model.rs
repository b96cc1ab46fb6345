//! Domain entities managed by the fleet state machine.
//!
//! Printers and filament spools are created once and never deleted. Print jobs
//! move through a small status lifecycle; completing a job consumes filament.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::fsm::ApplyError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Printer {
    pub id: String,
    pub company: String,
    pub model: String,
}

/// Filament materials the fleet knows how to print with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilamentType {
    Pla,
    Petg,
    Abs,
    Tpu,
}

/// A spool of filament. Weights are in grams.
///
/// Older payloads spell the weight fields with an `_in_grams` suffix; both
/// spellings are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filament {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FilamentType,
    pub color: String,
    #[serde(alias = "total_weight_in_grams")]
    pub total_weight: u64,
    #[serde(alias = "remaining_weight_in_grams")]
    pub remaining_weight: u64,
}

impl Filament {
    /// Builds a spool, rejecting weights that could never describe a real one.
    pub fn new(
        id: impl Into<String>,
        kind: FilamentType,
        color: impl Into<String>,
        total_weight: u64,
        remaining_weight: u64,
    ) -> Result<Self, ApplyError> {
        let filament = Self {
            id: id.into(),
            kind,
            color: color.into(),
            total_weight,
            remaining_weight,
        };
        filament.validate()?;
        Ok(filament)
    }

    /// Checks the construction invariants: a positive total and a remainder
    /// that does not exceed it.
    pub fn validate(&self) -> Result<(), ApplyError> {
        if self.total_weight == 0 {
            return Err(ApplyError::InvalidFilament {
                id: self.id.clone(),
                reason: "total weight must be positive".to_string(),
            });
        }
        if self.remaining_weight > self.total_weight {
            return Err(ApplyError::InvalidFilament {
                id: self.id.clone(),
                reason: format!(
                    "remaining weight {} exceeds total weight {}",
                    self.remaining_weight, self.total_weight
                ),
            });
        }
        Ok(())
    }

    /// Removes `grams` from the spool, bottoming out at empty.
    pub(crate) fn consume(&mut self, grams: u64) {
        self.remaining_weight = self.remaining_weight.saturating_sub(grams);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Cancelled,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Done,
        JobStatus::Cancelled,
    ];

    /// Whether a job in `self` may move to `next`.
    ///
    /// Queued jobs may start or be cancelled, running jobs may finish or be
    /// cancelled, and `Done`/`Cancelled` are terminal. Every pair is spelled
    /// out so a new status cannot be added without deciding its edges.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Queued, Running) | (Queued, Cancelled) => true,
            (Running, Done) | (Running, Cancelled) => true,
            (Queued, Queued) | (Queued, Done) => false,
            (Running, Queued) | (Running, Running) => false,
            (Done, _) | (Cancelled, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Cancelled)
    }

    /// Queued and running jobs still hold a claim on their filament.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "Queued",
            JobStatus::Running => "Running",
            JobStatus::Done => "Done",
            JobStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown print job status '{}'", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: String,
    pub printer_id: String,
    pub filament_id: String,
    pub filepath: String,
    #[serde(alias = "print_weight_in_grams")]
    pub print_weight: u64,
    pub status: JobStatus,
}
