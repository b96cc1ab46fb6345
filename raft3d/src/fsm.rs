//! The fleet state machine.
//!
//! Every node owns one [`FleetStateMachine`]. Commands arrive as encoded
//! `{op, value}` envelopes, are decoded into a [`Command`], validated, and
//! applied to the printer, filament and print-job maps under a single lock.
//! The same lock backs snapshots, so a snapshot never observes half of a
//! multi-entity update such as a job finishing and its spool shrinking.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::{Command, StatusUpdate};
use crate::model::{Filament, JobStatus, PrintJob, Printer};

/// Reasons a command is refused. A refused command leaves the state untouched.
#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("malformed command: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid filament {id}: {reason}")]
    InvalidFilament { id: String, reason: String },

    #[error("print job {0} not found")]
    UnknownJob(String),

    #[error("print job {job_id} cannot move from {from} to {to}")]
    IllegalTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

/// What an accepted command touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub op: &'static str,
    pub id: String,
}

/// The three domain maps. Also the snapshot payload.
///
/// `BTreeMap` keeps serialization order a function of the keys alone, so two
/// states holding the same entities always snapshot to identical bytes no
/// matter which order the commands arrived in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FleetState {
    #[serde(default)]
    pub printers: BTreeMap<String, Printer>,
    #[serde(default)]
    pub filaments: BTreeMap<String, Filament>,
    #[serde(default)]
    pub print_jobs: BTreeMap<String, PrintJob>,
}

impl FleetState {
    fn apply(&mut self, command: Command) -> Result<ApplyReport, ApplyError> {
        let op = command.op();
        let id = match command {
            Command::AddPrinter(printer) => {
                let id = printer.id.clone();
                self.printers.insert(id.clone(), printer);
                id
            }
            Command::AddFilament(filament) => {
                filament.validate()?;
                let id = filament.id.clone();
                self.filaments.insert(id.clone(), filament);
                id
            }
            Command::AddPrintJob(job) => {
                let id = job.id.clone();
                self.print_jobs.insert(id.clone(), job);
                id
            }
            Command::UpdatePrintJobStatus(update) => self.update_job_status(update)?,
        };
        Ok(ApplyReport { op, id })
    }

    fn update_job_status(&mut self, update: StatusUpdate) -> Result<String, ApplyError> {
        let StatusUpdate { job_id, status } = update;
        let Some(job) = self.print_jobs.get_mut(&job_id) else {
            return Err(ApplyError::UnknownJob(job_id));
        };
        if !job.status.can_transition_to(status) {
            return Err(ApplyError::IllegalTransition {
                job_id,
                from: job.status,
                to: status,
            });
        }

        job.status = status;
        if status == JobStatus::Done {
            // A job may reference a spool this node never saw; completing it
            // still succeeds.
            if let Some(filament) = self.filaments.get_mut(&job.filament_id) {
                filament.consume(job.print_weight);
            }
        }
        Ok(job_id)
    }
}

#[derive(Debug, Default)]
pub struct FleetStateMachine {
    state: Mutex<FleetState>,
}

impl FleetStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every critical section leaves the maps whole, so a panic elsewhere
    /// while the lock was held does not make the data unusable.
    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decodes an encoded command envelope and applies it.
    pub fn apply(&self, entry: &[u8]) -> Result<ApplyReport, ApplyError> {
        let command = Command::decode(entry)?;
        self.apply_command(command)
    }

    pub fn apply_command(&self, command: Command) -> Result<ApplyReport, ApplyError> {
        self.lock().apply(command)
    }

    /// Serializes all three maps as one JSON document.
    pub fn snapshot(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&*self.lock())
    }

    /// Replaces the whole state with the contents of a snapshot.
    ///
    /// Nothing is merged: entities absent from the snapshot are gone afterwards.
    /// A snapshot that fails to parse leaves the current state in place.
    pub fn restore(&self, snapshot: &[u8]) -> serde_json::Result<()> {
        let restored: FleetState = serde_json::from_slice(snapshot)?;
        *self.lock() = restored;
        Ok(())
    }

    /// Runs `f` against a consistent view of the state.
    pub fn read<R>(&self, f: impl FnOnce(&FleetState) -> R) -> R {
        f(&self.lock())
    }

    pub fn state(&self) -> FleetState {
        self.lock().clone()
    }

    pub fn printers(&self) -> BTreeMap<String, Printer> {
        self.lock().printers.clone()
    }

    pub fn filaments(&self) -> BTreeMap<String, Filament> {
        self.lock().filaments.clone()
    }

    /// Returns print jobs, restricted to one status when `status` is given.
    pub fn print_jobs(&self, status: Option<JobStatus>) -> BTreeMap<String, PrintJob> {
        let state = self.lock();
        match status {
            None => state.print_jobs.clone(),
            Some(status) => state
                .print_jobs
                .iter()
                .filter(|(_, job)| job.status == status)
                .map(|(id, job)| (id.clone(), job.clone()))
                .collect(),
        }
    }
}
