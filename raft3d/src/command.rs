use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Filament, JobStatus, PrintJob, Printer};

/// Commands the fleet state machine knows how to apply.
///
/// On the wire a command is the envelope `{"op": ..., "value": {...}}`; the
/// `op` tag selects the variant and `value` carries its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum Command {
    AddPrinter(Printer),
    AddFilament(Filament),
    AddPrintJob(PrintJob),
    UpdatePrintJobStatus(StatusUpdate),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub job_id: String,
    pub status: JobStatus,
}

impl Command {
    pub fn op(&self) -> &'static str {
        match self {
            Command::AddPrinter(_) => "add_printer",
            Command::AddFilament(_) => "add_filament",
            Command::AddPrintJob(_) => "add_print_job",
            Command::UpdatePrintJobStatus(_) => "update_print_job_status",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// Untyped `{op, value}` record as handed over by the request layer.
///
/// Nothing here is validated; the state machine decides whether the pair
/// names a real command once the envelope reaches it as bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub op: String,
    pub value: Value,
}

impl CommandEnvelope {
    pub fn new(op: impl Into<String>, value: Value) -> Self {
        Self {
            op: op.into(),
            value,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
