//! Printer fleet coordination for a small cluster of independent nodes.
//!
//! Each node keeps its own in-memory model of printers, filament spools and
//! print jobs, applies validated commands to it, and periodically writes the
//! whole model to disk. Nodes sharing a data directory also take turns
//! holding a leadership marker file. That marker is a best-effort liveness
//! hint: it does not gate writes, and commands are never replicated between
//! nodes.
//!
//! # Modules
//!
//! - [`model`]: printers, filaments, print jobs and the job status lifecycle
//! - [`command`]: the `{op, value}` command envelope and its typed form
//! - [`fsm`]: the state machine that validates and applies commands
//! - [`leadership`]: marker-file leadership signaling and its background loop
//! - [`snapshot`]: periodic snapshot files and recovery helpers
//! - [`node`]: composition root wiring the pieces together
//! - [`cluster`]: `nodes=host:port,...` descriptor parsing
//! - [`metrics`]: counters and gauges in Prometheus text format
//! - [`api`]: HTTP request layer
//! - [`cli`]: command-line and environment configuration

pub mod api;
pub mod cli;
pub mod cluster;
pub mod command;
pub mod fsm;
pub mod leadership;
pub mod metrics;
pub mod model;
pub mod node;
pub mod snapshot;
mod task;

pub use fsm::{ApplyError, FleetState, FleetStateMachine};
pub use node::{Node, NodeConfig, NodeStatus};
