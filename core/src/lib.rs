//! The connection engine.
//!
//! Leaf-first: [`resolver`] turns names into endpoints, [`network`] opens
//! sockets (directly or through a proxy), [`listener`] accepts them,
//! [`relay`] moves bytes between a live connection and [`local`] I/O, and
//! [`scanner`] probes port ranges. [`engine`] ties the pieces together
//! for one [`ConnectionSpec`](rcat_common::config::ConnectionSpec).

pub mod engine;
pub mod listener;
pub mod local;
pub mod network;
pub mod relay;
pub mod resolver;
pub mod scanner;

pub use engine::{Engine, EngineOutcome};
pub use listener::Listener;
pub use local::{ExecSource, LocalIo, LocalIoSource, StdioSource};
pub use network::LiveConnection;
pub use relay::{RelayOptions, RelayOutcome, TerminationReason};
pub use scanner::{ScanResult, ScanStatus};
