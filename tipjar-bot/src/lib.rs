//! TIPJAR Bot - Process Wiring
//!
//! Configuration loading, telemetry, startup aggregation and the inbound
//! command handler used by the `tipjar-bot` binary.

pub mod bootstrap;
pub mod config;
pub mod console;
pub mod inbound;
pub mod telemetry;

pub use bootstrap::{bootstrap, StartupError, StartupIssue, TipBot};
pub use config::{BotConfig, LogFormat};
pub use console::ConsoleGateway;
pub use inbound::{handle_event, Command, InboundEvent};
pub use telemetry::init_tracing;
