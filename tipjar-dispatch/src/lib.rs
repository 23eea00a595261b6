//! TIPJAR Dispatch - Rate-Limited Outbound Actions
//!
//! Wraps the external messaging gateway so that every forward, send and
//! reply first obtains a permit from its destination's bucket. Errors from
//! the gateway are logged and counted, never propagated.

pub mod dispatcher;
pub mod gateway;
pub mod permits;

pub use dispatcher::{DispatchMetrics, DispatchSnapshot, Dispatcher};
pub use gateway::{
    ActionKind, Content, Destination, MessageRef, MessagingGateway, OutboundAction, ParseMode,
};
pub use permits::{Admission, PermitRegistry};
