//! SDCP control plane for the printer's mainboard.
//!
//! - `protocol`: frame types, the export command, and inbound classification
//! - `channel`: the WebSocket session and the traits the coordinator drives

pub mod channel;
pub mod protocol;

pub use channel::{ControlChannel, ControlSession, SdcpChannel};
pub use protocol::{ExportTicket, Notification};
