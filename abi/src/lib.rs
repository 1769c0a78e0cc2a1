//! Open-MX wire ABI: shared types between every crate in the workspace.
//!
//! This crate holds nothing that touches a socket or a table — only the
//! types that both ends of a link (and every layer of this workspace) must
//! agree on byte-for-byte: the Ethernet-level wire format, status/error
//! codes, and the fixed-size event record shape.

pub mod error;
pub mod event;
pub mod limits;
pub mod mac;
pub mod status;
pub mod wire;

pub use error::OmxError;
pub use mac::MacAddr;
pub use status::{NackLibType, NackMcpType, PullStatus};
