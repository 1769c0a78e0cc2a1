//! Interface registry, peer table, endpoint manager, and event engine: the
//! stateful heart of the transport engine (spec.md §4.1-§4.5).

pub mod cleanup;
pub mod config;
pub mod endpoint;
pub mod event;
pub mod iface;
pub mod peer;
pub mod ring_mem;
pub mod slotmap;

pub use config::{IfaceCounters, ModuleParams};
pub use endpoint::{Endpoint, EndpointError, EndpointStatus, EndpointTable};
pub use event::EventQueue;
pub use iface::{Iface, IfaceStatus, IfaceTable};
pub use peer::{Peer, PeerTable};
