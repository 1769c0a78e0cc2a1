//! Concurrency primitives shared by every layer of the transport engine.
//!
//! These mirror the roles the original kernel module fills with ticket
//! spinlocks, RCU, kref, and wait queues — reimplemented on top of
//! `std::sync` so the same discipline (documented in spec.md §5) holds
//! without a real interrupt-disabling context to lean on.

pub mod kref;
pub mod rcu;
pub mod ring_buffer;
pub mod spinlock;
pub mod waitqueue;

pub use kref::DeferredRelease;
pub use rcu::RcuTable;
pub use ring_buffer::RingBuffer;
pub use spinlock::IrqMutex;
pub use waitqueue::WaitQueue;
