//! Wire-level transport: frame construction, dispatch, the block-pipelined
//! pull engine, the raw endpoint, and the same-process fast path.

pub mod link;
pub mod pull;
pub mod raw;
pub mod recv;
pub mod send;
pub mod shared;

pub use link::LoopbackLink;
pub use pull::{PullHandle, PullTable};
pub use raw::RawEndpoint;
pub use recv::Dispatcher;
pub use send::Sender;
