//! Wire-level primitives for the rapace RPC runtime: the message frame
//! codec, the transport envelope and metadata model, and the shared
//! status-code taxonomy used throughout the call and router layers.

mod envelope;
mod frame;
mod metadata;
mod status;

pub use envelope::*;
pub use frame::*;
pub use metadata::*;
pub use status::*;
