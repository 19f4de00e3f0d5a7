// crates/client/src/lib.rs
pub mod channel;
pub mod error;
pub mod fetch;
pub mod monitor;
pub mod sse;

pub use channel::*;
pub use error::*;
pub use fetch::*;
pub use monitor::*;
pub use sse::*;
