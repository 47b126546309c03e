//! lockstep Core Types
//!
//! Pure types shared by every lockstep crate. No I/O happens here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod time;

// Re-exports
pub use error::{CoreError, CoreResult};
pub use time::MonoTime;
