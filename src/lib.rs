#[macro_use]
extern crate log;

pub mod engine;
pub mod reactor;
pub mod request;

#[cfg(any(test, feature = "harness"))]
pub mod harness;

pub use engine::{AioEngine, AioSubmitError};
pub use reactor::Reactor;
pub use request::{AioOp, AioRequest};
