//! wgpu backend: device context, kernel builder and execution harness.

pub mod builder;
pub mod context;
pub mod error;
pub mod kernel;
pub mod planner;
pub mod runtime;

pub use builder::*;
pub use context::*;
pub use error::*;
pub use kernel::*;
pub use planner::*;
pub use runtime::*;
