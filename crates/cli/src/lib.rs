//! Command surface, tuning session and report export.

pub mod cli;
pub mod report;
pub mod session;

pub use cli::*;
pub use report::*;
pub use session::*;
