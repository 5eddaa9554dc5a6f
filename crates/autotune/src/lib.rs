//! Autotuning of generated matmul kernels.

pub mod backend;
pub mod error;
pub mod result;
pub mod tuner;

pub use backend::*;
pub use error::*;
pub use result::*;
pub use tuner::*;
