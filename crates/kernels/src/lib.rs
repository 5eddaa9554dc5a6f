//! Kernel generation and host-side numerics for tiletune.

pub mod config;
pub mod error;
pub mod generator;
pub mod matrix;
pub mod template;
pub mod verify;

pub use config::*;
pub use error::*;
pub use generator::*;
pub use matrix::*;
pub use template::*;
pub use verify::*;
