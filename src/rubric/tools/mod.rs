pub mod api;
pub mod batch;
pub mod codec;
pub mod config;
pub mod error;
pub mod io;
pub mod model;
pub mod sync;
pub mod validate;

pub use error::{Result, ToolError};
