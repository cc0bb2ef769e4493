pub mod error;
pub mod io;
pub mod model;
pub mod olx;
pub mod sheets;
pub mod sync;

pub use error::{Result, ToolError};
