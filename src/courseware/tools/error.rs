use std::path::PathBuf;

use thiserror::Error;

/// Convenient alias for fallible results returned throughout the crate.
pub type Result<T> = std::result::Result<T, ToolError>;

/// Fatal failures that abort a conversion before it produces a result.
///
/// Data-shape problems found while reading a workbook or an archive are not
/// represented here: they are accumulated as error or warning strings and
/// returned alongside the decoded course.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Wrapper for IO failures such as reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Raised when JSON serialization fails.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the Excel writer implementation.
    #[error("Excel write error: {0}")]
    ExcelWrite(#[from] rust_xlsxwriter::XlsxError),

    /// Errors bubbled up from the Excel reader implementation.
    #[error("Excel read error: {0}")]
    ExcelRead(#[from] calamine::XlsxError),

    /// Raised when a workbook cannot be interpreted at all.
    #[error("invalid workbook structure: {0}")]
    InvalidWorkbook(String),

    /// Raised when the course archive cannot be produced or read.
    #[error("archive error: {0}")]
    Archive(String),

    /// Raised when the workbook decoded with validation errors and export
    /// has been refused. Carries every error in the order it was found.
    #[error("workbook failed validation with {} error(s)", .0.len())]
    Validation(Vec<String>),

    /// Raised when a hierarchy node has no identifier assigned.
    #[error("no identifier assigned to {0}")]
    MissingNodeId(String),

    /// Raised when the user provides a path that does not exist.
    #[error("input file not found: {0}")]
    MissingInput(PathBuf),

    /// Raised when the tracing subscriber fails to initialise.
    #[error("failed to initialise logging: {0}")]
    Logging(String),
}
