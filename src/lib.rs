//! Core library for the courseware-tools command line application.
//!
//! The library converts between an authoring workbook and an OLX course
//! archive. Spreadsheet and archive adapters live under
//! [`courseware::tools::io`], the course model and hierarchy builder inside
//! [`courseware::tools::model`], the sheet layout in
//! [`courseware::tools::sheets`], the OLX layout in [`courseware::tools::olx`],
//! and the end-to-end pipelines under [`courseware::tools::sync`].

pub mod courseware;

pub use courseware::tools::{Result, ToolError, error, io, model, olx, sheets, sync};
