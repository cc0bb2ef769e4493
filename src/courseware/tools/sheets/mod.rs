//! The six-sheet authoring workbook, held as plain string grids.
//!
//! The reader in [`io::excel_read`](crate::io::excel_read) produces a
//! [`WorkbookData`] from an `.xlsx` file and the writer in
//! [`io::excel_write`](crate::io::excel_write) persists one, so the decoder and
//! encoder here never touch the binary cell format.

use std::collections::HashMap;
use std::rc::Rc;

pub mod decode;
pub mod encode;

pub use decode::{WorkbookDecode, decode_workbook};
pub use encode::encode_workbook;

pub const COURSE_INFO_SHEET: &str = "Course Info";
pub const STRUCTURE_SHEET: &str = "Structure";
pub const TEXT_SHEET: &str = "Text Blocks";
pub const VIDEO_SHEET: &str = "Videos";
pub const PROBLEM_SHEET: &str = "Problems";
pub const OPEN_RESPONSE_SHEET: &str = "Open Response";

/// Column letters for the six choice/hint slots on the Problems sheet.
pub const CHOICE_LETTERS: [char; 6] = ['a', 'b', 'c', 'd', 'e', 'f'];
/// Highest `criterion_N_*` pair read from the Open Response sheet.
pub const MAX_CRITERIA: usize = 10;

pub const STRUCTURE_COLUMNS: [&str; 5] =
    ["chapter", "sequential", "vertical", "block_type", "block_id"];
pub const TEXT_COLUMNS: [&str; 3] = ["block_id", "title", "content"];
pub const VIDEO_COLUMNS: [&str; 6] = [
    "block_id",
    "title",
    "youtube_id",
    "html5_url",
    "start_time",
    "end_time",
];

/// Course Info field labels, in the order they are written.
pub mod fields {
    pub const COURSE_NAME: &str = "Course Name";
    pub const ORGANIZATION: &str = "Organization";
    pub const COURSE_ID: &str = "Course ID";
    pub const RUN: &str = "Run";
    pub const LANGUAGE: &str = "Language";
    pub const START_DATE: &str = "Start Date";
    pub const END_DATE: &str = "End Date";
    pub const SELF_PACED: &str = "Self Paced";
}

/// A table that will be materialised as an Excel sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub sheet_name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SheetTable {
    pub fn new(sheet_name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Iterates data rows with header-name access. Rows whose cells are all
    /// blank are skipped.
    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        let header: Rc<HashMap<String, usize>> = Rc::new(
            self.columns
                .iter()
                .enumerate()
                .map(|(idx, name)| (normalize_header(name), idx))
                .collect(),
        );

        self.rows
            .iter()
            .enumerate()
            .filter(|(_, cells)| cells.iter().any(|cell| !cell.trim().is_empty()))
            .map(move |(idx, cells)| Record {
                // Header occupies spreadsheet row 1.
                number: idx + 2,
                header: Rc::clone(&header),
                cells,
            })
    }
}

/// One data row of a [`SheetTable`].
#[derive(Debug, Clone)]
pub struct Record<'a> {
    /// 1-based spreadsheet row number.
    pub number: usize,
    header: Rc<HashMap<String, usize>>,
    cells: &'a [String],
}

impl Record<'_> {
    /// Trimmed value of `column`, or `""` if the column or cell is absent.
    pub fn get(&self, column: &str) -> &str {
        self.header
            .get(&normalize_header(column))
            .and_then(|&idx| self.cells.get(idx))
            .map(|cell| cell.trim())
            .unwrap_or("")
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.header.contains_key(&normalize_header(column))
    }

    /// Value by position, trimmed.
    pub fn cell(&self, idx: usize) -> &str {
        self.cells.get(idx).map(|cell| cell.trim()).unwrap_or("")
    }
}

/// Represents all tables required to materialise the Excel workbook.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkbookData {
    pub tables: Vec<SheetTable>,
}

impl WorkbookData {
    /// Finds a sheet by name, ignoring case and surrounding whitespace.
    pub fn sheet(&self, name: &str) -> Option<&SheetTable> {
        let wanted = name.trim();
        self.tables
            .iter()
            .find(|table| table.sheet_name.trim().eq_ignore_ascii_case(wanted))
    }
}

/// Lowercases a header and turns spaces and dashes into underscores.
pub fn normalize_header(header: &str) -> String {
    header
        .trim()
        .chars()
        .map(|ch| match ch {
            ' ' | '-' => '_',
            other => other.to_ascii_lowercase(),
        })
        .collect()
}
