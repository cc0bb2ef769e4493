use std::io::{Cursor, Read, Seek};
use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx, open_workbook};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::courseware::tools::error::{Result, ToolError};
use crate::courseware::tools::sheets::{SheetTable, WorkbookData};

/// Reads every sheet of an `.xlsx` file into a [`WorkbookData`] grid. The
/// first row of each sheet becomes its header.
pub fn read_workbook(path: &Path) -> Result<WorkbookData> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    read_sheets(&mut workbook)
}

/// Same as [`read_workbook`] for an in-memory file.
pub fn read_workbook_from_bytes(bytes: &[u8]) -> Result<WorkbookData> {
    let mut workbook = Xlsx::new(Cursor::new(bytes.to_vec()))?;
    read_sheets(&mut workbook)
}

fn read_sheets<R: Read + Seek>(workbook: &mut Xlsx<R>) -> Result<WorkbookData> {
    let mut tables = Vec::new();
    for name in workbook.sheet_names().to_vec() {
        let range = workbook
            .worksheet_range(&name)
            .ok_or_else(|| ToolError::InvalidWorkbook(format!("missing sheet '{name}'")))?
            .map_err(ToolError::from)?;
        let table = range_to_table(&name, &range);
        debug!(sheet = %name, rows = table.rows.len(), "read worksheet");
        tables.push(table);
    }
    Ok(WorkbookData { tables })
}

fn range_to_table(name: &str, range: &Range<DataType>) -> SheetTable {
    // Ranges start at the first used cell; pad so column positions match the
    // sheet.
    let leading = range.start().map(|(_, col)| col as usize).unwrap_or(0);
    let mut rows = range.rows().map(|row| {
        let mut cells = vec![String::new(); leading];
        cells.extend(row.iter().map(cell_to_string));
        cells
    });

    let columns = rows.next().unwrap_or_default();
    let mut table = SheetTable::new(name, columns);
    table.rows = rows.collect();
    table
}

fn cell_to_string(cell: &DataType) -> String {
    match cell {
        DataType::String(value) => value.clone(),
        DataType::Float(value) => value.to_string(),
        DataType::Int(value) => value.to_string(),
        DataType::Bool(value) => value.to_string(),
        DataType::DateTime(serial) => excel_serial_to_string(*serial),
        DataType::Empty => String::new(),
        other => other.to_string(),
    }
}

/// Renders an Excel date serial as `YYYY-MM-DD`, adding `HH:MM:SS` when the
/// cell carries a time of day. Serials below one day are durations and keep
/// only the `HH:MM:SS` part.
fn excel_serial_to_string(serial: f64) -> String {
    let Some(epoch) = NaiveDate::from_ymd_opt(1899, 12, 30).and_then(|day| day.and_hms_opt(0, 0, 0))
    else {
        return serial.to_string();
    };
    let seconds = (serial * 86_400.0).round() as i64;
    let Some(moment) = Duration::try_seconds(seconds).and_then(|offset| epoch.checked_add_signed(offset))
    else {
        return serial.to_string();
    };
    if (0.0..1.0).contains(&serial) {
        return moment.format("%H:%M:%S").to_string();
    }
    format_moment(moment)
}

fn format_moment(moment: NaiveDateTime) -> String {
    if moment.time() == chrono::NaiveTime::MIN {
        moment.format("%Y-%m-%d").to_string()
    } else {
        moment.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn date_serials_become_iso_text() {
        assert_eq!(excel_serial_to_string(45306.0), "2024-01-15");
        assert_eq!(excel_serial_to_string(45306.5), "2024-01-15 12:00:00");
    }

    #[test]
    fn time_only_cells_keep_just_the_clock() {
        assert_eq!(cell_to_string(&DataType::DateTime(90.0 / 86_400.0)), "00:01:30");
        assert_eq!(excel_serial_to_string(0.5), "12:00:00");
        assert_eq!(excel_serial_to_string(0.0), "00:00:00");
    }

    #[test]
    fn cells_render_as_plain_text() {
        assert_eq!(cell_to_string(&DataType::Float(1.0)), "1");
        assert_eq!(cell_to_string(&DataType::Float(2.5)), "2.5");
        assert_eq!(cell_to_string(&DataType::Bool(true)), "true");
        assert_eq!(cell_to_string(&DataType::Empty), "");
    }
}
