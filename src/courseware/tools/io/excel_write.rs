use std::path::Path;

use rust_xlsxwriter::{Table, TableColumn, Workbook};

use crate::courseware::tools::error::Result;
use crate::courseware::tools::sheets::WorkbookData;

/// Writes the provided workbook data to the given path.
pub fn write_workbook(path: &Path, workbook: &WorkbookData) -> Result<()> {
    let mut workbook_writer = build_workbook(workbook)?;
    workbook_writer.save(path)?;
    Ok(())
}

/// Renders the workbook as `.xlsx` bytes.
pub fn workbook_to_bytes(workbook: &WorkbookData) -> Result<Vec<u8>> {
    let mut workbook_writer = build_workbook(workbook)?;
    Ok(workbook_writer.save_to_buffer()?)
}

fn build_workbook(workbook: &WorkbookData) -> Result<Workbook> {
    let mut workbook_writer = Workbook::new();

    for table in &workbook.tables {
        let worksheet = workbook_writer.add_worksheet();
        worksheet.set_name(&table.sheet_name)?;

        for (col_idx, header) in table.columns.iter().enumerate() {
            worksheet.write_string(0, col_idx as u16, header)?;
        }

        for (row_idx, row) in table.rows.iter().enumerate() {
            for (col_idx, cell) in row.iter().enumerate() {
                if cell.is_empty() {
                    continue;
                }
                worksheet.write_string((row_idx + 1) as u32, col_idx as u16, cell)?;
            }
        }

        // Excel tables need at least one data row, and the headers must be
        // given explicitly or they are overwritten with "Column1".. defaults.
        if table.rows.is_empty() || table.columns.is_empty() {
            continue;
        }
        let columns: Vec<TableColumn> = table
            .columns
            .iter()
            .map(|header| TableColumn::new().set_header(header))
            .collect();
        let mut excel_table = Table::new();
        excel_table.set_columns(&columns).set_autofilter(true);

        let col_end = (table.columns.len() as u16).saturating_sub(1);
        let row_end = table.rows.len() as u32;
        worksheet.add_table(0, 0, row_end, col_end, &excel_table)?;
    }

    Ok(workbook_writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courseware::tools::io::excel_read::read_workbook_from_bytes;
    use crate::courseware::tools::sheets::SheetTable;

    #[test]
    fn tabled_sheets_read_back_with_their_headers() {
        let mut videos = SheetTable::new("Videos", vec!["block_id".into(), "title".into()]);
        videos.rows = vec![
            vec!["intro".into(), "Intro".into()],
            vec!["outro".into(), "Outro".into()],
        ];
        let empty = SheetTable::new("Problems", vec!["block_id".into()]);
        let workbook = WorkbookData {
            tables: vec![videos, empty],
        };

        let bytes = workbook_to_bytes(&workbook).expect("workbook bytes");
        let restored = read_workbook_from_bytes(&bytes).expect("Excel read");

        assert_eq!(restored.tables.len(), 2);
        assert_eq!(restored.tables[0].sheet_name, "Videos");
        assert_eq!(restored.tables[0].columns, vec!["block_id", "title"]);
        assert_eq!(restored.tables[0].rows[1], vec!["outro", "Outro"]);
        assert_eq!(restored.tables[1].columns, vec!["block_id"]);
        assert!(restored.tables[1].rows.is_empty());
    }
}
