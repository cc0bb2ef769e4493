use std::fs;
use std::path::Path;

use tracing::{debug, info, instrument};

use crate::courseware::tools::error::{Result, ToolError};
use crate::courseware::tools::io::{archive, excel_read, excel_write};
use crate::courseware::tools::model::{
    CourseData, Hierarchy, IdSource, NodeIds, RandomIdSource, build_hierarchy,
};
use crate::courseware::tools::olx::{decode_olx, encode_course};
use crate::courseware::tools::sheets::{decode_workbook, encode_workbook};

/// Output of an Import: the regenerated workbook plus every warning raised
/// while reading the archive.
#[derive(Debug, Clone, Default)]
pub struct ImportOutcome {
    pub workbook: Vec<u8>,
    pub warnings: Vec<String>,
}

/// Assigns node ids for `course` and builds its tree. Ids come from `ids`
/// and are only valid for this course.
pub fn course_hierarchy<S: IdSource + ?Sized>(course: &CourseData, ids: &mut S) -> Result<Hierarchy> {
    let node_ids = NodeIds::assign(&course.structure, ids);
    let hierarchy = build_hierarchy(&course.structure, &node_ids)?;
    info!(
        chapters = hierarchy.chapter_count(),
        blocks = hierarchy.block_count(),
        "course hierarchy built"
    );
    Ok(hierarchy)
}

/// Encodes a validated course as a compressed OLX archive.
#[instrument(level = "info", skip_all, fields(run = %course.info.run))]
pub fn course_to_archive<S: IdSource + ?Sized>(course: &CourseData, ids: &mut S) -> Result<Vec<u8>> {
    let hierarchy = course_hierarchy(course, ids)?;
    let entries = encode_course(course, &hierarchy)?;
    debug!(files = entries.len(), "OLX entries generated");
    archive::pack_entries(&entries)
}

/// Build direction: authoring workbook bytes to a `.tar.gz` course archive.
///
/// Refuses to export when the workbook has validation errors; the full list
/// is returned in [`ToolError::Validation`].
#[instrument(level = "info", skip_all, fields(input_bytes = workbook.len()))]
pub fn build_archive<S: IdSource + ?Sized>(workbook: &[u8], ids: &mut S) -> Result<Vec<u8>> {
    let sheets = excel_read::read_workbook_from_bytes(workbook)?;
    let decoded = decode_workbook(&sheets);
    if !decoded.is_valid() {
        info!(errors = decoded.errors.len(), "workbook failed validation");
        return Err(ToolError::Validation(decoded.errors));
    }
    info!(
        rows = decoded.course.structure.len(),
        blocks = decoded.course.block_count(),
        "workbook decoded"
    );
    course_to_archive(&decoded.course, ids)
}

/// Import direction: a `.tar.gz` course archive to authoring workbook bytes.
#[instrument(level = "info", skip_all, fields(input_bytes = bytes.len()))]
pub fn import_archive(bytes: &[u8]) -> Result<ImportOutcome> {
    let entries = archive::unpack_entries(bytes)?;
    let decoded = decode_olx(&entries);
    info!(
        rows = decoded.course.structure.len(),
        blocks = decoded.course.block_count(),
        warnings = decoded.warnings.len(),
        "archive decoded"
    );
    course_hierarchy(&decoded.course, &mut RandomIdSource)?;

    let workbook = excel_write::workbook_to_bytes(&encode_workbook(&decoded.course))?;
    Ok(ImportOutcome {
        workbook,
        warnings: decoded.warnings,
    })
}

/// Builds the archive for the workbook at `input` and writes it to `output`.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), output = %output.display())
)]
pub fn build_course(input: &Path, output: &Path) -> Result<()> {
    let workbook = fs::read(input)?;
    let archive = build_archive(&workbook, &mut RandomIdSource)?;
    fs::write(output, archive)?;
    Ok(())
}

/// Imports the archive at `input` and writes the workbook to `output`.
/// Returns the import warnings.
#[instrument(
    level = "info",
    skip_all,
    fields(input = %input.display(), output = %output.display())
)]
pub fn import_course(input: &Path, output: &Path) -> Result<Vec<String>> {
    let bytes = fs::read(input)?;
    let outcome = import_archive(&bytes)?;
    fs::write(output, &outcome.workbook)?;
    Ok(outcome.warnings)
}
