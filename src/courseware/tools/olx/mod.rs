//! The OLX directory layout and the block-type ↔ tag mapping shared by the
//! encoder and decoder.

pub mod decode;
pub mod encode;

pub use crate::courseware::tools::io::archive::EntryMap;
pub use decode::{OlxDecode, decode_olx};
pub use encode::encode_course;

use crate::courseware::tools::model::BlockType;

pub const COURSE_POINTER: &str = "course.xml";

/// Structural and content directories, each holding `{id}.xml` files.
pub mod dirs {
    pub const COURSE: &str = "course";
    pub const CHAPTER: &str = "chapter";
    pub const SEQUENTIAL: &str = "sequential";
    pub const VERTICAL: &str = "vertical";
    pub const HTML: &str = "html";
    pub const VIDEO: &str = "video";
    pub const PROBLEM: &str = "problem";
    pub const OPEN_ASSESSMENT: &str = "openassessment";
}

/// Vertical children that are not content this tool models. They are
/// skipped without a warning.
pub const IGNORED_TAGS: [&str; 4] = ["library_content", "discussion", "lti", "lti_consumer"];

pub fn xml_path(dir: &str, id: &str) -> String {
    format!("{dir}/{id}.xml")
}

pub fn html_path(filename: &str) -> String {
    format!("{}/{filename}.html", dirs::HTML)
}

pub fn run_path(run: &str) -> String {
    xml_path(dirs::COURSE, run)
}

pub fn policy_path(run: &str) -> String {
    format!("policies/{run}/policy.json")
}

pub fn grading_policy_path(run: &str) -> String {
    format!("policies/{run}/grading_policy.json")
}

/// Key of the course entry inside `policy.json`.
pub fn policy_key(run: &str) -> String {
    format!("course/{run}")
}

/// OLX element name for a block type.
pub fn tag_for(block_type: BlockType) -> &'static str {
    match block_type {
        BlockType::Text => dirs::HTML,
        BlockType::Video => dirs::VIDEO,
        BlockType::Problem => dirs::PROBLEM,
        BlockType::OpenResponse => dirs::OPEN_ASSESSMENT,
    }
}

/// Block type for an OLX element name, if it is one this tool models.
pub fn block_type_for_tag(tag: &str) -> Option<BlockType> {
    BlockType::ALL
        .into_iter()
        .find(|&block_type| tag_for(block_type) == tag)
}
