use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod hierarchy;

pub use hierarchy::{
    Chapter, Hierarchy, IdSource, NodeIds, NodeKey, RandomIdSource, Sequential,
    SequentialIdSource, Vertical, VerticalBlock, build_hierarchy,
};

/// Course-level metadata taken from the "Course Info" sheet or `course.xml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub course_name: String,
    pub organization: String,
    pub course_id: String,
    pub run: String,
    pub language: String,
    /// Free-form date text. Normalised to ISO-8601 only when encoding OLX.
    pub start_date: String,
    pub end_date: String,
    pub self_paced: bool,
}

impl Default for CourseInfo {
    fn default() -> Self {
        Self {
            course_name: String::new(),
            organization: String::new(),
            course_id: String::new(),
            run: String::new(),
            language: "en".to_string(),
            start_date: String::new(),
            end_date: String::new(),
            self_paced: false,
        }
    }
}

/// The four kinds of leaf content a vertical can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockType {
    Text,
    Video,
    Problem,
    OpenResponse,
}

impl BlockType {
    pub const ALL: [BlockType; 4] = [
        BlockType::Text,
        BlockType::Video,
        BlockType::Problem,
        BlockType::OpenResponse,
    ];

    /// Name used in the Structure sheet.
    pub fn as_str(self) -> &'static str {
        match self {
            BlockType::Text => "text",
            BlockType::Video => "video",
            BlockType::Problem => "problem",
            BlockType::OpenResponse => "openresponse",
        }
    }

    /// Case-insensitive lookup of a Structure sheet block type.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value))
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the Structure sheet. Row order drives all output ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StructureRow {
    pub chapter: String,
    pub sequential: String,
    pub vertical: String,
    pub block_type: BlockType,
    pub block_id: String,
}

/// Anything stored in a [`BlockMap`].
pub trait Keyed {
    fn block_id(&self) -> &str;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub block_id: String,
    pub title: String,
    /// Raw HTML.
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoBlock {
    pub block_id: String,
    pub title: String,
    pub youtube_id: String,
    pub html5_url: String,
    /// `HH:MM:SS`
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    pub correct: bool,
    pub hint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProblemBlock {
    pub block_id: String,
    pub title: String,
    pub question_text: String,
    pub choices: Vec<Choice>,
    pub explanation: String,
    pub show_answer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RubricOption {
    pub label: String,
    pub points: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    pub options: Vec<RubricOption>,
}

/// Which assessment steps an open response goes through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssessmentType {
    #[default]
    #[serde(rename = "self")]
    SelfAssessment,
    #[serde(rename = "peer")]
    PeerAssessment,
    #[serde(rename = "staff")]
    StaffAssessment,
}

impl AssessmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            AssessmentType::SelfAssessment => "self",
            AssessmentType::PeerAssessment => "peer",
            AssessmentType::StaffAssessment => "staff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "self" => Some(AssessmentType::SelfAssessment),
            "peer" => Some(AssessmentType::PeerAssessment),
            "staff" => Some(AssessmentType::StaffAssessment),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpenResponseBlock {
    pub block_id: String,
    pub title: String,
    pub prompt: String,
    pub criteria: Vec<Criterion>,
    pub assessment_type: AssessmentType,
}

macro_rules! impl_keyed {
    ($($block:ty),*) => {
        $(impl Keyed for $block {
            fn block_id(&self) -> &str {
                &self.block_id
            }
        })*
    };
}

impl_keyed!(TextBlock, VideoBlock, ProblemBlock, OpenResponseBlock);

/// Blocks keyed by id. Keys are unique and iteration follows insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockMap<T> {
    blocks: Vec<T>,
    index: HashMap<String, usize>,
}

impl<T> Default for BlockMap<T> {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: Keyed> BlockMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a block unless its id is already present. Returns `false`
    /// when the block was rejected as a duplicate; the first entry wins.
    pub fn insert(&mut self, block: T) -> bool {
        if self.index.contains_key(block.block_id()) {
            return false;
        }
        self.index
            .insert(block.block_id().to_string(), self.blocks.len());
        self.blocks.push(block);
        true
    }

    pub fn get(&self, block_id: &str) -> Option<&T> {
        self.index.get(block_id).map(|&idx| &self.blocks[idx])
    }

    pub fn contains(&self, block_id: &str) -> bool {
        self.index.contains_key(block_id)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.blocks.iter()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl<T: Keyed> FromIterator<T> for BlockMap<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut map = BlockMap::new();
        for block in iter {
            map.insert(block);
        }
        map
    }
}

impl<'a, T> IntoIterator for &'a BlockMap<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

/// Everything known about a course: metadata, structure and content.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CourseData {
    pub info: CourseInfo,
    pub structure: Vec<StructureRow>,
    pub texts: BlockMap<TextBlock>,
    pub videos: BlockMap<VideoBlock>,
    pub problems: BlockMap<ProblemBlock>,
    pub open_responses: BlockMap<OpenResponseBlock>,
}

impl CourseData {
    /// Returns `true` when `block_id` resolves in the map for `block_type`.
    pub fn has_block(&self, block_type: BlockType, block_id: &str) -> bool {
        match block_type {
            BlockType::Text => self.texts.contains(block_id),
            BlockType::Video => self.videos.contains(block_id),
            BlockType::Problem => self.problems.contains(block_id),
            BlockType::OpenResponse => self.open_responses.contains(block_id),
        }
    }

    /// Structure rows whose block is missing from its content map.
    pub fn unresolved_rows(&self) -> impl Iterator<Item = &StructureRow> {
        self.structure
            .iter()
            .filter(|row| !self.has_block(row.block_type, &row.block_id))
    }

    pub fn block_count(&self) -> usize {
        self.texts.len() + self.videos.len() + self.problems.len() + self.open_responses.len()
    }
}
