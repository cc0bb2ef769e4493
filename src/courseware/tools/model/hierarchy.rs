//! Folding flat structure rows into the chapter → sequential → vertical tree.
//!
//! Identifier assignment and tree construction are separate steps. [`NodeIds`]
//! draws a random suffix once per distinct name tuple; [`build_hierarchy`] is
//! a pure function of the rows and those identifiers, so the same inputs always
//! produce the same tree.

use std::collections::HashMap;

use uuid::Uuid;

use crate::courseware::tools::error::{Result, ToolError};
use crate::courseware::tools::model::{BlockType, StructureRow};

const MAX_SANITIZED_LEN: usize = 40;

/// Identity of a hierarchy node: the display-name tuple leading to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Chapter(String),
    Sequential(String, String),
    Vertical(String, String, String),
}

impl NodeKey {
    /// Display name of the node itself (the last tuple component).
    pub fn name(&self) -> &str {
        match self {
            NodeKey::Chapter(chapter) => chapter,
            NodeKey::Sequential(_, sequential) => sequential,
            NodeKey::Vertical(_, _, vertical) => vertical,
        }
    }

    fn describe(&self) -> String {
        match self {
            NodeKey::Chapter(chapter) => format!("chapter '{chapter}'"),
            NodeKey::Sequential(chapter, sequential) => {
                format!("sequential '{chapter}/{sequential}'")
            }
            NodeKey::Vertical(chapter, sequential, vertical) => {
                format!("vertical '{chapter}/{sequential}/{vertical}'")
            }
        }
    }

    fn for_row(row: &StructureRow) -> [NodeKey; 3] {
        [
            NodeKey::Chapter(row.chapter.clone()),
            NodeKey::Sequential(row.chapter.clone(), row.sequential.clone()),
            NodeKey::Vertical(
                row.chapter.clone(),
                row.sequential.clone(),
                row.vertical.clone(),
            ),
        ]
    }
}

/// Source of the random part of node identifiers.
pub trait IdSource {
    fn next_suffix(&mut self) -> String;
}

/// Draws suffixes from a v4 UUID, which is backed by the OS CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIdSource;

impl IdSource for RandomIdSource {
    fn next_suffix(&mut self) -> String {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        suffix
    }
}

/// Deterministic suffixes (`00000001`, `00000002`, …) for reproducible output.
#[derive(Debug, Default, Clone)]
pub struct SequentialIdSource {
    counter: u64,
}

impl IdSource for SequentialIdSource {
    fn next_suffix(&mut self) -> String {
        self.counter += 1;
        format!("{:08x}", self.counter)
    }
}

/// Identifier table for one Build or Import invocation.
#[derive(Debug, Default, Clone)]
pub struct NodeIds {
    ids: HashMap<NodeKey, String>,
}

impl NodeIds {
    /// Assigns an identifier to every distinct node tuple in `rows`. A tuple
    /// seen again reuses the identifier given on first sight.
    pub fn assign<S: IdSource + ?Sized>(rows: &[StructureRow], source: &mut S) -> Self {
        let mut ids = NodeIds::default();
        for row in rows {
            for key in NodeKey::for_row(row) {
                ids.ids.entry(key).or_insert_with_key(|key| {
                    format!("{}_{}", sanitize_name(key.name()), source.next_suffix())
                });
            }
        }
        ids
    }

    pub fn get(&self, key: &NodeKey) -> Option<&str> {
        self.ids.get(key).map(String::as_str)
    }

    /// Pins the identifier for one node, replacing any assigned one.
    pub fn insert(&mut self, key: NodeKey, id: impl Into<String>) {
        self.ids.insert(key, id.into());
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn require(&self, key: &NodeKey) -> Result<String> {
        self.get(key)
            .map(str::to_string)
            .ok_or_else(|| ToolError::MissingNodeId(key.describe()))
    }
}

/// Lowercases and reduces a display name to `[a-z0-9_]`.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_separator && !sanitized.is_empty() {
                sanitized.push('_');
            }
            pending_separator = false;
            sanitized.push(ch.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }
    sanitized.truncate(MAX_SANITIZED_LEN);
    let trimmed = sanitized.trim_end_matches('_');
    if trimmed.is_empty() {
        "node".to_string()
    } else {
        trimmed.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerticalBlock {
    pub block_type: BlockType,
    pub block_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertical {
    pub name: String,
    pub id: String,
    pub blocks: Vec<VerticalBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequential {
    pub name: String,
    pub id: String,
    pub verticals: Vec<Vertical>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub name: String,
    pub id: String,
    pub sequentials: Vec<Sequential>,
}

/// The materialised course tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    pub chapters: Vec<Chapter>,
}

impl Hierarchy {
    pub fn chapter_count(&self) -> usize {
        self.chapters.len()
    }

    pub fn sequentials(&self) -> impl Iterator<Item = &Sequential> {
        self.chapters.iter().flat_map(|chapter| chapter.sequentials.iter())
    }

    pub fn verticals(&self) -> impl Iterator<Item = &Vertical> {
        self.sequentials()
            .flat_map(|sequential| sequential.verticals.iter())
    }

    pub fn block_count(&self) -> usize {
        self.verticals().map(|vertical| vertical.blocks.len()).sum()
    }
}

struct Index<T> {
    positions: HashMap<String, usize>,
    items: Vec<T>,
}

impl<T> Default for Index<T> {
    fn default() -> Self {
        Self {
            positions: HashMap::new(),
            items: Vec::new(),
        }
    }
}

impl<T> Index<T> {
    fn slot(&mut self, name: &str, make: impl FnOnce() -> T) -> &mut T {
        let position = match self.positions.get(name) {
            Some(&position) => position,
            None => {
                self.items.push(make());
                self.positions.insert(name.to_string(), self.items.len() - 1);
                self.items.len() - 1
            }
        };
        &mut self.items[position]
    }
}

struct ChapterDraft {
    name: String,
    sequentials: Index<SequentialDraft>,
}

struct SequentialDraft {
    name: String,
    verticals: Index<VerticalDraft>,
}

struct VerticalDraft {
    name: String,
    blocks: Vec<VerticalBlock>,
}

/// Builds the ordered tree for `rows`.
///
/// The first row naming a tuple creates the node and later rows with the same
/// tuple append to it. Fails only when `ids` lacks an identifier for a node.
pub fn build_hierarchy(rows: &[StructureRow], ids: &NodeIds) -> Result<Hierarchy> {
    let mut chapters: Index<ChapterDraft> = Index::default();

    for row in rows {
        let chapter = chapters.slot(&row.chapter, || ChapterDraft {
            name: row.chapter.clone(),
            sequentials: Index::default(),
        });
        let sequential = chapter.sequentials.slot(&row.sequential, || SequentialDraft {
            name: row.sequential.clone(),
            verticals: Index::default(),
        });
        let vertical = sequential.verticals.slot(&row.vertical, || VerticalDraft {
            name: row.vertical.clone(),
            blocks: Vec::new(),
        });
        vertical.blocks.push(VerticalBlock {
            block_type: row.block_type,
            block_id: row.block_id.clone(),
        });
    }

    let mut tree = Vec::with_capacity(chapters.items.len());
    for chapter in chapters.items {
        let chapter_key = NodeKey::Chapter(chapter.name.clone());
        let mut sequentials = Vec::with_capacity(chapter.sequentials.items.len());
        for sequential in chapter.sequentials.items {
            let sequential_key = NodeKey::Sequential(chapter.name.clone(), sequential.name.clone());
            let mut verticals = Vec::with_capacity(sequential.verticals.items.len());
            for vertical in sequential.verticals.items {
                let vertical_key = NodeKey::Vertical(
                    chapter.name.clone(),
                    sequential.name.clone(),
                    vertical.name.clone(),
                );
                verticals.push(Vertical {
                    id: ids.require(&vertical_key)?,
                    name: vertical.name,
                    blocks: vertical.blocks,
                });
            }
            sequentials.push(Sequential {
                id: ids.require(&sequential_key)?,
                name: sequential.name,
                verticals,
            });
        }
        tree.push(Chapter {
            id: ids.require(&chapter_key)?,
            name: chapter.name,
            sequentials,
        });
    }

    Ok(Hierarchy { chapters: tree })
}
