//! Reads an extracted OLX tree back into a [`CourseData`].
//!
//! The walk follows references from `course.xml` down to the blocks inside
//! each vertical. Anything missing or unrecognised becomes a warning and the
//! branch is skipped; the decoder itself never fails.

use std::collections::HashSet;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::courseware::tools::io::xml::{
    Element, collapse_whitespace, decode_entities, parse_document,
};
use crate::courseware::tools::model::{
    AssessmentType, BlockType, Choice, CourseData, CourseInfo, Criterion, OpenResponseBlock,
    ProblemBlock, RubricOption, StructureRow, TextBlock, VideoBlock,
};
use crate::courseware::tools::olx::{
    COURSE_POINTER, EntryMap, IGNORED_TAGS, block_type_for_tag, dirs, html_path, policy_key,
    policy_path, run_path, xml_path,
};
use crate::courseware::tools::sheets::decode::parse_flag;

/// Result of reading an OLX tree. `warnings` is in discovery order.
#[derive(Debug, Clone, Default)]
pub struct OlxDecode {
    pub course: CourseData,
    pub warnings: Vec<String>,
}

#[derive(Default)]
struct Warnings(Vec<String>);

impl Warnings {
    fn push(&mut self, message: String) {
        warn!(%message, "olx import warning");
        self.0.push(message);
    }
}

/// Display names of the chapter, sequential and vertical being walked.
struct Location<'a> {
    chapter: &'a str,
    sequential: &'a str,
    vertical: &'a str,
}

struct Decoder<'a> {
    entries: &'a EntryMap,
    course: CourseData,
    warnings: Warnings,
    /// Blocks that yielded nothing usable; later references skip them quietly.
    failed: HashSet<(BlockType, String)>,
}

#[instrument(level = "debug", skip_all, fields(entries = entries.len()))]
pub fn decode_olx(entries: &EntryMap) -> OlxDecode {
    let mut decoder = Decoder {
        entries,
        course: CourseData::default(),
        warnings: Warnings::default(),
        failed: HashSet::new(),
    };
    decoder.run();
    debug!(
        rows = decoder.course.structure.len(),
        blocks = decoder.course.block_count(),
        warnings = decoder.warnings.0.len(),
        "decoded OLX tree"
    );
    OlxDecode {
        course: decoder.course,
        warnings: decoder.warnings.0,
    }
}

fn attr_string(element: &Element, key: &str) -> String {
    element.get_attr(key).unwrap_or_default().to_string()
}

/// `display_name`, falling back to the node id so structure rows are never
/// blank.
fn display_name(element: &Element, id: &str) -> String {
    match element.get_attr("display_name") {
        Some(name) if !name.trim().is_empty() => name.to_string(),
        _ => id.to_string(),
    }
}

/// `url_name` of every direct child called `tag`.
fn child_refs<'e>(element: &'e Element, tag: &str) -> Vec<&'e str> {
    element
        .elements()
        .filter(|child| child.name == tag)
        .filter_map(|child| child.get_attr("url_name"))
        .filter(|id| !id.is_empty())
        .collect()
}

impl Decoder<'_> {
    fn run(&mut self) {
        let Some(pointer) = self.entries.get(COURSE_POINTER) else {
            self.warnings
                .push(format!("Missing {COURSE_POINTER}; nothing to import"));
            return;
        };
        let Some(pointer) = parse_document(pointer) else {
            self.warnings
                .push(format!("Could not parse {COURSE_POINTER}; nothing to import"));
            return;
        };

        let mut info = CourseInfo {
            organization: attr_string(&pointer, "org"),
            course_id: attr_string(&pointer, "course"),
            run: attr_string(&pointer, "url_name"),
            ..CourseInfo::default()
        };
        if info.run.is_empty() {
            self.warnings
                .push(format!("{COURSE_POINTER} has no url_name; course run unknown"));
            self.course.info = info;
            return;
        }

        let run_file = self.load(&run_path(&info.run));
        let mut supplied = Supplied::default();
        if let Some(run) = &run_file {
            if let Some(name) = run.get_attr("display_name") {
                info.course_name = name.to_string();
                supplied.name = true;
            }
            if let Some(language) = run.get_attr("language").filter(|value| !value.is_empty()) {
                info.language = language.to_string();
                supplied.language = true;
            }
            if let Some(flag) = run.get_attr("self_paced") {
                info.self_paced = parse_flag(flag);
                supplied.self_paced = true;
            }
            info.start_date = attr_string(run, "start");
            info.end_date = attr_string(run, "end");
        }
        self.merge_policy(&mut info, supplied);
        self.course.info = info;

        let Some(run) = run_file else {
            return;
        };
        for chapter_id in child_refs(&run, dirs::CHAPTER) {
            self.walk_chapter(chapter_id);
        }
    }

    /// Parses `path`, warning when it is absent or unreadable.
    fn load(&mut self, path: &str) -> Option<Element> {
        let Some(xml) = self.entries.get(path) else {
            self.warnings.push(format!("Missing referenced file {path}"));
            return None;
        };
        let element = parse_document(xml);
        if element.is_none() {
            self.warnings.push(format!("Could not parse {path}"));
        }
        element
    }

    fn merge_policy(&mut self, info: &mut CourseInfo, supplied: Supplied) {
        let path = policy_path(&info.run);
        let Some(raw) = self.entries.get(&path) else {
            return;
        };
        let policy = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(policy)) => policy,
            Ok(_) => {
                self.warnings
                    .push(format!("Ignoring {path}: expected a JSON object"));
                return;
            }
            Err(err) => {
                self.warnings.push(format!("Ignoring malformed {path}: {err}"));
                return;
            }
        };
        let Some(entry) = course_policy(&policy, &policy_key(&info.run)) else {
            return;
        };

        if !supplied.name {
            if let Some(name) = entry.get("display_name").and_then(Value::as_str) {
                info.course_name = name.to_string();
            }
        }
        if !supplied.language {
            if let Some(language) = entry.get("language").and_then(Value::as_str) {
                info.language = language.to_string();
            }
        }
        if !supplied.self_paced {
            match entry.get("self_paced") {
                Some(Value::Bool(flag)) => info.self_paced = *flag,
                Some(Value::String(flag)) => info.self_paced = parse_flag(flag),
                _ => {}
            }
        }
    }

    fn walk_chapter(&mut self, chapter_id: &str) {
        let Some(chapter) = self.load(&xml_path(dirs::CHAPTER, chapter_id)) else {
            return;
        };
        let chapter_name = display_name(&chapter, chapter_id);
        for sequential_id in child_refs(&chapter, dirs::SEQUENTIAL) {
            let Some(sequential) = self.load(&xml_path(dirs::SEQUENTIAL, sequential_id)) else {
                continue;
            };
            let sequential_name = display_name(&sequential, sequential_id);
            for vertical_id in child_refs(&sequential, dirs::VERTICAL) {
                let Some(vertical) = self.load(&xml_path(dirs::VERTICAL, vertical_id)) else {
                    continue;
                };
                let vertical_name = display_name(&vertical, vertical_id);
                let location = Location {
                    chapter: &chapter_name,
                    sequential: &sequential_name,
                    vertical: &vertical_name,
                };
                self.walk_vertical(&vertical, &location);
            }
        }
    }

    fn walk_vertical(&mut self, vertical: &Element, location: &Location<'_>) {
        for child in vertical.elements() {
            if child.name == dirs::VERTICAL {
                continue;
            }
            let Some(block_id) = child.get_attr("url_name").filter(|id| !id.is_empty()) else {
                continue;
            };
            let Some(block_type) = block_type_for_tag(&child.name) else {
                if !IGNORED_TAGS.contains(&child.name.as_str()) {
                    self.warnings.push(format!(
                        "Skipping unsupported <{}> block '{block_id}' in vertical '{}'",
                        child.name, location.vertical
                    ));
                }
                continue;
            };

            let failure = (block_type, block_id.to_string());
            if self.failed.contains(&failure) {
                continue;
            }
            let known = self.course.has_block(block_type, block_id);
            if !known && !self.read_block(block_type, block_id, child) {
                self.failed.insert(failure);
                continue;
            }
            self.course.structure.push(StructureRow {
                chapter: location.chapter.to_string(),
                sequential: location.sequential.to_string(),
                vertical: location.vertical.to_string(),
                block_type,
                block_id: block_id.to_string(),
            });
        }
    }

    /// Parses one block into its map. Returns `false` when nothing usable
    /// was found.
    fn read_block(&mut self, block_type: BlockType, block_id: &str, inline: &Element) -> bool {
        match block_type {
            BlockType::Text => {
                let Some(source) = self.block_source(dirs::HTML, block_id, inline) else {
                    return false;
                };
                let block = self.read_text(block_id, &source);
                self.course.texts.insert(block)
            }
            BlockType::Video => {
                // The file is optional when the vertical carries the video inline.
                let path = xml_path(dirs::VIDEO, block_id);
                let exists = self.entries.contains_key(&path);
                let file = if exists { self.load(&path) } else { None };
                if file.is_none() && !has_inline_content(inline) {
                    if !exists {
                        self.warnings.push(format!("Missing referenced file {path}"));
                    }
                    return false;
                }
                let block = read_video(block_id, file.as_ref(), inline);
                self.course.videos.insert(block)
            }
            BlockType::Problem => {
                let Some(source) = self.block_source(dirs::PROBLEM, block_id, inline) else {
                    return false;
                };
                self.course.problems.insert(read_problem(block_id, &source))
            }
            BlockType::OpenResponse => {
                let Some(source) = self.block_source(dirs::OPEN_ASSESSMENT, block_id, inline)
                else {
                    return false;
                };
                self.course
                    .open_responses
                    .insert(read_open_response(block_id, &source))
            }
        }
    }

    /// The block's own file, or the vertical's inline element when it carries
    /// the definition itself.
    fn block_source(&mut self, dir: &str, block_id: &str, inline: &Element) -> Option<Element> {
        let path = xml_path(dir, block_id);
        if self.entries.contains_key(&path) {
            return self.load(&path);
        }
        if has_inline_content(inline) {
            return Some(inline.clone());
        }
        self.warnings.push(format!("Missing referenced file {path}"));
        None
    }

    fn read_text(&self, block_id: &str, pointer: &Element) -> TextBlock {
        let filename = pointer
            .get_attr("filename")
            .filter(|name| !name.is_empty())
            .unwrap_or(block_id);
        let filename = filename.strip_suffix(".html").unwrap_or(filename);
        let content = self
            .entries
            .get(&html_path(filename))
            .map(|html| html.trim().to_string())
            .unwrap_or_default();
        TextBlock {
            block_id: block_id.to_string(),
            title: attr_string(pointer, "display_name"),
            content,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Supplied {
    name: bool,
    language: bool,
    self_paced: bool,
}

/// The entry keyed `course/{run}`, or the only entry when there is exactly
/// one.
fn course_policy<'p>(policy: &'p Map<String, Value>, key: &str) -> Option<&'p Map<String, Value>> {
    let entry = match policy.get(key) {
        Some(entry) => entry,
        None if policy.len() == 1 => policy.values().next()?,
        None => return None,
    };
    entry.as_object()
}

fn has_inline_content(inline: &Element) -> bool {
    !inline.children.is_empty() || inline.attributes.iter().any(|(key, _)| key != "url_name")
}

fn read_video(block_id: &str, file: Option<&Element>, inline: &Element) -> VideoBlock {
    let attr = |key: &str| -> String {
        file.and_then(|element| element.get_attr(key))
            .filter(|value| !value.is_empty())
            .or_else(|| inline.get_attr(key))
            .unwrap_or_default()
            .to_string()
    };

    let mut youtube_id = attr("youtube_id_1_0");
    if youtube_id.is_empty() {
        youtube_id = youtube_speed_id(&attr("youtube"));
    }

    VideoBlock {
        block_id: block_id.to_string(),
        title: attr("display_name"),
        youtube_id,
        html5_url: first_html5_source(&attr("html5_sources")),
        start_time: attr("start_time"),
        end_time: attr("end_time"),
    }
}

/// Id of the normal-speed entry in a `youtube="0.75:a,1.00:b"` list.
fn youtube_speed_id(youtube: &str) -> String {
    youtube
        .split(',')
        .find_map(|speed| speed.trim().strip_prefix("1.00:"))
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// First URL of an `html5_sources` value. Accepts a JSON array, an
/// entity-encoded JSON array, or a bare URL.
fn first_html5_source(raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    let parsed = serde_json::from_str::<Vec<String>>(raw)
        .or_else(|_| serde_json::from_str::<Vec<String>>(&decode_entities(raw)));
    match parsed {
        Ok(sources) => sources.into_iter().next().unwrap_or_default(),
        Err(_) => raw.to_string(),
    }
}

fn read_problem(block_id: &str, problem: &Element) -> ProblemBlock {
    let question_text = problem
        .find("label")
        .map(|label| collapse_whitespace(&label.text_content()))
        .unwrap_or_default();

    let choices = problem
        .find_all("choice")
        .into_iter()
        .map(|choice| Choice {
            text: collapse_whitespace(&choice.text_excluding(&["choicehint"])),
            correct: choice
                .get_attr("correct")
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("true")),
            hint: choice
                .find("choicehint")
                .map(|hint| collapse_whitespace(&hint.text_content()))
                .unwrap_or_default(),
        })
        .collect();

    ProblemBlock {
        block_id: block_id.to_string(),
        title: attr_string(problem, "display_name"),
        question_text,
        choices,
        explanation: problem.find("solution").map(solution_text).unwrap_or_default(),
        show_answer: attr_string(problem, "showanswer"),
    }
}

const EXPLANATION_LABEL: &str = "Explanation";

/// Solution text without its leading "Explanation" label.
fn solution_text(solution: &Element) -> String {
    let paragraphs = solution.find_all("p");
    if !paragraphs.is_empty() {
        return paragraphs
            .iter()
            .map(|paragraph| collapse_whitespace(&paragraph.text_content()))
            .enumerate()
            .filter(|(idx, text)| !(*idx == 0 && text == EXPLANATION_LABEL))
            .map(|(_, text)| text)
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
    }
    let text = collapse_whitespace(&solution.text_content());
    text.strip_prefix(EXPLANATION_LABEL)
        .map(str::trim_start)
        .unwrap_or(&text)
        .to_string()
}

fn read_open_response(block_id: &str, assessment: &Element) -> OpenResponseBlock {
    let title = match assessment.get_attr("display_name") {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => assessment
            .first_child("title")
            .map(|title| title.text_content().trim().to_string())
            .unwrap_or_default(),
    };
    let prompt = assessment
        .find("description")
        .map(|description| description.text_content().trim().to_string())
        .unwrap_or_default();

    let criteria = assessment
        .find_all("criterion")
        .into_iter()
        .map(|criterion| Criterion {
            name: child_text(criterion, "name")
                .or_else(|| child_text(criterion, "label"))
                .unwrap_or_default(),
            options: criterion
                .elements()
                .filter(|option| option.name == "option")
                .map(|option| RubricOption {
                    label: child_text(option, "label")
                        .or_else(|| child_text(option, "name"))
                        .unwrap_or_default(),
                    points: parse_points(option.get_attr("points").unwrap_or_default()),
                })
                .collect(),
        })
        .collect();

    OpenResponseBlock {
        block_id: block_id.to_string(),
        title,
        prompt,
        criteria,
        assessment_type: assessment_type(assessment),
    }
}

fn child_text(element: &Element, name: &str) -> Option<String> {
    element
        .first_child(name)
        .map(|child| collapse_whitespace(&child.text_content()))
        .filter(|text| !text.is_empty())
}

fn parse_points(raw: &str) -> i64 {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|points| points.round() as i64))
        .unwrap_or_default()
}

/// Staff wins over peer; anything else is self assessment.
fn assessment_type(assessment: &Element) -> AssessmentType {
    let steps: Vec<&str> = assessment
        .find_all("assessment")
        .into_iter()
        .filter_map(|step| step.get_attr("name"))
        .collect();
    if steps.contains(&"staff-assessment") {
        AssessmentType::StaffAssessment
    } else if steps.contains(&"peer-assessment") {
        AssessmentType::PeerAssessment
    } else {
        AssessmentType::SelfAssessment
    }
}
