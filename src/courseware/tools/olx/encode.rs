//! OLX generators. Each one turns part of the model into an [`EntryMap`]
//! fragment; [`encode_course`] merges them.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::escape::escape;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::courseware::tools::error::Result;
use crate::courseware::tools::io::xml::Element;
use crate::courseware::tools::model::{
    AssessmentType, BlockMap, CourseData, CourseInfo, Hierarchy, OpenResponseBlock, ProblemBlock,
    TextBlock, VideoBlock,
};
use crate::courseware::tools::olx::{
    COURSE_POINTER, EntryMap, dirs, grading_policy_path, html_path, policy_key, policy_path,
    run_path, tag_for, xml_path,
};

const OLX_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Runs every generator and merges their output.
pub fn encode_course(course: &CourseData, hierarchy: &Hierarchy) -> Result<EntryMap> {
    let fragments = [
        course_files(&course.info, hierarchy)?,
        chapter_files(hierarchy),
        sequential_files(hierarchy),
        vertical_files(hierarchy),
        text_files(&course.texts),
        video_files(&course.videos)?,
        problem_files(&course.problems),
        open_response_files(&course.open_responses),
    ];

    let mut entries = EntryMap::new();
    for fragment in fragments {
        entries.extend(fragment);
    }
    debug!(files = entries.len(), "encoded OLX entries");
    Ok(entries)
}

/// Rewrites a free-form date as `YYYY-MM-DDTHH:MM:SSZ`, or `None` if it
/// cannot be understood.
pub fn format_olx_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc).format(OLX_DATE_FORMAT).to_string());
    }
    const DATE_TIMES: [&str; 5] = [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M",
    ];
    for format in DATE_TIMES {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(parsed.format(OLX_DATE_FORMAT).to_string());
        }
    }
    const DATES: [&str; 3] = ["%Y-%m-%d", "%m/%d/%Y", "%Y/%m/%d"];
    for format in DATES {
        if let Ok(parsed) = NaiveDate::parse_from_str(raw, format) {
            return parsed
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.format(OLX_DATE_FORMAT).to_string());
        }
    }
    None
}

fn olx_date(label: &str, raw: &str) -> Option<String> {
    let formatted = format_olx_date(raw);
    if formatted.is_none() && !raw.trim().is_empty() {
        warn!(field = label, value = raw, "dropping unparseable course date");
    }
    formatted
}

#[derive(Serialize)]
struct GradingPolicy {
    #[serde(rename = "GRADER")]
    grader: Vec<GraderEntry>,
    #[serde(rename = "GRADE_CUTOFFS")]
    grade_cutoffs: BTreeMap<&'static str, f64>,
}

#[derive(Serialize)]
struct GraderEntry {
    #[serde(rename = "type")]
    kind: &'static str,
    min_count: u32,
    drop_count: u32,
    short_label: &'static str,
    weight: f64,
}

fn grading_policy() -> GradingPolicy {
    GradingPolicy {
        grader: vec![
            GraderEntry {
                kind: "Homework",
                min_count: 1,
                drop_count: 0,
                short_label: "HW",
                weight: 0.5,
            },
            GraderEntry {
                kind: "Final Exam",
                min_count: 1,
                drop_count: 0,
                short_label: "Final",
                weight: 0.5,
            },
        ],
        grade_cutoffs: BTreeMap::from([("Pass", 0.5)]),
    }
}

fn navigation_tabs() -> Value {
    json!([
        {"type": "courseware", "name": "Course"},
        {"type": "course_info", "name": "Home"},
        {"type": "discussion", "name": "Discussion"},
        {"type": "progress", "name": "Progress"}
    ])
}

/// `course.xml`, the run file and both policy documents.
pub fn course_files(info: &CourseInfo, hierarchy: &Hierarchy) -> Result<EntryMap> {
    let start = olx_date("start", &info.start_date);
    let end = olx_date("end", &info.end_date);

    let pointer = Element::new("course")
        .attr("url_name", info.run.as_str())
        .attr("org", info.organization.as_str())
        .attr("course", info.course_id.as_str());

    let mut run = Element::new("course")
        .attr("display_name", info.course_name.as_str())
        .attr("language", info.language.as_str())
        .attr("self_paced", info.self_paced.to_string());
    if let Some(start) = &start {
        run = run.attr("start", start.as_str());
    }
    if let Some(end) = &end {
        run = run.attr("end", end.as_str());
    }
    let run = run.children(
        hierarchy
            .chapters
            .iter()
            .map(|chapter| Element::new(dirs::CHAPTER).attr("url_name", chapter.id.as_str())),
    );

    let mut course_policy = Map::new();
    course_policy.insert("display_name".into(), json!(info.course_name));
    course_policy.insert("language".into(), json!(info.language));
    course_policy.insert("self_paced".into(), json!(info.self_paced));
    if let Some(start) = start {
        course_policy.insert("start".into(), json!(start));
    }
    if let Some(end) = end {
        course_policy.insert("end".into(), json!(end));
    }
    course_policy.insert("tabs".into(), navigation_tabs());
    let mut policy = Map::new();
    policy.insert(policy_key(&info.run), Value::Object(course_policy));

    let mut entries = EntryMap::new();
    entries.insert(COURSE_POINTER.to_string(), pointer.to_xml());
    entries.insert(run_path(&info.run), run.to_xml());
    entries.insert(
        policy_path(&info.run),
        serde_json::to_string_pretty(&Value::Object(policy))?,
    );
    entries.insert(
        grading_policy_path(&info.run),
        serde_json::to_string_pretty(&grading_policy())?,
    );
    Ok(entries)
}

fn reference(tag: &str, id: &str) -> Element {
    Element::new(tag).attr("url_name", id)
}

pub fn chapter_files(hierarchy: &Hierarchy) -> EntryMap {
    hierarchy
        .chapters
        .iter()
        .map(|chapter| {
            let element = Element::new(dirs::CHAPTER)
                .attr("display_name", chapter.name.as_str())
                .children(
                    chapter
                        .sequentials
                        .iter()
                        .map(|sequential| reference(dirs::SEQUENTIAL, &sequential.id)),
                );
            (xml_path(dirs::CHAPTER, &chapter.id), element.to_xml())
        })
        .collect()
}

pub fn sequential_files(hierarchy: &Hierarchy) -> EntryMap {
    hierarchy
        .sequentials()
        .map(|sequential| {
            let element = Element::new(dirs::SEQUENTIAL)
                .attr("display_name", sequential.name.as_str())
                .children(
                    sequential
                        .verticals
                        .iter()
                        .map(|vertical| reference(dirs::VERTICAL, &vertical.id)),
                );
            (xml_path(dirs::SEQUENTIAL, &sequential.id), element.to_xml())
        })
        .collect()
}

pub fn vertical_files(hierarchy: &Hierarchy) -> EntryMap {
    hierarchy
        .verticals()
        .map(|vertical| {
            let element = Element::new(dirs::VERTICAL)
                .attr("display_name", vertical.name.as_str())
                .children(
                    vertical
                        .blocks
                        .iter()
                        .map(|block| reference(tag_for(block.block_type), &block.block_id)),
                );
            (xml_path(dirs::VERTICAL, &vertical.id), element.to_xml())
        })
        .collect()
}

/// True when `content` contains something that looks like a tag: `<`, a tag
/// name or `!`, and a closing `>` further on.
fn contains_markup(content: &str) -> bool {
    content.match_indices('<').any(|(pos, _)| {
        let rest = &content[pos + 1..];
        if rest.starts_with('!') {
            return rest.contains('>');
        }
        let body = rest.strip_prefix('/').unwrap_or(rest);
        if !body.starts_with(|ch: char| ch.is_ascii_alphabetic()) {
            return false;
        }
        let name_end = body
            .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == ':'))
            .unwrap_or(body.len());
        let after_name = &body[name_end..];
        after_name.starts_with(|ch: char| ch == '>' || ch == '/' || ch.is_whitespace())
            && after_name.contains('>')
    })
}

/// Plain text becomes `<p>` paragraphs split on blank lines; HTML is kept.
pub fn wrap_paragraphs(content: &str) -> String {
    if contains_markup(content) {
        return content.to_string();
    }
    let normalized = content.replace("\r\n", "\n");
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }
    paragraphs
        .iter()
        .map(|paragraph| format!("<p>{}</p>", escape(paragraph.as_str())))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn text_files(blocks: &BlockMap<TextBlock>) -> EntryMap {
    let mut entries = EntryMap::new();
    for block in blocks {
        let pointer = Element::new(dirs::HTML)
            .attr("display_name", block.title.as_str())
            .attr("filename", block.block_id.as_str());
        entries.insert(xml_path(dirs::HTML, &block.block_id), pointer.to_xml());
        entries.insert(html_path(&block.block_id), wrap_paragraphs(&block.content));
    }
    entries
}

pub fn video_files(blocks: &BlockMap<VideoBlock>) -> Result<EntryMap> {
    let mut entries = EntryMap::new();
    for block in blocks {
        let sources: Vec<&str> = if block.html5_url.is_empty() {
            Vec::new()
        } else {
            vec![block.html5_url.as_str()]
        };
        let youtube = if block.youtube_id.is_empty() {
            String::new()
        } else {
            format!("1.00:{}", block.youtube_id)
        };
        let element = Element::new(dirs::VIDEO)
            .attr("display_name", block.title.as_str())
            .attr_opt("youtube", &youtube)
            .attr_opt("youtube_id_1_0", &block.youtube_id)
            .attr("html5_sources", serde_json::to_string(&sources)?)
            .attr_opt("start_time", &block.start_time)
            .attr_opt("end_time", &block.end_time);
        entries.insert(xml_path(dirs::VIDEO, &block.block_id), element.to_xml());
    }
    Ok(entries)
}

pub fn problem_files(blocks: &BlockMap<ProblemBlock>) -> EntryMap {
    let mut entries = EntryMap::new();
    for block in blocks {
        let choices = block.choices.iter().map(|choice| {
            let mut element = Element::new("choice")
                .attr("correct", choice.correct.to_string())
                .text(choice.text.as_str());
            if !choice.hint.is_empty() {
                element = element.child(Element::new("choicehint").text(choice.hint.as_str()));
            }
            element
        });

        let response = Element::new("multiplechoiceresponse")
            .child(Element::new("label").text(block.question_text.as_str()))
            .child(
                Element::new("choicegroup")
                    .attr("type", "MultipleChoice")
                    .children(choices),
            );

        let mut problem = Element::new(dirs::PROBLEM)
            .attr("display_name", block.title.as_str())
            .attr_opt("showanswer", &block.show_answer)
            .child(response);
        if !block.explanation.is_empty() {
            problem = problem.child(
                Element::new("solution").child(
                    Element::new("div")
                        .attr("class", "detailed-solution")
                        .child(Element::new("p").text("Explanation"))
                        .child(Element::new("p").text(block.explanation.as_str())),
                ),
            );
        }
        entries.insert(xml_path(dirs::PROBLEM, &block.block_id), problem.to_xml());
    }
    entries
}

fn assessment_steps(kind: AssessmentType) -> Element {
    let self_step = Element::new("assessment").attr("name", "self-assessment");
    let steps = Element::new("assessments");
    match kind {
        AssessmentType::SelfAssessment => steps.child(self_step),
        AssessmentType::PeerAssessment => steps
            .child(
                Element::new("assessment")
                    .attr("name", "peer-assessment")
                    .attr("must_grade", "2")
                    .attr("must_be_graded_by", "2"),
            )
            .child(self_step),
        AssessmentType::StaffAssessment => steps.child(
            Element::new("assessment")
                .attr("name", "staff-assessment")
                .attr("required", "True"),
        ),
    }
}

pub fn open_response_files(blocks: &BlockMap<OpenResponseBlock>) -> EntryMap {
    let mut entries = EntryMap::new();
    for block in blocks {
        let criteria = block.criteria.iter().map(|criterion| {
            let options = criterion.options.iter().map(|option| {
                Element::new("option")
                    .attr("points", option.points.to_string())
                    .child(Element::new("name").text(option.label.as_str()))
                    .child(Element::new("label").text(option.label.as_str()))
                    .child(Element::new("explanation"))
            });
            Element::new("criterion")
                .attr("feedback", "optional")
                .child(Element::new("name").text(criterion.name.as_str()))
                .child(Element::new("label").text(criterion.name.as_str()))
                .child(Element::new("prompt").text(criterion.name.as_str()))
                .children(options)
        });

        let element = Element::new(dirs::OPEN_ASSESSMENT)
            .attr("display_name", block.title.as_str())
            .child(Element::new("title").text(block.title.as_str()))
            .child(assessment_steps(block.assessment_type))
            .child(
                Element::new("prompts").child(
                    Element::new("prompt")
                        .child(Element::new("description").text(block.prompt.as_str())),
                ),
            )
            .child(Element::new("rubric").children(criteria));
        entries.insert(
            xml_path(dirs::OPEN_ASSESSMENT, &block.block_id),
            element.to_xml(),
        );
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courseware::tools::model::{
        BlockType, Choice, Criterion, NodeIds, RubricOption, SequentialIdSource, StructureRow,
        build_hierarchy,
    };

    fn course() -> CourseData {
        let mut course = CourseData::default();
        course.info = CourseInfo {
            course_name: "Rust & You".into(),
            organization: "RustX".into(),
            course_id: "RS101".into(),
            run: "2024_T1".into(),
            language: "en".into(),
            start_date: "2024-01-15".into(),
            end_date: "whenever".into(),
            self_paced: true,
        };
        course.structure = vec![StructureRow {
            chapter: "Week 1".into(),
            sequential: "Basics".into(),
            vertical: "Unit 1".into(),
            block_type: BlockType::Problem,
            block_id: "p1".into(),
        }];
        course
    }

    fn hierarchy(course: &CourseData) -> Hierarchy {
        let ids = NodeIds::assign(&course.structure, &mut SequentialIdSource::default());
        build_hierarchy(&course.structure, &ids).expect("hierarchy")
    }

    #[test]
    fn dates_are_normalised_or_dropped() {
        assert_eq!(
            format_olx_date("2024-01-15").as_deref(),
            Some("2024-01-15T00:00:00Z")
        );
        assert_eq!(
            format_olx_date("2024-01-15T10:30:00+02:00").as_deref(),
            Some("2024-01-15T08:30:00Z")
        );
        assert_eq!(
            format_olx_date("2024-01-15 09:05").as_deref(),
            Some("2024-01-15T09:05:00Z")
        );
        assert_eq!(
            format_olx_date("03/01/2025").as_deref(),
            Some("2025-03-01T00:00:00Z")
        );
        assert_eq!(format_olx_date("soon"), None);
    }

    #[test]
    fn course_generator_writes_pointer_run_and_policies() {
        let course = course();
        let entries = course_files(&course.info, &hierarchy(&course)).expect("course files");

        assert_eq!(
            entries["course.xml"],
            "<course url_name=\"2024_T1\" org=\"RustX\" course=\"RS101\"/>\n"
        );
        let run = &entries["course/2024_T1.xml"];
        assert!(run.contains("display_name=\"Rust &amp; You\""));
        assert!(run.contains("start=\"2024-01-15T00:00:00Z\""));
        assert!(!run.contains("end="));
        assert!(run.contains("<chapter url_name=\"week_1_00000001\"/>"));

        let policy: Value =
            serde_json::from_str(&entries["policies/2024_T1/policy.json"]).expect("policy json");
        let course_policy = &policy["course/2024_T1"];
        assert_eq!(course_policy["self_paced"], json!(true));
        assert_eq!(course_policy["tabs"].as_array().map(Vec::len), Some(4));

        let grading: Value =
            serde_json::from_str(&entries["policies/2024_T1/grading_policy.json"])
                .expect("grading json");
        assert_eq!(grading["GRADER"][0]["weight"], json!(0.5));
        assert_eq!(grading["GRADER"][1]["type"], json!("Final Exam"));
        assert_eq!(grading["GRADE_CUTOFFS"]["Pass"], json!(0.5));
    }

    #[test]
    fn vertical_maps_block_types_to_tags() {
        let mut course = course();
        course.structure.push(StructureRow {
            chapter: "Week 1".into(),
            sequential: "Basics".into(),
            vertical: "Unit 1".into(),
            block_type: BlockType::OpenResponse,
            block_id: "essay".into(),
        });
        let entries = vertical_files(&hierarchy(&course));
        let vertical = entries.values().next().expect("one vertical");

        assert!(vertical.contains("<problem url_name=\"p1\"/>"));
        assert!(vertical.contains("<openassessment url_name=\"essay\"/>"));
    }

    #[test]
    fn plain_text_is_wrapped_and_html_is_not() {
        assert_eq!(
            wrap_paragraphs("First line\nstill first\n\n  \nSecond & last"),
            "<p>First line\nstill first</p>\n<p>Second &amp; last</p>"
        );
        assert_eq!(wrap_paragraphs("<p>Already</p>\n\n<p>HTML</p>"), "<p>Already</p>\n\n<p>HTML</p>");
        assert_eq!(wrap_paragraphs("1 < 2"), "<p>1 &lt; 2</p>");
        assert_eq!(wrap_paragraphs(""), "");
    }

    #[test]
    fn unclosed_angle_brackets_are_plain_text() {
        assert_eq!(wrap_paragraphs("if x<y then"), "<p>if x&lt;y then</p>");
        assert_eq!(wrap_paragraphs("x <3 and 5> 4"), "<p>x &lt;3 and 5&gt; 4</p>");
        assert_eq!(wrap_paragraphs("line<br/>break"), "line<br/>break");
        assert_eq!(wrap_paragraphs("<!-- note -->text"), "<!-- note -->text");
        assert_eq!(wrap_paragraphs("</div>"), "</div>");
    }

    #[test]
    fn text_generator_pairs_pointer_and_content() {
        let blocks: BlockMap<TextBlock> = [TextBlock {
            block_id: "intro".into(),
            title: "Intro".into(),
            content: "Hello".into(),
        }]
        .into_iter()
        .collect();
        let entries = text_files(&blocks);

        assert_eq!(
            entries["html/intro.xml"],
            "<html display_name=\"Intro\" filename=\"intro\"/>\n"
        );
        assert_eq!(entries["html/intro.html"], "<p>Hello</p>");
    }

    #[test]
    fn video_sources_are_an_escaped_json_array() {
        let blocks: BlockMap<VideoBlock> = [
            VideoBlock {
                block_id: "v1".into(),
                title: "Clip".into(),
                youtube_id: "abc123".into(),
                html5_url: "https://cdn.example.com/a.mp4".into(),
                start_time: "00:00:05".into(),
                end_time: String::new(),
            },
            VideoBlock {
                block_id: "v2".into(),
                title: "Bare".into(),
                ..VideoBlock::default()
            },
        ]
        .into_iter()
        .collect();
        let entries = video_files(&blocks).expect("video files");

        let first = &entries["video/v1.xml"];
        assert!(first.contains("youtube=\"1.00:abc123\""));
        assert!(first.contains("html5_sources=\"[&quot;https://cdn.example.com/a.mp4&quot;]\""));
        assert!(first.contains("start_time=\"00:00:05\""));
        assert!(!first.contains("end_time"));
        assert!(entries["video/v2.xml"].contains("html5_sources=\"[]\""));
    }

    #[test]
    fn problem_generator_emits_choices_hints_and_solution() {
        let blocks: BlockMap<ProblemBlock> = [ProblemBlock {
            block_id: "p1".into(),
            title: "Quiz".into(),
            question_text: "Is 1 < 2?".into(),
            choices: vec![
                Choice {
                    text: "Yes".into(),
                    correct: true,
                    hint: String::new(),
                },
                Choice {
                    text: "No".into(),
                    correct: false,
                    hint: "Count again".into(),
                },
            ],
            explanation: "Numbers & order".into(),
            show_answer: String::new(),
        }]
        .into_iter()
        .collect();
        let xml = &problem_files(&blocks)["problem/p1.xml"];

        assert!(xml.contains("<label>Is 1 &lt; 2?</label>"));
        assert!(xml.contains("<choice correct=\"true\">Yes</choice>"));
        assert!(xml.contains(
            "<choice correct=\"false\">No<choicehint>Count again</choicehint></choice>"
        ));
        assert!(xml.contains("<p>Numbers &amp; order</p>"));
        assert!(!xml.contains("showanswer"));
    }

    #[test]
    fn assessment_steps_follow_assessment_type() {
        let make = |kind| {
            let blocks: BlockMap<OpenResponseBlock> = [OpenResponseBlock {
                block_id: "o".into(),
                title: "Essay".into(),
                prompt: "Write".into(),
                criteria: vec![Criterion {
                    name: "Depth".into(),
                    options: vec![RubricOption {
                        label: "Deep".into(),
                        points: 3,
                    }],
                }],
                assessment_type: kind,
            }]
            .into_iter()
            .collect();
            open_response_files(&blocks)["openassessment/o.xml"].clone()
        };

        let own = make(AssessmentType::SelfAssessment);
        assert!(own.contains("name=\"self-assessment\""));
        assert!(!own.contains("peer-assessment"));

        let peer = make(AssessmentType::PeerAssessment);
        let peer_at = peer.find("peer-assessment").expect("peer step");
        let self_at = peer.find("self-assessment").expect("self step");
        assert!(peer_at < self_at);

        let staff = make(AssessmentType::StaffAssessment);
        assert!(staff.contains("name=\"staff-assessment\" required=\"True\""));
        assert!(!staff.contains("self-assessment"));
        assert!(staff.contains("<option points=\"3\">"));
    }
}
