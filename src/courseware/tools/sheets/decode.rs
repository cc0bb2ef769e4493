use tracing::{debug, instrument};

use crate::courseware::tools::model::{
    AssessmentType, BlockType, Choice, CourseData, CourseInfo, Criterion, OpenResponseBlock,
    ProblemBlock, RubricOption, StructureRow, TextBlock, VideoBlock,
};
use crate::courseware::tools::sheets::{
    CHOICE_LETTERS, COURSE_INFO_SHEET, MAX_CRITERIA, OPEN_RESPONSE_SHEET, PROBLEM_SHEET, Record,
    STRUCTURE_COLUMNS, STRUCTURE_SHEET, SheetTable, TEXT_SHEET, VIDEO_SHEET, WorkbookData, fields,
    normalize_header,
};

/// Result of reading the authoring workbook.
///
/// `errors` lists every validation failure in discovery order. The course is
/// only fit for export when the list is empty.
#[derive(Debug, Clone, Default)]
pub struct WorkbookDecode {
    pub course: CourseData,
    pub errors: Vec<String>,
}

impl WorkbookDecode {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Default)]
struct Errors(Vec<String>);

impl Errors {
    fn push(&mut self, message: String) {
        debug!(%message, "workbook validation error");
        self.0.push(message);
    }
}

/// Decodes the six-sheet workbook into a course model.
///
/// Never fails: missing sheets, missing fields and malformed rows are
/// reported in [`WorkbookDecode::errors`] and decoding carries on with
/// whatever is usable.
#[instrument(level = "debug", skip_all, fields(sheets = workbook.tables.len()))]
pub fn decode_workbook(workbook: &WorkbookData) -> WorkbookDecode {
    let mut errors = Errors::default();
    let mut course = CourseData::default();

    match workbook.sheet(COURSE_INFO_SHEET) {
        Some(table) => course.info = read_course_info(table, &mut errors),
        None => errors.push(format!("Missing required sheet '{COURSE_INFO_SHEET}'")),
    }

    match workbook.sheet(STRUCTURE_SHEET) {
        Some(table) => course.structure = read_structure(table, &mut errors),
        None => errors.push(format!("Missing required sheet '{STRUCTURE_SHEET}'")),
    }

    if let Some(table) = workbook.sheet(TEXT_SHEET) {
        for record in table.records() {
            let Some(block_id) = required_block_id(TEXT_SHEET, &record, &mut errors) else {
                continue;
            };
            let block = TextBlock {
                block_id: block_id.to_string(),
                title: record.get("title").to_string(),
                content: record.get("content").to_string(),
            };
            if !course.texts.insert(block) {
                errors.push(duplicate(TEXT_SHEET, &record, block_id));
            }
        }
    }

    if let Some(table) = workbook.sheet(VIDEO_SHEET) {
        for record in table.records() {
            let Some(block_id) = required_block_id(VIDEO_SHEET, &record, &mut errors) else {
                continue;
            };
            let block = VideoBlock {
                block_id: block_id.to_string(),
                title: record.get("title").to_string(),
                youtube_id: record.get("youtube_id").to_string(),
                html5_url: record.get("html5_url").to_string(),
                start_time: record.get("start_time").to_string(),
                end_time: record.get("end_time").to_string(),
            };
            if !course.videos.insert(block) {
                errors.push(duplicate(VIDEO_SHEET, &record, block_id));
            }
        }
    }

    if let Some(table) = workbook.sheet(PROBLEM_SHEET) {
        for record in table.records() {
            let Some(block) = read_problem(&record, &mut errors) else {
                continue;
            };
            let block_id = block.block_id.clone();
            if !course.problems.insert(block) {
                errors.push(duplicate(PROBLEM_SHEET, &record, &block_id));
            }
        }
    }

    if let Some(table) = workbook.sheet(OPEN_RESPONSE_SHEET) {
        for record in table.records() {
            let Some(block) = read_open_response(&record, &mut errors) else {
                continue;
            };
            let block_id = block.block_id.clone();
            if !course.open_responses.insert(block) {
                errors.push(duplicate(OPEN_RESPONSE_SHEET, &record, &block_id));
            }
        }
    }

    let unresolved: Vec<String> = course
        .unresolved_rows()
        .map(|row| {
            format!(
                "Structure references {} block '{}' which is not defined in the '{}' sheet",
                row.block_type,
                row.block_id,
                content_sheet(row.block_type)
            )
        })
        .collect();
    for message in unresolved {
        errors.push(message);
    }

    WorkbookDecode {
        course,
        errors: errors.0,
    }
}

fn content_sheet(block_type: BlockType) -> &'static str {
    match block_type {
        BlockType::Text => TEXT_SHEET,
        BlockType::Video => VIDEO_SHEET,
        BlockType::Problem => PROBLEM_SHEET,
        BlockType::OpenResponse => OPEN_RESPONSE_SHEET,
    }
}

fn read_course_info(table: &SheetTable, errors: &mut Errors) -> CourseInfo {
    let mut info = CourseInfo::default();
    let mut seen = Vec::new();

    for record in table.records() {
        let key = normalize_header(record.cell(0));
        let value = record.cell(1).to_string();
        let target = match key.as_str() {
            "course_name" => &mut info.course_name,
            "organization" | "org" => &mut info.organization,
            "course_id" => &mut info.course_id,
            "run" => &mut info.run,
            "language" => &mut info.language,
            "start_date" | "start" => &mut info.start_date,
            "end_date" | "end" => &mut info.end_date,
            "self_paced" => {
                info.self_paced = parse_flag(&value);
                continue;
            }
            _ => continue,
        };
        if key == "language" && value.is_empty() {
            continue;
        }
        *target = value;
        seen.push(key);
    }

    let required = [
        (fields::COURSE_NAME, &info.course_name),
        (fields::ORGANIZATION, &info.organization),
        (fields::COURSE_ID, &info.course_id),
        (fields::RUN, &info.run),
    ];
    for (label, value) in required {
        if value.is_empty() {
            errors.push(format!(
                "{COURSE_INFO_SHEET}: missing required field '{label}'"
            ));
        }
    }

    debug!(fields = seen.len(), "read course info");
    info
}

pub(crate) fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "y" | "1"
    )
}

fn read_structure(table: &SheetTable, errors: &mut Errors) -> Vec<StructureRow> {
    let mut rows = Vec::new();

    for record in table.records() {
        let mut valid = true;
        for column in STRUCTURE_COLUMNS {
            if record.get(column).is_empty() {
                errors.push(format!(
                    "{STRUCTURE_SHEET} row {}: missing {column}",
                    record.number
                ));
                valid = false;
            }
        }

        let raw_type = record.get("block_type");
        let block_type = BlockType::parse(raw_type);
        if block_type.is_none() && !raw_type.is_empty() {
            errors.push(format!(
                "{STRUCTURE_SHEET} row {}: unknown block_type '{raw_type}' (expected text, video, problem or openresponse)",
                record.number
            ));
        }

        match block_type {
            Some(block_type) if valid => rows.push(StructureRow {
                chapter: record.get("chapter").to_string(),
                sequential: record.get("sequential").to_string(),
                vertical: record.get("vertical").to_string(),
                block_type,
                block_id: record.get("block_id").to_string(),
            }),
            _ => debug!(row = record.number, "skipping invalid structure row"),
        }
    }

    rows
}

fn required_block_id<'a>(sheet: &str, record: &'a Record<'_>, errors: &mut Errors) -> Option<&'a str> {
    let block_id = record.get("block_id");
    if block_id.is_empty() {
        errors.push(format!("{sheet} row {}: missing block_id", record.number));
        None
    } else {
        Some(block_id)
    }
}

fn duplicate(sheet: &str, record: &Record<'_>, block_id: &str) -> String {
    format!(
        "{sheet} row {}: duplicate block_id '{block_id}'",
        record.number
    )
}

/// Letters named in a `correct` cell such as `"B, d;E"`, lowercased.
fn correct_letters(value: &str) -> Vec<char> {
    value
        .split(|ch: char| ch == ',' || ch == ';' || ch.is_whitespace())
        .filter_map(|token| {
            let mut chars = token.trim().chars();
            match (chars.next(), chars.next()) {
                (Some(letter), None) => Some(letter.to_ascii_lowercase()),
                _ => None,
            }
        })
        .collect()
}

fn read_problem(record: &Record<'_>, errors: &mut Errors) -> Option<ProblemBlock> {
    let block_id = required_block_id(PROBLEM_SHEET, record, errors)?;
    let correct = correct_letters(record.get("correct"));

    let choices: Vec<Choice> = CHOICE_LETTERS
        .iter()
        .filter_map(|&letter| {
            let text = record.get(&format!("choice_{letter}"));
            if text.is_empty() {
                return None;
            }
            Some(Choice {
                text: text.to_string(),
                correct: correct.contains(&letter),
                hint: record.get(&format!("hint_{letter}")).to_string(),
            })
        })
        .collect();

    let mut valid = true;
    if choices.len() < 2 {
        errors.push(format!(
            "{PROBLEM_SHEET} row {} ({block_id}): at least two choices are required",
            record.number
        ));
        valid = false;
    }
    if !choices.iter().any(|choice| choice.correct) {
        errors.push(format!(
            "{PROBLEM_SHEET} row {} ({block_id}): no correct choice marked",
            record.number
        ));
        valid = false;
    }
    if !valid {
        return None;
    }

    Some(ProblemBlock {
        block_id: block_id.to_string(),
        title: record.get("title").to_string(),
        question_text: record.get("question_text").to_string(),
        choices,
        explanation: record.get("explanation").to_string(),
        show_answer: record.get("show_answer").to_string(),
    })
}

fn read_open_response(record: &Record<'_>, errors: &mut Errors) -> Option<OpenResponseBlock> {
    let block_id = required_block_id(OPEN_RESPONSE_SHEET, record, errors)?;

    let mut criteria = Vec::new();
    for number in 1..=MAX_CRITERIA {
        let name_column = format!("criterion_{number}_name");
        let options_column = format!("criterion_{number}_options");
        if !record.has_column(&name_column) || !record.has_column(&options_column) {
            break;
        }
        let name = record.get(&name_column);
        if name.is_empty() {
            break;
        }

        let mut options = Vec::new();
        for entry in record.get(&options_column).split(';') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match parse_option(entry) {
                Some(option) => options.push(option),
                None => errors.push(format!(
                    "{OPEN_RESPONSE_SHEET} row {} ({block_id}): invalid option '{entry}' in {options_column}, expected label=points",
                    record.number
                )),
            }
        }

        criteria.push(Criterion {
            name: name.to_string(),
            options,
        });
    }

    let raw_type = record.get("assessment_type");
    let assessment_type = if raw_type.is_empty() {
        AssessmentType::default()
    } else {
        match AssessmentType::parse(raw_type) {
            Some(kind) => kind,
            None => {
                errors.push(format!(
                    "{OPEN_RESPONSE_SHEET} row {} ({block_id}): unknown assessment_type '{raw_type}' (expected self, peer or staff)",
                    record.number
                ));
                AssessmentType::default()
            }
        }
    };

    Some(OpenResponseBlock {
        block_id: block_id.to_string(),
        title: record.get("title").to_string(),
        prompt: record.get("prompt").to_string(),
        criteria,
        assessment_type,
    })
}

/// Parses `label=points`, splitting on the last `=` so labels may contain one.
fn parse_option(entry: &str) -> Option<RubricOption> {
    let (label, points) = entry.rsplit_once('=')?;
    let label = label.trim();
    let points = points.trim();
    if label.is_empty() {
        return None;
    }
    let points = points.parse::<i64>().ok().or_else(|| {
        points
            .parse::<f64>()
            .ok()
            .filter(|value| value.fract() == 0.0)
            .map(|value| value as i64)
    })?;
    Some(RubricOption {
        label: label.to_string(),
        points,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str, columns: &[&str], rows: &[&[&str]]) -> SheetTable {
        SheetTable {
            sheet_name: name.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    fn course_info() -> SheetTable {
        table(
            "course info",
            &["Field", "Value"],
            &[
                &["Course Name", "Intro to Rust"],
                &["Organization", "RustX"],
                &["Course ID", "RS101"],
                &["Run", "2024_T1"],
                &["Self Paced", "Yes"],
            ],
        )
    }

    fn structure(rows: &[&[&str]]) -> SheetTable {
        table(" Structure ", &STRUCTURE_COLUMNS, rows)
    }

    const PROBLEM_COLUMNS: [&str; 18] = [
        "block_id",
        "title",
        "question_text",
        "choice_a",
        "choice_b",
        "choice_c",
        "choice_d",
        "choice_e",
        "choice_f",
        "correct",
        "hint_a",
        "hint_b",
        "hint_c",
        "hint_d",
        "hint_e",
        "hint_f",
        "explanation",
        "show_answer",
    ];

    #[test]
    fn missing_required_sheets_are_reported_without_failing() {
        let decoded = decode_workbook(&WorkbookData::default());
        assert_eq!(
            decoded.errors,
            vec![
                "Missing required sheet 'Course Info'".to_string(),
                "Missing required sheet 'Structure'".to_string(),
            ]
        );
        assert_eq!(decoded.course.info.language, "en");
    }

    #[test]
    fn course_info_reports_each_missing_field() {
        let workbook = WorkbookData {
            tables: vec![
                table("Course Info", &["Field", "Value"], &[&["Course Name", "X"]]),
                structure(&[]),
            ],
        };
        let decoded = decode_workbook(&workbook);
        assert_eq!(decoded.errors.len(), 3);
        assert!(decoded.errors[0].contains("'Organization'"));
        assert!(decoded.errors[2].contains("'Run'"));
    }

    #[test]
    fn undefined_block_reference_yields_one_error() {
        let workbook = WorkbookData {
            tables: vec![
                course_info(),
                structure(&[&["Week 1", "Intro", "Welcome", "text", "missing_block"]]),
                table("Text Blocks", &["block_id", "title", "content"], &[]),
            ],
        };
        let decoded = decode_workbook(&workbook);

        let matching: Vec<_> = decoded
            .errors
            .iter()
            .filter(|error| error.contains("missing_block"))
            .collect();
        assert_eq!(matching.len(), 1);
        assert_eq!(decoded.errors.len(), 1);
        assert!(!decoded.course.texts.contains("missing_block"));
        assert!(decoded.course.info.self_paced);
    }

    #[test]
    fn invalid_structure_rows_are_skipped() {
        let workbook = WorkbookData {
            tables: vec![
                course_info(),
                structure(&[
                    &["Week 1", "Intro", "", "text", "t1"],
                    &["Week 1", "Intro", "Welcome", "quiz", "t2"],
                    &["", "", "", "", ""],
                    &["Week 1", "Intro", "Welcome", "TEXT", "t3"],
                ]),
                table(
                    "Text Blocks",
                    &["block_id", "title", "content"],
                    &[&["t3", "Hello", "<p>Hi</p>"]],
                ),
            ],
        };
        let decoded = decode_workbook(&workbook);

        assert_eq!(decoded.course.structure.len(), 1);
        assert_eq!(decoded.course.structure[0].block_id, "t3");
        assert_eq!(
            decoded.errors,
            vec![
                "Structure row 2: missing vertical".to_string(),
                "Structure row 3: unknown block_type 'quiz' (expected text, video, problem or openresponse)"
                    .to_string(),
            ]
        );
    }

    #[test]
    fn problem_correct_letters_mark_choices() {
        let workbook = WorkbookData {
            tables: vec![
                course_info(),
                structure(&[&["W", "S", "V", "problem", "p1"]]),
                table(
                    "Problems",
                    &PROBLEM_COLUMNS,
                    &[&[
                        "p1", "Pick", "Which?", "a", "b", "c", "d", "e", "f", "B,D", "", "nope",
                        "", "", "", "", "Because", "finished",
                    ]],
                ),
            ],
        };
        let decoded = decode_workbook(&workbook);
        assert!(decoded.is_valid(), "{:?}", decoded.errors);

        let problem = decoded.course.problems.get("p1").expect("problem decoded");
        let correct: Vec<bool> = problem.choices.iter().map(|c| c.correct).collect();
        assert_eq!(correct, vec![false, true, false, true, false, false]);
        assert_eq!(problem.choices[1].hint, "nope");
        assert_eq!(problem.show_answer, "finished");
    }

    #[test]
    fn problem_without_enough_choices_or_answer_is_rejected() {
        let workbook = WorkbookData {
            tables: vec![
                course_info(),
                structure(&[]),
                table(
                    "Problems",
                    &PROBLEM_COLUMNS,
                    &[&[
                        "p1", "Pick", "Which?", "only", "", "", "", "", "", "", "", "", "", "",
                        "", "", "", "",
                    ]],
                ),
            ],
        };
        let decoded = decode_workbook(&workbook);
        assert_eq!(decoded.errors.len(), 2);
        assert!(decoded.course.problems.is_empty());
    }

    #[test]
    fn open_response_criteria_stop_at_first_gap() {
        let workbook = WorkbookData {
            tables: vec![
                course_info(),
                structure(&[&["W", "S", "V", "openresponse", "o1"]]),
                table(
                    "Open Response",
                    &[
                        "block_id",
                        "title",
                        "prompt",
                        "criterion_1_name",
                        "criterion_1_options",
                        "criterion_2_name",
                        "criterion_2_options",
                        "criterion_3_name",
                        "criterion_3_options",
                        "assessment_type",
                    ],
                    &[&[
                        "o1",
                        "Essay",
                        "Write",
                        "Depth",
                        "Superficial=0;Adequate=1",
                        "",
                        "",
                        "Clarity",
                        "Poor=0",
                        "Peer",
                    ]],
                ),
            ],
        };
        let decoded = decode_workbook(&workbook);
        assert!(decoded.is_valid(), "{:?}", decoded.errors);

        let block = decoded.course.open_responses.get("o1").expect("block decoded");
        assert_eq!(block.criteria.len(), 1);
        assert_eq!(
            block.criteria[0].options,
            vec![
                RubricOption {
                    label: "Superficial".into(),
                    points: 0
                },
                RubricOption {
                    label: "Adequate".into(),
                    points: 1
                },
            ]
        );
        assert_eq!(block.assessment_type, AssessmentType::PeerAssessment);
    }

    #[test]
    fn option_parsing_splits_on_last_equals() {
        let option = parse_option("a=b = 3").expect("parsed");
        assert_eq!(option.label, "a=b");
        assert_eq!(option.points, 3);
        assert!(parse_option("no points").is_none());
        assert!(parse_option("half=0.5").is_none());
    }
}
