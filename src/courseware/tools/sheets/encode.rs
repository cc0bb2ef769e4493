use crate::courseware::tools::model::CourseData;
use crate::courseware::tools::sheets::{
    CHOICE_LETTERS, COURSE_INFO_SHEET, OPEN_RESPONSE_SHEET, PROBLEM_SHEET, STRUCTURE_COLUMNS,
    STRUCTURE_SHEET, SheetTable, TEXT_COLUMNS, TEXT_SHEET, VIDEO_COLUMNS, VIDEO_SHEET,
    WorkbookData, fields,
};

/// Serialises a course into the six-sheet workbook layout read by
/// [`decode_workbook`](super::decode_workbook).
pub fn encode_workbook(course: &CourseData) -> WorkbookData {
    WorkbookData {
        tables: vec![
            course_info_table(course),
            structure_table(course),
            text_table(course),
            video_table(course),
            problem_table(course),
            open_response_table(course),
        ],
    }
}

fn columns(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn course_info_table(course: &CourseData) -> SheetTable {
    let info = &course.info;
    let mut table = SheetTable::new(COURSE_INFO_SHEET, columns(&["Field", "Value"]));
    let entries = [
        (fields::COURSE_NAME, info.course_name.clone()),
        (fields::ORGANIZATION, info.organization.clone()),
        (fields::COURSE_ID, info.course_id.clone()),
        (fields::RUN, info.run.clone()),
        (fields::LANGUAGE, info.language.clone()),
        (fields::START_DATE, info.start_date.clone()),
        (fields::END_DATE, info.end_date.clone()),
        (fields::SELF_PACED, info.self_paced.to_string()),
    ];
    table.rows = entries
        .into_iter()
        .map(|(field, value)| vec![field.to_string(), value])
        .collect();
    table
}

fn structure_table(course: &CourseData) -> SheetTable {
    let mut table = SheetTable::new(STRUCTURE_SHEET, columns(&STRUCTURE_COLUMNS));
    table.rows = course
        .structure
        .iter()
        .map(|row| {
            vec![
                row.chapter.clone(),
                row.sequential.clone(),
                row.vertical.clone(),
                row.block_type.to_string(),
                row.block_id.clone(),
            ]
        })
        .collect();
    table
}

fn text_table(course: &CourseData) -> SheetTable {
    let mut table = SheetTable::new(TEXT_SHEET, columns(&TEXT_COLUMNS));
    table.rows = course
        .texts
        .iter()
        .map(|block| vec![block.block_id.clone(), block.title.clone(), block.content.clone()])
        .collect();
    table
}

fn video_table(course: &CourseData) -> SheetTable {
    let mut table = SheetTable::new(VIDEO_SHEET, columns(&VIDEO_COLUMNS));
    table.rows = course
        .videos
        .iter()
        .map(|block| {
            vec![
                block.block_id.clone(),
                block.title.clone(),
                block.youtube_id.clone(),
                block.html5_url.clone(),
                block.start_time.clone(),
                block.end_time.clone(),
            ]
        })
        .collect();
    table
}

fn problem_table(course: &CourseData) -> SheetTable {
    let mut header = columns(&["block_id", "title", "question_text"]);
    header.extend(CHOICE_LETTERS.iter().map(|letter| format!("choice_{letter}")));
    header.push("correct".to_string());
    header.extend(CHOICE_LETTERS.iter().map(|letter| format!("hint_{letter}")));
    header.push("explanation".to_string());
    header.push("show_answer".to_string());

    let mut table = SheetTable::new(PROBLEM_SHEET, header);
    for block in &course.problems {
        let mut row = vec![
            block.block_id.clone(),
            block.title.clone(),
            block.question_text.clone(),
        ];
        let mut correct = Vec::new();
        let mut hints = Vec::with_capacity(CHOICE_LETTERS.len());
        for (idx, letter) in CHOICE_LETTERS.iter().enumerate() {
            match block.choices.get(idx) {
                Some(choice) => {
                    row.push(choice.text.clone());
                    hints.push(choice.hint.clone());
                    if choice.correct {
                        correct.push(letter.to_ascii_uppercase().to_string());
                    }
                }
                None => {
                    row.push(String::new());
                    hints.push(String::new());
                }
            }
        }
        row.push(correct.join(","));
        row.extend(hints);
        row.push(block.explanation.clone());
        row.push(block.show_answer.clone());
        table.rows.push(row);
    }
    table
}

fn open_response_table(course: &CourseData) -> SheetTable {
    let criterion_slots = course
        .open_responses
        .iter()
        .map(|block| block.criteria.len())
        .max()
        .unwrap_or(0)
        .max(1);

    let mut header = columns(&["block_id", "title", "prompt"]);
    for number in 1..=criterion_slots {
        header.push(format!("criterion_{number}_name"));
        header.push(format!("criterion_{number}_options"));
    }
    header.push("assessment_type".to_string());

    let mut table = SheetTable::new(OPEN_RESPONSE_SHEET, header);
    for block in &course.open_responses {
        let mut row = vec![
            block.block_id.clone(),
            block.title.clone(),
            block.prompt.clone(),
        ];
        for idx in 0..criterion_slots {
            match block.criteria.get(idx) {
                Some(criterion) => {
                    let options: Vec<String> = criterion
                        .options
                        .iter()
                        .map(|option| format!("{}={}", option.label, option.points))
                        .collect();
                    row.push(criterion.name.clone());
                    row.push(options.join(";"));
                }
                None => {
                    row.push(String::new());
                    row.push(String::new());
                }
            }
        }
        row.push(block.assessment_type.as_str().to_string());
        table.rows.push(row);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::courseware::tools::model::{
        AssessmentType, BlockType, Choice, Criterion, OpenResponseBlock, ProblemBlock,
        RubricOption, StructureRow, TextBlock,
    };
    use crate::courseware::tools::sheets::decode_workbook;

    fn sample_course() -> CourseData {
        let mut course = CourseData::default();
        course.info.course_name = "Intro".into();
        course.info.organization = "Org".into();
        course.info.course_id = "C1".into();
        course.info.run = "R1".into();
        course.structure = vec![
            StructureRow {
                chapter: "W1".into(),
                sequential: "S1".into(),
                vertical: "V1".into(),
                block_type: BlockType::Problem,
                block_id: "p1".into(),
            },
            StructureRow {
                chapter: "W1".into(),
                sequential: "S1".into(),
                vertical: "V1".into(),
                block_type: BlockType::OpenResponse,
                block_id: "o1".into(),
            },
            StructureRow {
                chapter: "W1".into(),
                sequential: "S1".into(),
                vertical: "V2".into(),
                block_type: BlockType::OpenResponse,
                block_id: "o2".into(),
            },
            StructureRow {
                chapter: "W1".into(),
                sequential: "S1".into(),
                vertical: "V2".into(),
                block_type: BlockType::Text,
                block_id: "t1".into(),
            },
        ];
        course.texts.insert(TextBlock {
            block_id: "t1".into(),
            title: "Welcome".into(),
            content: "<p>Hello</p>".into(),
        });
        course.problems.insert(ProblemBlock {
            block_id: "p1".into(),
            title: "Quiz".into(),
            question_text: "2+2?".into(),
            choices: vec![
                Choice {
                    text: "3".into(),
                    correct: false,
                    hint: "too low".into(),
                },
                Choice {
                    text: "4".into(),
                    correct: true,
                    hint: String::new(),
                },
                Choice {
                    text: "four".into(),
                    correct: true,
                    hint: String::new(),
                },
            ],
            explanation: "Arithmetic".into(),
            show_answer: "always".into(),
        });
        course.open_responses.insert(OpenResponseBlock {
            block_id: "o1".into(),
            title: "Essay".into(),
            prompt: "Discuss".into(),
            criteria: vec![
                Criterion {
                    name: "Depth".into(),
                    options: vec![
                        RubricOption {
                            label: "Superficial".into(),
                            points: 0,
                        },
                        RubricOption {
                            label: "Adequate".into(),
                            points: 1,
                        },
                    ],
                },
                Criterion {
                    name: "Clarity".into(),
                    options: vec![RubricOption {
                        label: "Clear".into(),
                        points: 2,
                    }],
                },
            ],
            assessment_type: AssessmentType::StaffAssessment,
        });
        course.open_responses.insert(OpenResponseBlock {
            block_id: "o2".into(),
            title: "Short".into(),
            prompt: "Reflect".into(),
            criteria: vec![Criterion {
                name: "Effort".into(),
                options: vec![RubricOption {
                    label: "Some".into(),
                    points: 1,
                }],
            }],
            assessment_type: AssessmentType::SelfAssessment,
        });
        course
    }

    #[test]
    fn problems_sheet_always_has_six_choice_slots() {
        let workbook = encode_workbook(&sample_course());
        let problems = workbook.sheet(PROBLEM_SHEET).expect("problems sheet");

        assert_eq!(problems.columns.len(), 18);
        let row = &problems.rows[0];
        assert_eq!(row[3..9], ["3", "4", "four", "", "", ""]);
        assert_eq!(row[9], "B,C");
        assert_eq!(row[10], "too low");
    }

    #[test]
    fn open_response_columns_follow_widest_block() {
        let workbook = encode_workbook(&sample_course());
        let sheet = workbook.sheet(OPEN_RESPONSE_SHEET).expect("open response sheet");

        assert_eq!(sheet.columns.len(), 3 + 2 * 2 + 1);
        assert_eq!(sheet.rows[0][4], "Superficial=0;Adequate=1");
        assert_eq!(sheet.rows[0][7], "staff");
        assert_eq!(sheet.rows[1][5], "");
    }

    #[test]
    fn empty_course_still_gets_one_criterion_pair() {
        let workbook = encode_workbook(&CourseData::default());
        let sheet = workbook.sheet(OPEN_RESPONSE_SHEET).expect("open response sheet");
        assert_eq!(
            sheet.columns,
            vec![
                "block_id",
                "title",
                "prompt",
                "criterion_1_name",
                "criterion_1_options",
                "assessment_type"
            ]
        );
    }

    #[test]
    fn encoded_workbook_decodes_to_same_course() {
        let course = sample_course();
        let decoded = decode_workbook(&encode_workbook(&course));

        assert!(decoded.is_valid(), "{:?}", decoded.errors);
        assert_eq!(decoded.course, course);
    }
}
