use calamine::{DataType, Reader, Xlsx, open_workbook};
use rubric_tools::ToolError;
use rubric_tools::io::{self, sheet_read, sheet_write};
use rust_xlsxwriter::Workbook;
use serde_json::json;
use tempfile::tempdir;

fn exported() -> Vec<serde_json::Value> {
    json!([
        {
            "name": "Style",
            "pointLimit": 5.0,
            "helpText": null,
            "atMostOnce": false,
            "comments": [
                {
                    "name": "style-naming",
                    "text": "\\[T1\\] Use descriptive names",
                    "pointDelta": 1.0,
                    "explanation": "Names should say what a value means",
                    "instructionText": null,
                    "templateTextOn": true
                },
                {
                    "name": "style-indent",
                    "text": "Fix the indentation",
                    "pointDelta": 0.5,
                    "explanation": null,
                    "instructionText": "Check every nested block",
                    "templateTextOn": false
                }
            ]
        },
        {
            "name": "Tests",
            "pointLimit": null,
            "helpText": null,
            "atMostOnce": false,
            "comments": [
                {
                    "name": "tests-missing",
                    "text": "No tests were submitted",
                    "pointDelta": 2.0,
                    "explanation": null,
                    "instructionText": null,
                    "templateTextOn": false
                }
            ]
        }
    ])
    .as_array()
    .cloned()
    .expect("array")
}

/// Strips the fields a worksheet does not carry.
fn sheet_shape(rubric: &[serde_json::Value]) -> Vec<serde_json::Value> {
    rubric
        .iter()
        .map(|category| {
            let mut category = category.clone();
            if let Some(fields) = category.as_object_mut() {
                fields.remove("helpText");
                fields.remove("atMostOnce");
            }
            category
        })
        .collect()
}

#[test]
fn workbook_roundtrip_preserves_rubric() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("rubric.xlsx");

    sheet_write::write_rubric(&xlsx_path, "Rubric", &exported()).expect("Excel written");
    let restored = sheet_read::read_rubric(&xlsx_path, Some("Rubric"), false).expect("Excel read");

    assert_eq!(restored, sheet_shape(&exported()));
}

#[test]
fn json_roundtrip_preserves_rubric() {
    let temp_dir = tempdir().expect("temporary directory");
    let json_path = temp_dir.path().join("rubric.json");

    io::json::write_rubric(&json_path, &exported()).expect("JSON written");
    let restored = io::json::read_rubric(&json_path).expect("JSON read");

    assert_eq!(restored, exported());
}

#[test]
fn json_input_may_be_a_bare_array() {
    let temp_dir = tempdir().expect("temporary directory");
    let json_path = temp_dir.path().join("rubric.json");
    std::fs::write(&json_path, r#"[{"name": "Style", "comments": []}]"#).expect("JSON written");

    let restored = io::json::read_rubric(&json_path).expect("JSON read");

    assert_eq!(restored, vec![json!({"name": "Style", "comments": []})]);
}

fn write_sheet(path: &std::path::Path, rows: &[[&str; 9]]) {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let headers = [
        "Category",
        "Max",
        "Name",
        "Tier",
        "Points",
        "Grader Caption",
        "Explanation",
        "Instructions",
        "Template?",
    ];
    for (col, header) in headers.iter().enumerate() {
        worksheet
            .write_string(0, col as u16, *header)
            .expect("header written");
    }
    for (row, cells) in rows.iter().enumerate() {
        for (col, cell) in cells.iter().enumerate() {
            if !cell.is_empty() {
                worksheet
                    .write_string(row as u32 + 1, col as u16, *cell)
                    .expect("cell written");
            }
        }
    }
    workbook.save(path).expect("workbook saved");
}

#[test]
fn sheet_rows_fold_into_categories() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("input.xlsx");
    write_sheet(
        &xlsx_path,
        &[
            ["Style", "5", "style-naming", "2", "1", "Use descriptive names", "", "", "x"],
            ["", "", "", "", "", "", "", "", ""],
            ["Tests", "", "tests-missing", "", "", "No tests", "Add tests", "", ""],
            ["Style", "", "style-indent", "", "0.5", "Fix the indentation", "", "", "no"],
        ],
    );

    let rubric = sheet_read::read_rubric(&xlsx_path, None, false).expect("sheet read");

    assert_eq!(
        rubric,
        vec![
            json!({
                "name": "Style",
                "pointLimit": 5.0,
                "comments": [
                    {
                        "name": "style-naming",
                        "text": "\\[T2\\] Use descriptive names",
                        "pointDelta": 1.0,
                        "explanation": null,
                        "instructionText": null,
                        "templateTextOn": true
                    },
                    {
                        "name": "style-indent",
                        "text": "Fix the indentation",
                        "pointDelta": 0.5,
                        "explanation": null,
                        "instructionText": null,
                        "templateTextOn": false
                    }
                ]
            }),
            json!({
                "name": "Tests",
                "pointLimit": null,
                "comments": [
                    {
                        "name": "tests-missing",
                        "text": "No tests",
                        "pointDelta": 0.0,
                        "explanation": "Add tests",
                        "instructionText": null,
                        "templateTextOn": false
                    }
                ]
            }),
        ]
    );
}

#[test]
fn malformed_rows_fail_unless_lenient() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("input.xlsx");
    write_sheet(
        &xlsx_path,
        &[
            ["Style", "", "style-naming", "", "1", "Use descriptive names", "", "", ""],
            ["Style", "", "style-indent", "", "lots", "Fix the indentation", "", "", ""],
        ],
    );

    let error = sheet_read::read_rubric(&xlsx_path, None, false).expect_err("bad points");
    match error {
        ToolError::InvalidWorkbook(reason) => assert!(reason.starts_with("row 3:"), "{reason}"),
        other => panic!("unexpected error {other:?}"),
    }

    let rubric = sheet_read::read_rubric(&xlsx_path, None, true).expect("lenient read");
    assert_eq!(rubric.len(), 1);
    assert_eq!(rubric[0]["comments"].as_array().map(Vec::len), Some(1));
}

#[test]
fn missing_sheet_is_reported() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("input.xlsx");
    write_sheet(&xlsx_path, &[]);

    let error = sheet_read::read_rubric(&xlsx_path, Some("Nope"), false).expect_err("no sheet");

    assert!(matches!(error, ToolError::InvalidWorkbook(_)));
}

#[test]
fn rename_columns_are_paired() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("renames.xlsx");
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    for (row, [old, new]) in [["Name", "New Name"], ["a", "b"], ["c", ""], ["d", "e"]]
        .iter()
        .enumerate()
    {
        worksheet.write_string(row as u32, 0, *old).expect("cell written");
        if !new.is_empty() {
            worksheet.write_string(row as u32, 1, *new).expect("cell written");
        }
    }
    workbook.save(&xlsx_path).expect("workbook saved");

    let renames = sheet_read::read_renames(&xlsx_path, None).expect("renames read");

    assert_eq!(
        renames,
        vec![("a".to_string(), "b".to_string()), ("d".to_string(), "e".to_string())]
    );
}

#[test]
fn conflicting_category_maximum_fails_unless_lenient() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("input.xlsx");
    write_sheet(
        &xlsx_path,
        &[
            ["Style", "5", "style-naming", "", "1", "Use descriptive names", "", "", ""],
            ["Style", "5", "style-indent", "", "0.5", "Fix the indentation", "", "", ""],
            ["Style", "7", "style-length", "", "1", "Shorten long functions", "", "", ""],
        ],
    );

    let error = sheet_read::read_rubric(&xlsx_path, None, false).expect_err("conflicting max");
    match error {
        ToolError::InvalidWorkbook(reason) => {
            assert!(reason.starts_with("row 4:"), "{reason}");
            assert!(reason.contains("Max 7"), "{reason}");
        }
        other => panic!("unexpected error {other:?}"),
    }

    let rubric = sheet_read::read_rubric(&xlsx_path, None, true).expect("lenient read");
    assert_eq!(rubric[0]["pointLimit"].as_f64(), Some(5.0));
    assert_eq!(rubric[0]["comments"].as_array().map(Vec::len), Some(3));
}

#[test]
fn usage_columns_follow_the_rubric_columns() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("usage.xlsx");
    let mut rubric = exported();
    rubric[0]["comments"][0]["usage"] = json!({"instances": 4, "upvotes": 2, "downvotes": 1});
    rubric[0]["comments"][1]["usage"] = json!({"instances": 0, "upvotes": 0, "downvotes": 0});
    rubric[1]["comments"][0]["usage"] = json!({"instances": 1, "upvotes": 0, "downvotes": 1});

    sheet_write::write_rubric(&xlsx_path, "Rubric", &rubric).expect("Excel written");

    let restored = sheet_read::read_rubric(&xlsx_path, Some("Rubric"), false).expect("Excel read");
    assert_eq!(restored, sheet_shape(&exported()));

    let mut workbook: Xlsx<_> = open_workbook(&xlsx_path).expect("workbook opened");
    let range = workbook
        .worksheet_range("Rubric")
        .expect("sheet present")
        .expect("sheet read");
    let headers: Vec<String> = (9..14)
        .map(|col| range.get_value((0, col)).map(ToString::to_string).unwrap_or_default())
        .collect();
    assert_eq!(headers, io::headers::USAGE_COLUMNS);
    assert_eq!(range.get_value((1, 9)), Some(&DataType::Float(4.0)));
    assert_eq!(range.get_value((1, 10)), Some(&DataType::Float(2.0)));
    assert_eq!(range.get_value((1, 11)), Some(&DataType::Float(0.5)));
    assert_eq!(range.get_value((1, 13)), Some(&DataType::Float(0.25)));
    assert_eq!(range.get_value((2, 9)), Some(&DataType::Float(0.0)));
    assert!(matches!(range.get_value((2, 11)), None | Some(DataType::Empty)));
    assert_eq!(range.get_value((3, 13)), Some(&DataType::Float(1.0)));
}

#[test]
fn plain_export_has_no_usage_columns() {
    let temp_dir = tempdir().expect("temporary directory");
    let xlsx_path = temp_dir.path().join("rubric.xlsx");
    sheet_write::write_rubric(&xlsx_path, "Rubric", &exported()).expect("Excel written");

    let mut workbook: Xlsx<_> = open_workbook(&xlsx_path).expect("workbook opened");
    let range = workbook
        .worksheet_range("Rubric")
        .expect("sheet present")
        .expect("sheet read");

    assert_eq!(range.width(), io::headers::RUBRIC_COLUMNS.len());
}
