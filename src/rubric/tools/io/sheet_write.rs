use std::path::Path;

use rust_xlsxwriter::{Format, Table, TableColumn, Workbook, Worksheet};
use serde_json::Value;

use crate::rubric::tools::error::{Result, ToolError};
use crate::rubric::tools::io::headers::{RUBRIC_COLUMNS, USAGE_COLUMNS};
use crate::rubric::tools::io::sheet_read::split_tier;
use crate::rubric::tools::model::CommentUsage;

/// Writes an exported rubric (the shape returned by
/// [`export_rubric`](crate::sync::export_rubric)) as a single worksheet that
/// [`read_rubric`](super::sheet_read::read_rubric) reads back unchanged.
///
/// When the comments carry `usage` counts
/// ([`export_rubric_with_usage`](crate::sync::export_rubric_with_usage)),
/// instance and vote columns are appended after the rubric columns.
pub fn write_rubric(path: &Path, sheet_name: &str, rubric: &[Value]) -> Result<()> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet_name)?;

    let with_usage = rubric
        .iter()
        .flat_map(comments_of)
        .any(|comment| comment.get("usage").is_some());
    let mut headers = RUBRIC_COLUMNS.to_vec();
    if with_usage {
        headers.extend(USAGE_COLUMNS);
    }

    let bold = Format::new().set_bold();
    let percent = Format::new().set_num_format("0.0%");
    for (col_idx, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col_idx as u16, *header, &bold)?;
    }

    let mut row_idx: u32 = 1;
    for category in rubric {
        let category_name = text_field(category, "name")?;
        for comment in comments_of(category) {
            write_comment_row(worksheet, row_idx, category_name, category, comment)?;
            if with_usage {
                write_usage(worksheet, row_idx, comment, &percent)?;
            }
            row_idx += 1;
        }
    }

    let last_row = row_idx.saturating_sub(1);
    let last_col = (headers.len() as u16).saturating_sub(1);
    if last_row > 0 {
        let columns: Vec<TableColumn> = headers
            .iter()
            .map(|header| TableColumn::new().set_header(*header))
            .collect();
        let mut table = Table::new();
        table.set_autofilter(true).set_columns(&columns);
        worksheet.add_table(0, 0, last_row, last_col, &table)?;
    }

    workbook.save(path)?;
    Ok(())
}

fn comments_of(category: &Value) -> &[Value] {
    category
        .get("comments")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn write_comment_row(
    worksheet: &mut Worksheet,
    row: u32,
    category_name: &str,
    category: &Value,
    comment: &Value,
) -> Result<()> {
    let (tier, text) = split_tier(text_field(comment, "text")?);

    worksheet.write_string(row, 0, category_name)?;
    if let Some(max) = category.get("pointLimit").and_then(Value::as_f64) {
        worksheet.write_number(row, 1, max)?;
    }
    worksheet.write_string(row, 2, text_field(comment, "name")?)?;
    if let Some(tier) = tier {
        worksheet.write_string(row, 3, tier)?;
    }
    let points = comment.get("pointDelta").and_then(Value::as_f64).unwrap_or(0.0);
    worksheet.write_number(row, 4, points)?;
    worksheet.write_string(row, 5, text)?;
    if let Some(explanation) = comment.get("explanation").and_then(Value::as_str) {
        worksheet.write_string(row, 6, explanation)?;
    }
    if let Some(instructions) = comment.get("instructionText").and_then(Value::as_str) {
        worksheet.write_string(row, 7, instructions)?;
    }
    if comment.get("templateTextOn").and_then(Value::as_bool) == Some(true) {
        worksheet.write_string(row, 8, "Yes")?;
    }
    Ok(())
}

/// Instance count, then vote counts and shares when the comment was applied.
fn write_usage(
    worksheet: &mut Worksheet,
    row: u32,
    comment: &Value,
    percent: &Format,
) -> Result<()> {
    let usage: CommentUsage = match comment.get("usage") {
        Some(raw) => serde_json::from_value(raw.clone())?,
        None => CommentUsage::default(),
    };
    let first = RUBRIC_COLUMNS.len() as u16;
    worksheet.write_number(row, first, usage.instances as f64)?;
    if let (Some(up), Some(down)) = (usage.upvote_share(), usage.downvote_share()) {
        worksheet.write_number(row, first + 1, usage.upvotes as f64)?;
        worksheet.write_number_with_format(row, first + 2, up, percent)?;
        worksheet.write_number(row, first + 3, usage.downvotes as f64)?;
        worksheet.write_number_with_format(row, first + 4, down, percent)?;
    }
    Ok(())
}

fn text_field<'a>(record: &'a Value, field: &str) -> Result<&'a str> {
    record
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidWorkbook(format!("exported record has no '{field}'")))
}
