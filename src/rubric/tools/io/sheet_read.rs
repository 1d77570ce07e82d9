use std::collections::HashMap;
use std::path::Path;

use calamine::{DataType, Range, Reader, Xlsx, open_workbook};
use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::rubric::tools::error::{Result, ToolError};
use crate::rubric::tools::io::headers;

/// Answers in the template column that turn template text on.
const TEMPLATE_YES: [&str; 3] = ["x", "y", "yes"];

/// Reads a rubric worksheet into the raw desired-state shape consumed by
/// [`synchronize`](crate::sync::synchronize): an ordered list of categories,
/// each carrying its ordered `comments`.
///
/// Rows without a category or a name are separators and are skipped. With
/// `lenient` set, rows whose cells cannot be interpreted are dropped with a
/// warning instead of failing the whole sheet.
#[instrument(level = "info", skip_all, fields(path = %path.display(), sheet = ?sheet, lenient))]
pub fn read_rubric(path: &Path, sheet: Option<&str>, lenient: bool) -> Result<Vec<Value>> {
    let range = open_sheet(path, sheet)?;
    let columns = header_columns(&range)?;
    for required in [headers::CATEGORY, headers::NAME, headers::CAPTION] {
        if !columns.contains_key(required) {
            return Err(ToolError::InvalidWorkbook(format!(
                "missing column '{required}'"
            )));
        }
    }

    let mut categories: Vec<(String, Map<String, Value>, Vec<Value>)> = Vec::new();
    let mut dropped = 0usize;
    for (offset, row) in range.rows().enumerate().skip(1) {
        let cell = |header: &str| -> String {
            columns
                .get(header)
                .and_then(|index| row.get(*index))
                .map(|cell| cell_to_string(Some(cell)))
                .unwrap_or_default()
        };

        let category_name = cell(headers::CATEGORY);
        let name = cell(headers::NAME);
        if category_name.is_empty() || name.is_empty() {
            continue;
        }

        let parsed = parse_row(&cell).and_then(|comment| {
            let max = parse_number(&cell(headers::MAX_POINTS), headers::MAX_POINTS)?;
            Ok((comment, max))
        });
        let (comment, max) = match parsed {
            Ok(parsed) => parsed,
            Err(error) if lenient => {
                warn!(row = offset + 1, %error, "dropping malformed row");
                dropped += 1;
                continue;
            }
            Err(ToolError::InvalidWorkbook(reason)) => {
                return Err(ToolError::InvalidWorkbook(format!(
                    "row {}: {reason}",
                    offset + 1
                )));
            }
            Err(error) => return Err(error),
        };

        match categories
            .iter_mut()
            .find(|(existing, _, _)| *existing == category_name)
        {
            Some((_, fields, comments)) => {
                let first = fields.get("pointLimit").and_then(Value::as_f64);
                if let Some(max) = max.filter(|max| first != Some(*max)) {
                    let earlier = match first {
                        Some(first) => first.to_string(),
                        None => "a blank value".to_string(),
                    };
                    let reason = format!(
                        "{} {max} for '{category_name}' conflicts with {earlier} on an earlier row",
                        headers::MAX_POINTS
                    );
                    if !lenient {
                        return Err(ToolError::InvalidWorkbook(format!(
                            "row {}: {reason}",
                            offset + 1
                        )));
                    }
                    warn!(row = offset + 1, %reason, "keeping the first category maximum");
                }
                comments.push(comment);
            }
            None => {
                let mut fields = Map::new();
                fields.insert("name".into(), json!(category_name));
                fields.insert("pointLimit".into(), max.map_or(Value::Null, |max| json!(max)));
                categories.push((category_name, fields, vec![comment]));
            }
        }
    }

    info!(category_count = categories.len(), dropped, "read rubric from workbook");
    Ok(categories
        .into_iter()
        .map(|(_, mut fields, comments)| {
            fields.insert("comments".into(), Value::Array(comments));
            Value::Object(fields)
        })
        .collect())
}

/// Reads `(old name, new name)` pairs from the `Name` and `New Name` columns.
/// Rows where either cell is blank are ignored.
#[instrument(level = "info", skip_all, fields(path = %path.display(), sheet = ?sheet))]
pub fn read_renames(path: &Path, sheet: Option<&str>) -> Result<Vec<(String, String)>> {
    let range = open_sheet(path, sheet)?;
    let columns = header_columns(&range)?;
    let (Some(&old_column), Some(&new_column)) =
        (columns.get(headers::NAME), columns.get(headers::NEW_NAME))
    else {
        return Err(ToolError::InvalidWorkbook(format!(
            "rename sheets need '{}' and '{}' columns",
            headers::NAME,
            headers::NEW_NAME
        )));
    };

    let renames: Vec<(String, String)> = range
        .rows()
        .skip(1)
        .map(|row| {
            (
                cell_to_string(row.get(old_column)),
                cell_to_string(row.get(new_column)),
            )
        })
        .filter(|(old, new)| !old.is_empty() && !new.is_empty())
        .collect();
    debug!(rename_count = renames.len(), "read renames from workbook");
    Ok(renames)
}

fn open_sheet(path: &Path, sheet: Option<&str>) -> Result<Range<DataType>> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ToolError::InvalidWorkbook("workbook has no sheets".into()))?,
    };
    read_required_sheet(&mut workbook, &name)
}

fn read_required_sheet<R: std::io::Read + std::io::Seek>(
    workbook: &mut Xlsx<R>,
    name: &str,
) -> Result<Range<DataType>> {
    let range_result = workbook
        .worksheet_range(name)
        .ok_or_else(|| ToolError::InvalidWorkbook(format!("missing sheet '{name}'")))?;
    let range = range_result.map_err(ToolError::from)?;
    Ok(range)
}

fn header_columns(range: &Range<DataType>) -> Result<HashMap<String, usize>> {
    let first_row = range
        .rows()
        .next()
        .ok_or_else(|| ToolError::InvalidWorkbook("sheet is empty".into()))?;
    Ok(first_row
        .iter()
        .enumerate()
        .map(|(index, cell)| (cell_to_string(Some(cell)), index))
        .filter(|(header, _)| !header.is_empty())
        .collect())
}

fn parse_row(cell: &dyn Fn(&str) -> String) -> Result<Value> {
    let caption = cell(headers::CAPTION);
    if caption.is_empty() {
        return Err(ToolError::InvalidWorkbook(format!(
            "'{}' is empty",
            headers::CAPTION
        )));
    }
    let tier = cell(headers::TIER);
    let text = if tier.is_empty() {
        caption
    } else {
        with_tier(&tier, &caption)
    };
    let points = parse_number(&cell(headers::POINTS), headers::POINTS)?.unwrap_or(0.0);
    let template = cell(headers::TEMPLATE).to_lowercase();

    Ok(json!({
        "name": cell(headers::NAME),
        "text": text,
        "pointDelta": points,
        "explanation": optional_text(cell(headers::EXPLANATION)),
        "instructionText": optional_text(cell(headers::INSTRUCTIONS)),
        "templateTextOn": TEMPLATE_YES.contains(&template.as_str()),
    }))
}

/// Prefixes comment text with its tier marker.
pub fn with_tier(tier: &str, text: &str) -> String {
    format!("\\[T{tier}\\] {text}")
}

/// Splits a tier marker off comment text, if present.
pub fn split_tier(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("\\[T") else {
        return (None, text);
    };
    match rest.split_once("\\] ") {
        Some((tier, body)) if !tier.is_empty() && tier.chars().all(|c| c.is_ascii_digit()) => {
            (Some(tier), body)
        }
        _ => (None, text),
    }
}

fn parse_number(raw: &str, column: &str) -> Result<Option<f64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed.parse::<f64>().map(Some).map_err(|_| {
        ToolError::InvalidWorkbook(format!("'{trimmed}' in column {column} is not a number"))
    })
}

fn optional_text(value: String) -> Value {
    if value.trim().is_empty() {
        Value::Null
    } else {
        Value::String(value)
    }
}

fn cell_to_string(cell: Option<&DataType>) -> String {
    match cell {
        Some(DataType::String(value)) => value.trim().to_string(),
        Some(DataType::Float(value)) => value.to_string(),
        Some(DataType::Int(value)) => value.to_string(),
        Some(DataType::Bool(value)) => value.to_string(),
        Some(DataType::Empty) | None => String::new(),
        Some(other) => other.to_string(),
    }
}
