use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::{info, instrument};

use crate::rubric::tools::error::{Result, ToolError};

/// Reads a desired rubric from JSON. Accepts either a bare array of
/// categories or an object with a `categories` array.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn read_rubric(path: &Path) -> Result<Vec<Value>> {
    let source = fs::read_to_string(path)?;
    let document: Value = serde_json::from_str(&source)?;
    let categories = match document {
        Value::Array(categories) => categories,
        Value::Object(mut fields) => match fields.remove("categories") {
            Some(Value::Array(categories)) => categories,
            _ => {
                return Err(ToolError::Json(serde::de::Error::custom(
                    "expected a \"categories\" array",
                )));
            }
        },
        _ => {
            return Err(ToolError::Json(serde::de::Error::custom(
                "expected an array of categories",
            )));
        }
    };
    info!(category_count = categories.len(), "read rubric from JSON");
    Ok(categories)
}

/// Writes an exported rubric as pretty-printed JSON.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub fn write_rubric(path: &Path, rubric: &[Value]) -> Result<()> {
    let json_string = serde_json::to_string_pretty(&serde_json::json!({ "categories": rubric }))?;
    fs::write(path, json_string)?;
    Ok(())
}
