//! Field rules for rubric resources.
//!
//! Each resource kind declares required and optional fields, each paired
//! with a predicate. [`check_fields`] applies them for a given [`Mode`] and
//! returns the record restricted to the checked fields.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use crate::rubric::tools::codec;
use crate::rubric::tools::error::ValidationError;
use crate::rubric::tools::model::{CategoryDraft, CommentDraft, DesiredCategory};

/// The two rubric resource kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Category,
    Comment,
}

/// Which rule set [`check_fields`] applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Every required field must be present and valid.
    Create,
    /// Required fields become optional; whatever is present is still checked.
    Update,
    /// Create rules without the parent reference, for records that are not
    /// anchored to a parent yet.
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Numeric,
    NumericOrNull,
    Integer,
    NonNegative,
    NonEmptyString,
    Boolean,
    Any,
}

impl Rule {
    fn check(self, value: &Value) -> Result<(), &'static str> {
        let valid = match self {
            Rule::Numeric => value.is_number(),
            Rule::NumericOrNull => value.is_number() || value.is_null(),
            Rule::Integer => value.is_i64() || value.is_u64(),
            Rule::NonNegative => value.is_u64(),
            Rule::NonEmptyString => value.as_str().is_some_and(|text| !text.trim().is_empty()),
            Rule::Boolean => value.is_boolean(),
            Rule::Any => true,
        };
        if valid { Ok(()) } else { Err(self.expectation()) }
    }

    fn expectation(self) -> &'static str {
        match self {
            Rule::Numeric => "must be a number",
            Rule::NumericOrNull => "must be a number or null",
            Rule::Integer => "must be an integer",
            Rule::NonNegative => "must be a non-negative integer",
            Rule::NonEmptyString => "must be a non-empty string",
            Rule::Boolean => "must be a boolean",
            Rule::Any => "",
        }
    }
}

type FieldRules = &'static [(&'static str, Rule)];

const CATEGORY_REQUIRED: FieldRules = &[
    ("assignment", Rule::Integer),
    ("name", Rule::NonEmptyString),
];
const CATEGORY_OPTIONAL: FieldRules = &[
    ("pointLimit", Rule::NumericOrNull),
    ("helpText", Rule::Any),
    ("atMostOnce", Rule::Boolean),
    ("sortKey", Rule::NonNegative),
];
const COMMENT_REQUIRED: FieldRules = &[
    ("category", Rule::Integer),
    ("name", Rule::NonEmptyString),
    ("text", Rule::NonEmptyString),
];
const COMMENT_OPTIONAL: FieldRules = &[
    ("pointDelta", Rule::Numeric),
    ("explanation", Rule::Any),
    ("instructionText", Rule::Any),
    ("templateTextOn", Rule::Boolean),
    ("sortKey", Rule::NonNegative),
];

impl ResourceKind {
    fn required(self) -> FieldRules {
        match self {
            ResourceKind::Category => CATEGORY_REQUIRED,
            ResourceKind::Comment => COMMENT_REQUIRED,
        }
    }

    fn optional(self) -> FieldRules {
        match self {
            ResourceKind::Category => CATEGORY_OPTIONAL,
            ResourceKind::Comment => COMMENT_OPTIONAL,
        }
    }

    /// Field pointing at the parent resource.
    pub fn parent_field(self) -> &'static str {
        match self {
            ResourceKind::Category => "assignment",
            ResourceKind::Comment => "category",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ResourceKind::Category => "rubric category",
            ResourceKind::Comment => "rubric comment",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Checks `record` against the rules of `kind` and returns only the checked
/// fields. Unknown fields are dropped. In `Create` and `Update` mode the
/// point fields are encoded for the wire once validation passes.
pub fn check_fields(
    kind: ResourceKind,
    record: &Map<String, Value>,
    mode: Mode,
) -> Result<Map<String, Value>, ValidationError> {
    let mut issues = ValidationError::default();
    let mut cleaned = Map::new();

    for &(field, rule) in kind.required() {
        if mode == Mode::Partial && field == kind.parent_field() {
            continue;
        }
        match record.get(field) {
            Some(value) => accept(kind, field, rule, value, &mut cleaned, &mut issues),
            None if mode == Mode::Update => {}
            None => issues.push(kind.label(), field, "is required"),
        }
    }
    for &(field, rule) in kind.optional() {
        if let Some(value) = record.get(field) {
            accept(kind, field, rule, value, &mut cleaned, &mut issues);
        }
    }

    issues.into_result()?;
    if mode != Mode::Partial {
        codec::encode(&mut cleaned);
    }
    Ok(cleaned)
}

fn accept(
    kind: ResourceKind,
    field: &str,
    rule: Rule,
    value: &Value,
    cleaned: &mut Map<String, Value>,
    issues: &mut ValidationError,
) {
    match rule.check(value) {
        Ok(()) => {
            cleaned.insert(field.to_string(), value.clone());
        }
        Err(reason) => issues.push(kind.label(), field, reason),
    }
}

/// Structural check of a whole desired-state submission.
///
/// Every category and comment must pass the `Partial` rules, category names
/// must be unique, and comment names must be unique across all categories.
/// All problems are collected before failing.
pub fn validate_desired(raw: &[Value]) -> Result<Vec<DesiredCategory>, ValidationError> {
    let mut issues = ValidationError::default();
    let mut desired = Vec::with_capacity(raw.len());
    let mut category_names: HashMap<String, usize> = HashMap::new();
    let mut comment_names: HashMap<String, String> = HashMap::new();

    for (index, entry) in raw.iter().enumerate() {
        let path = format!("categories[{index}]");
        let Some(record) = entry.as_object() else {
            issues.push(&path, "", "must be an object");
            continue;
        };

        let category =
            checked_draft::<CategoryDraft>(ResourceKind::Category, record, &path, &mut issues);
        if let Some(draft) = &category {
            if let Some(first) = category_names.get(&draft.name) {
                issues.push(
                    &path,
                    "name",
                    format!(
                        "duplicate category name \"{}\" (first used at categories[{first}])",
                        draft.name
                    ),
                );
            } else {
                category_names.insert(draft.name.clone(), index);
            }
        }

        let raw_comments = match record.get("comments") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                issues.push(&path, "comments", "must be an array");
                &[][..]
            }
        };

        let mut comments = Vec::with_capacity(raw_comments.len());
        for (position, entry) in raw_comments.iter().enumerate() {
            let comment_path = format!("{path}.comments[{position}]");
            let Some(record) = entry.as_object() else {
                issues.push(&comment_path, "", "must be an object");
                continue;
            };
            let Some(draft) = checked_draft::<CommentDraft>(
                ResourceKind::Comment,
                record,
                &comment_path,
                &mut issues,
            ) else {
                continue;
            };
            if let Some(first) = comment_names.get(&draft.name) {
                issues.push(
                    &comment_path,
                    "name",
                    format!(
                        "duplicate comment name \"{}\" (first used at {first})",
                        draft.name
                    ),
                );
            } else {
                comment_names.insert(draft.name.clone(), comment_path.clone());
            }
            comments.push(draft);
        }

        if let Some(fields) = category {
            desired.push(DesiredCategory { fields, comments });
        }
    }

    issues.into_result()?;
    Ok(desired)
}

fn checked_draft<T: serde::de::DeserializeOwned>(
    kind: ResourceKind,
    record: &Map<String, Value>,
    path: &str,
    issues: &mut ValidationError,
) -> Option<T> {
    match check_fields(kind, record, Mode::Partial) {
        Ok(cleaned) => match serde_json::from_value::<T>(Value::Object(cleaned)) {
            Ok(draft) => Some(draft),
            Err(error) => {
                issues.push(path, "", error.to_string());
                None
            }
        },
        Err(found) => {
            issues.absorb(path, found);
            None
        }
    }
}
