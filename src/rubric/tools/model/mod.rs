use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Server-assigned identifier of a remote resource.
pub type ResourceId = u64;

/// A course as listed by `courses/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub assignments: Vec<ResourceId>,
}

/// The parent resource a rubric hangs off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: ResourceId,
    pub name: String,
    #[serde(default)]
    pub course: Option<ResourceId>,
    #[serde(default, alias = "categories")]
    pub rubric_categories: Vec<ResourceId>,
}

/// A rubric category as stored remotely, with caller-facing point values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: ResourceId,
    pub assignment: ResourceId,
    pub name: String,
    #[serde(default)]
    pub point_limit: Option<f64>,
    #[serde(default)]
    pub help_text: Option<String>,
    #[serde(default)]
    pub at_most_once: bool,
    #[serde(default)]
    pub sort_key: u64,
    #[serde(default, alias = "comments")]
    pub rubric_comments: Vec<ResourceId>,
}

/// A rubric comment as stored remotely, with caller-facing point values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: ResourceId,
    pub category: ResourceId,
    pub name: String,
    #[serde(default)]
    pub point_delta: f64,
    pub text: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub instruction_text: Option<String>,
    #[serde(default)]
    pub template_text_on: bool,
    #[serde(default)]
    pub sort_key: u64,
}

/// A student submission; only its file references are read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: ResourceId,
    #[serde(default)]
    pub files: Vec<ResourceId>,
}

/// A submitted file and the grader comments left on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionFile {
    pub id: ResourceId,
    #[serde(default)]
    pub comments: Vec<ResourceId>,
}

/// A grader comment on a file. `feedback` is the student's vote: `1` up,
/// `-1` down, `0` none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedbackComment {
    pub id: ResourceId,
    #[serde(default)]
    pub rubric_comment: Option<ResourceId>,
    #[serde(default)]
    pub feedback: i64,
}

/// How often a rubric comment was applied and how students voted on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentUsage {
    pub instances: u64,
    pub upvotes: u64,
    pub downvotes: u64,
}

impl CommentUsage {
    pub fn record(&mut self, feedback: i64) {
        self.instances += 1;
        match feedback {
            1 => self.upvotes += 1,
            -1 => self.downvotes += 1,
            _ => {}
        }
    }

    /// Share of instances that were upvoted; `None` when never applied.
    pub fn upvote_share(&self) -> Option<f64> {
        self.share(self.upvotes)
    }

    /// Share of instances that were downvoted; `None` when never applied.
    pub fn downvote_share(&self) -> Option<f64> {
        self.share(self.downvotes)
    }

    fn share(&self, votes: u64) -> Option<f64> {
        (self.instances > 0).then(|| votes as f64 / self.instances as f64)
    }
}

/// Desired fields of a category. Fields left as `None` are not managed and
/// never show up in a diff; `Some(None)` asks for an explicit null.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryDraft {
    pub name: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub point_limit: Option<Option<f64>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub help_text: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_most_once: Option<bool>,
}

/// Desired fields of a comment; same `None` convention as [`CategoryDraft`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentDraft {
    pub name: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub point_delta: Option<f64>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub explanation: Option<Option<String>>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub instruction_text: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_text_on: Option<bool>,
}

/// One validated category of the desired rubric, with its comments in order.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredCategory {
    pub fields: CategoryDraft,
    pub comments: Vec<CommentDraft>,
}

impl DesiredCategory {
    pub fn name(&self) -> &str {
        &self.fields.name
    }
}

/// A category together with its comments, both ordered by sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct RubricCategory {
    pub category: Category,
    pub comments: Vec<Comment>,
}

/// Serialises a record into its field map. Records that do not serialise to
/// an object yield an empty map.
pub fn to_fields<T: Serialize>(record: &T) -> Map<String, Value> {
    match serde_json::to_value(record) {
        Ok(Value::Object(fields)) => fields,
        _ => Map::new(),
    }
}

/// Distinguishes an explicit `null` from an absent field.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
