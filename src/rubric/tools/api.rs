//! Typed accessors for rubric resources.
//!
//! Records leave through [`check_fields`] (which encodes point values) and
//! come back through [`codec::decode`], so callers only ever see
//! caller-facing point values.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::rubric::tools::batch::{BatchClient, Method, Transport};
use crate::rubric::tools::codec;
use crate::rubric::tools::error::{Result, ToolError};
use crate::rubric::tools::model::{
    Assignment, Category, Comment, CommentUsage, Course, FeedbackComment, ResourceId,
    RubricCategory, Submission, SubmissionFile,
};
use crate::rubric::tools::validate::{Mode, ResourceKind, check_fields};

pub const ASSIGNMENTS: &str = "assignments/";
pub const CATEGORIES: &str = "rubricCategories/";
pub const COMMENTS: &str = "rubricComments/";
pub const COURSES: &str = "courses/";
pub const FILES: &str = "files/";
pub const FILE_COMMENTS: &str = "comments/";

/// A rubric resource reachable through its own collection.
pub trait Resource: DeserializeOwned + Serialize {
    const KIND: ResourceKind;
    const COLLECTION: &'static str;

    fn id(&self) -> ResourceId;
    fn name(&self) -> &str;
    fn sort_key(&self) -> u64;
}

impl Resource for Category {
    const KIND: ResourceKind = ResourceKind::Category;
    const COLLECTION: &'static str = CATEGORIES;

    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sort_key(&self) -> u64 {
        self.sort_key
    }
}

impl Resource for Comment {
    const KIND: ResourceKind = ResourceKind::Comment;
    const COLLECTION: &'static str = COMMENTS;

    fn id(&self) -> ResourceId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sort_key(&self) -> u64 {
        self.sort_key
    }
}

/// Rubric operations on top of a [`BatchClient`].
#[derive(Debug, Clone)]
pub struct RubricApi<T> {
    batch: BatchClient<T>,
}

impl<T: Transport> RubricApi<T> {
    pub fn new(transport: T) -> Self {
        Self {
            batch: BatchClient::new(transport),
        }
    }

    pub fn batch(&self) -> &BatchClient<T> {
        &self.batch
    }

    /// Resolves an assignment by id. A 404 becomes [`ToolError::NotFound`].
    #[instrument(level = "debug", skip(self))]
    pub async fn assignment(&self, id: ResourceId) -> Result<Assignment> {
        let body = self
            .batch
            .send_one(Method::Get, &format!("{ASSIGNMENTS}{id}"), None)
            .await
            .map_err(|error| not_found_on_404(error, || format!("assignment {id}")))?;
        Ok(serde_json::from_value(body)?)
    }

    /// True when at least one submission exists for the assignment.
    #[instrument(level = "debug", skip(self))]
    pub async fn has_submissions(&self, assignment: ResourceId) -> Result<bool> {
        Ok(!self.submission_list(assignment).await?.is_empty())
    }

    /// Every submission of the assignment.
    pub async fn submissions(&self, assignment: ResourceId) -> Result<Vec<Submission>> {
        parse_all(self.submission_list(assignment).await?)
    }

    async fn submission_list(&self, assignment: ResourceId) -> Result<Vec<Value>> {
        let body = self
            .batch
            .send_one(Method::Get, &format!("{ASSIGNMENTS}{assignment}/submissions"), None)
            .await?;
        // Either a bare list or a page with `results`.
        Ok(match body {
            Value::Array(items) => items,
            Value::Object(mut page) => match page.remove("results") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        })
    }

    /// Counts, per rubric comment id, how often graders applied the comment
    /// across all submissions of the assignment and how students voted on it.
    /// Rubric comments that were never applied are absent from the map.
    #[instrument(level = "info", skip(self))]
    pub async fn comment_usage(
        &self,
        assignment: ResourceId,
    ) -> Result<HashMap<ResourceId, CommentUsage>> {
        let submissions = self.submissions(assignment).await?;
        let file_ids: Vec<Value> = submissions
            .iter()
            .flat_map(|submission| submission.files.iter())
            .map(|id| json!(id))
            .collect();
        let files: Vec<SubmissionFile> =
            parse_all(self.batch.send_batch(Method::Get, FILES, &file_ids).await?)?;

        let comment_ids: Vec<Value> = files
            .iter()
            .flat_map(|file| file.comments.iter())
            .map(|id| json!(id))
            .collect();
        let comments: Vec<FeedbackComment> =
            parse_all(self.batch.send_batch(Method::Get, FILE_COMMENTS, &comment_ids).await?)?;

        let mut usage: HashMap<ResourceId, CommentUsage> = HashMap::new();
        for comment in &comments {
            if let Some(rubric_comment) = comment.rubric_comment {
                usage.entry(rubric_comment).or_default().record(comment.feedback);
            }
        }
        debug!(
            submissions = submissions.len(),
            files = files.len(),
            comments = comments.len(),
            "counted rubric comment usage"
        );
        Ok(usage)
    }

    /// Finds an assignment by course name, course period, and assignment name.
    #[instrument(level = "info", skip(self))]
    pub async fn find_assignment(
        &self,
        course_name: &str,
        period: &str,
        assignment_name: &str,
    ) -> Result<Assignment> {
        let courses: Vec<Course> =
            serde_json::from_value(self.batch.send_one(Method::Get, COURSES, None).await?)?;
        let course = courses
            .into_iter()
            .find(|course| course.name == course_name && course.period == period)
            .ok_or_else(|| {
                ToolError::NotFound(format!("course \"{course_name}\" ({period})"))
            })?;

        let ids: Vec<Value> = course.assignments.iter().map(|id| json!(id)).collect();
        let assignments = self.batch.send_batch(Method::Get, ASSIGNMENTS, &ids).await?;
        for body in assignments {
            let assignment: Assignment = serde_json::from_value(body)?;
            if assignment.name == assignment_name {
                return Ok(assignment);
            }
        }
        Err(ToolError::NotFound(format!(
            "assignment \"{assignment_name}\" in course \"{course_name}\" ({period})"
        )))
    }

    /// Fetches every resource in `ids`, in the order given.
    pub async fn fetch<R: Resource>(&self, ids: &[ResourceId]) -> Result<Vec<R>> {
        let items: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
        let bodies = self.batch.send_batch(Method::Get, R::COLLECTION, &items).await?;
        decode_all(bodies)
    }

    /// Creates every record; the result is aligned with `records`.
    pub async fn create_all<R: Resource>(&self, records: &[Map<String, Value>]) -> Result<Vec<R>> {
        let items = records
            .iter()
            .map(|record| check_fields(R::KIND, record, Mode::Create).map(Value::Object))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let bodies = self.batch.send_batch(Method::Post, R::COLLECTION, &items).await?;
        debug!(kind = %R::KIND, created = bodies.len(), "created resources");
        decode_all(bodies)
    }

    /// Applies partial updates; the result is aligned with `updates`.
    pub async fn update_all<R: Resource>(
        &self,
        updates: &[(ResourceId, Map<String, Value>)],
    ) -> Result<Vec<R>> {
        let items = updates
            .iter()
            .map(|(id, data)| {
                check_fields(R::KIND, data, Mode::Update)
                    .map(|data| json!({"id": id, "data": Value::Object(data)}))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let bodies = self.batch.send_batch(Method::Patch, R::COLLECTION, &items).await?;
        debug!(kind = %R::KIND, updated = bodies.len(), "updated resources");
        decode_all(bodies)
    }

    pub async fn delete_all<R: Resource>(&self, ids: &[ResourceId]) -> Result<()> {
        let items: Vec<Value> = ids.iter().map(|id| json!(id)).collect();
        self.batch.send_batch(Method::Delete, R::COLLECTION, &items).await?;
        debug!(kind = %R::KIND, deleted = ids.len(), "deleted resources");
        Ok(())
    }

    pub async fn categories(&self, ids: &[ResourceId]) -> Result<Vec<Category>> {
        self.fetch(ids).await
    }

    pub async fn comments(&self, ids: &[ResourceId]) -> Result<Vec<Comment>> {
        self.fetch(ids).await
    }

    /// Current rubric of an assignment, categories and comments ordered by
    /// sort key.
    #[instrument(level = "info", skip(self))]
    pub async fn rubric(&self, assignment: ResourceId) -> Result<Vec<RubricCategory>> {
        let assignment = self.assignment(assignment).await?;
        let mut categories = self.categories(&assignment.rubric_categories).await?;
        sort_by_key(&mut categories);

        let comment_ids: Vec<ResourceId> = categories
            .iter()
            .flat_map(|category| category.rubric_comments.iter().copied())
            .collect();
        let mut comments = self.comments(&comment_ids).await?;
        sort_by_key(&mut comments);

        Ok(categories
            .into_iter()
            .map(|category| {
                let comments = comments
                    .iter()
                    .filter(|comment| comment.category == category.id)
                    .cloned()
                    .collect();
                RubricCategory { category, comments }
            })
            .collect())
    }
}

/// Orders resources by `(sortKey, id)`.
pub fn sort_by_key<R: Resource>(resources: &mut [R]) {
    resources.sort_by_key(|resource| (resource.sort_key(), resource.id()));
}

fn parse_all<T: DeserializeOwned>(bodies: Vec<Value>) -> Result<Vec<T>> {
    bodies
        .into_iter()
        .map(|body| serde_json::from_value(body).map_err(ToolError::from))
        .collect()
}

fn decode_all<R: Resource>(bodies: Vec<Value>) -> Result<Vec<R>> {
    bodies
        .into_iter()
        .map(|body| {
            let mut record = match body {
                Value::Object(record) => record,
                other => {
                    return Err(ToolError::Json(serde::de::Error::custom(format!(
                        "expected a {} object, got {other}",
                        R::KIND
                    ))));
                }
            };
            codec::decode(&mut record);
            Ok(serde_json::from_value(Value::Object(record))?)
        })
        .collect()
}

fn not_found_on_404(error: ToolError, what: impl FnOnce() -> String) -> ToolError {
    match error {
        ToolError::Request(ref request) if request.status() == Some(404) => {
            ToolError::NotFound(what())
        }
        _ => error,
    }
}
