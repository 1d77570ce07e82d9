//! Reconciliation of a remote rubric with a desired rubric.
//!
//! Categories and comments are matched by name, never by id. Desired order
//! always wins: the item at position `i` of its level gets `sortKey = i`, and
//! remote items missing from the desired state are either deleted or moved
//! behind the desired ones, keeping their previous relative order.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument, warn};

use crate::rubric::tools::api::{Resource, RubricApi, sort_by_key};
use crate::rubric::tools::batch::Transport;
use crate::rubric::tools::error::{OperationContext, Result, ToolError, ValidationError};
use crate::rubric::tools::model::{
    Assignment, Category, Comment, CommentUsage, DesiredCategory, ResourceId, RubricCategory,
    to_fields,
};
use crate::rubric::tools::validate::validate_desired;

/// How a synchronization treats the existing rubric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Delete everything and recreate the desired rubric from scratch.
    pub wipe: bool,
    /// Delete remote categories and comments that are not in the desired state
    /// instead of moving them to the end.
    pub delete_extra: bool,
}

/// Answer to a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    Cancel,
}

/// Asked before touching a rubric whose assignment already has submissions.
pub trait Confirm {
    fn confirm(&mut self, prompt: &str) -> Decision;
}

impl<F: FnMut(&str) -> Decision> Confirm for F {
    fn confirm(&mut self, prompt: &str) -> Decision {
        self(prompt)
    }
}

/// Answers every confirmation with [`Decision::Yes`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _prompt: &str) -> Decision {
        Decision::Yes
    }
}

/// Mutations applied at one level of the rubric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl Tally {
    pub fn is_empty(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} deleted",
            self.created, self.updated, self.deleted
        )
    }
}

/// What a synchronization changed remotely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub categories: Tally,
    pub comments: Tally,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.categories.is_empty() && self.comments.is_empty()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "categories: {}; comments: {}", self.categories, self.comments)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied(SyncReport),
    /// The confirmation was declined; nothing was changed.
    Declined,
}

/// Converges the rubric of `assignment_id` to `desired`.
///
/// `desired` is the raw category list (each with an ordered `comments` array)
/// as produced by an input adapter. It is validated in full before any
/// request is made. A failure after any item reached the remote, including
/// items of the batch that failed, is reported as [`ToolError::PartialSync`];
/// nothing is rolled back.
#[instrument(
    level = "info",
    skip_all,
    fields(assignment = assignment_id, wipe = options.wipe, delete_extra = options.delete_extra)
)]
pub async fn synchronize<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
    desired: &[Value],
    options: SyncOptions,
    confirm: &mut dyn Confirm,
) -> Result<SyncOutcome> {
    run(api, assignment_id, desired, options, confirm)
        .await
        .during("synchronize")
}

async fn run<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
    desired: &[Value],
    options: SyncOptions,
    confirm: &mut dyn Confirm,
) -> Result<SyncOutcome> {
    if assignment_id == 0 {
        let issue = ValidationError::single("assignment", "id", "must be a positive integer");
        return Err(issue.into());
    }
    let desired = validate_desired(desired)?;
    info!(
        category_count = desired.len(),
        comment_count = desired.iter().map(|category| category.comments.len()).sum::<usize>(),
        "desired rubric validated"
    );

    let assignment = api.assignment(assignment_id).await?;
    if api.has_submissions(assignment.id).await? {
        warn!(assignment = %assignment.name, "assignment has existing submissions");
        let prompt = format!(
            "Assignment \"{}\" already has submissions. Update its rubric anyway?",
            assignment.name
        );
        match confirm.confirm(&prompt) {
            Decision::Yes => warn!("updating rubric despite existing submissions"),
            Decision::No | Decision::Cancel => {
                info!("rubric update declined");
                return Ok(SyncOutcome::Declined);
            }
        }
    }

    let mut report = SyncReport::default();
    let result = if options.wipe {
        wipe(api, &assignment, &desired, &mut report).await
    } else {
        reconcile(api, &assignment, &desired, options, &mut report).await
    };

    match result {
        Ok(()) => {
            info!(%report, "rubric synchronized");
            Ok(SyncOutcome::Applied(report))
        }
        Err(error) if report.is_empty() => Err(error),
        Err(error) => {
            warn!(%report, "synchronization aborted after partial changes");
            Err(ToolError::PartialSync {
                applied: report,
                source: Box::new(error.within("synchronize")),
            })
        }
    }
}

/// Deletes every category (comments go with them) and recreates the rubric.
async fn wipe<T: Transport>(
    api: &RubricApi<T>,
    assignment: &Assignment,
    desired: &[DesiredCategory],
    report: &mut SyncReport,
) -> Result<()> {
    debug!(existing = assignment.rubric_categories.len(), "deleting existing rubric");
    api.delete_all::<Category>(&assignment.rubric_categories)
        .await
        .inspect_err(|error| report.categories.deleted += error.committed())?;
    report.categories.deleted += assignment.rubric_categories.len();

    let records: Vec<Map<String, Value>> = desired
        .iter()
        .enumerate()
        .map(|(position, category)| {
            let mut record = positioned(to_fields(&category.fields), position);
            record.insert("assignment".into(), json!(assignment.id));
            record
        })
        .collect();
    let created: Vec<Category> = api
        .create_all(&records)
        .await
        .inspect_err(|error| report.categories.created += error.committed())?;
    report.categories.created += created.len();

    let mut comment_records = Vec::new();
    for (category, created) in desired.iter().zip(&created) {
        for (position, comment) in category.comments.iter().enumerate() {
            let mut record = positioned(to_fields(comment), position);
            record.insert("category".into(), json!(created.id));
            comment_records.push(record);
        }
    }
    let comments: Vec<Comment> = api
        .create_all(&comment_records)
        .await
        .inspect_err(|error| report.comments.created += error.committed())?;
    report.comments.created += comments.len();
    Ok(())
}

/// Matching of one rubric level against its current remote items.
struct LevelPlan<'a, R> {
    /// Name and full record of every item that has to be created.
    creates: Vec<(String, Map<String, Value>)>,
    /// Changed fields of matched items.
    updates: Vec<(ResourceId, Map<String, Value>)>,
    /// Name to id of every matched item.
    ids: HashMap<String, ResourceId>,
    /// Unmatched remote items, in their current order.
    orphans: Vec<&'a R>,
}

/// Matches `desired` (name, record) pairs against `current`, which must be
/// sorted by sort key. When several remote items share a name the first one
/// is matched and the rest become orphans.
fn plan_level<'a, R: Resource>(
    desired: Vec<(String, Map<String, Value>)>,
    current: &'a [R],
) -> LevelPlan<'a, R> {
    let mut by_name: HashMap<&str, &R> = HashMap::new();
    for resource in current {
        by_name.entry(resource.name()).or_insert(resource);
    }

    let mut plan = LevelPlan {
        creates: Vec::new(),
        updates: Vec::new(),
        ids: HashMap::new(),
        orphans: Vec::new(),
    };
    let mut consumed = HashSet::new();
    for (name, record) in desired {
        match by_name.get(name.as_str()) {
            Some(existing) => {
                let changes = changed_fields(&record, &to_fields(*existing));
                if !changes.is_empty() {
                    plan.updates.push((existing.id(), changes));
                }
                consumed.insert(existing.id());
                plan.ids.insert(name, existing.id());
            }
            None => plan.creates.push((name, record)),
        }
    }
    plan.orphans = current
        .iter()
        .filter(|resource| !consumed.contains(&resource.id()))
        .collect();
    plan
}

/// Fields of `desired` whose value differs from `current`.
fn changed_fields(
    desired: &Map<String, Value>,
    current: &Map<String, Value>,
) -> Map<String, Value> {
    desired
        .iter()
        .filter(|(field, value)| current.get(field.as_str()) != Some(value))
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect()
}

fn positioned(mut record: Map<String, Value>, position: usize) -> Map<String, Value> {
    record.insert("sortKey".into(), json!(position));
    record
}

fn sort_key_only(sort_key: u64) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("sortKey".into(), json!(sort_key));
    record
}

/// Diff-based synchronization.
async fn reconcile<T: Transport>(
    api: &RubricApi<T>,
    assignment: &Assignment,
    desired: &[DesiredCategory],
    options: SyncOptions,
    report: &mut SyncReport,
) -> Result<()> {
    let mut categories = api.categories(&assignment.rubric_categories).await?;
    sort_by_key(&mut categories);
    let comment_ids: Vec<ResourceId> = categories
        .iter()
        .flat_map(|category| category.rubric_comments.iter().copied())
        .collect();
    let mut comments = api.comments(&comment_ids).await?;
    sort_by_key(&mut comments);
    debug!(
        categories = categories.len(),
        comments = comments.len(),
        "fetched current rubric"
    );

    // Categories.
    let plan = plan_level(
        desired
            .iter()
            .enumerate()
            .map(|(position, category)| {
                let record = positioned(to_fields(&category.fields), position);
                (category.name().to_string(), record)
            })
            .collect(),
        &categories,
    );
    let mut category_ids = plan.ids;
    let mut category_updates = plan.updates;

    let (names, mut records): (Vec<String>, Vec<Map<String, Value>>) =
        plan.creates.into_iter().unzip();
    for record in &mut records {
        record.insert("assignment".into(), json!(assignment.id));
    }
    let created: Vec<Category> = api
        .create_all(&records)
        .await
        .inspect_err(|error| report.categories.created += error.committed())?;
    report.categories.created += created.len();
    category_ids.extend(names.into_iter().zip(created.iter().map(|category| category.id)));

    let mut doomed_categories = HashSet::new();
    if options.delete_extra {
        doomed_categories.extend(plan.orphans.iter().map(|category| category.id));
    } else {
        for (next, orphan) in (desired.len() as u64..).zip(&plan.orphans) {
            if orphan.sort_key != next {
                category_updates.push((orphan.id, sort_key_only(next)));
            }
        }
    }

    let updated: Vec<Category> = api
        .update_all(&category_updates)
        .await
        .inspect_err(|error| report.categories.updated += error.committed())?;
    report.categories.updated += updated.len();
    for category in &updated {
        if let Some(id) = category_ids.get_mut(&category.name) {
            *id = category.id;
        }
    }

    // Comments.
    let mut desired_comments = Vec::new();
    let mut next_sort_key: HashMap<ResourceId, u64> = HashMap::new();
    for category in desired {
        let Some(&category_id) = category_ids.get(category.name()) else {
            return Err(ToolError::NotFound(format!(
                "no id resolved for category \"{}\"",
                category.name()
            )));
        };
        next_sort_key.insert(category_id, category.comments.len() as u64);
        for (position, comment) in category.comments.iter().enumerate() {
            let mut record = positioned(to_fields(comment), position);
            record.insert("category".into(), json!(category_id));
            desired_comments.push((comment.name.clone(), record));
        }
    }
    let plan = plan_level(desired_comments, &comments);
    let mut comment_updates = plan.updates;

    let records: Vec<Map<String, Value>> =
        plan.creates.into_iter().map(|(_, record)| record).collect();
    let created: Vec<Comment> = api
        .create_all(&records)
        .await
        .inspect_err(|error| report.comments.created += error.committed())?;
    report.comments.created += created.len();

    let mut doomed_comments = Vec::new();
    for orphan in &plan.orphans {
        if options.delete_extra {
            // Comments of deleted categories go with their category.
            if !doomed_categories.contains(&orphan.category) {
                doomed_comments.push(orphan.id);
            }
            continue;
        }
        let next = next_sort_key.entry(orphan.category).or_insert(0);
        if orphan.sort_key != *next {
            comment_updates.push((orphan.id, sort_key_only(*next)));
        }
        *next += 1;
    }

    let updated: Vec<Comment> = api
        .update_all(&comment_updates)
        .await
        .inspect_err(|error| report.comments.updated += error.committed())?;
    report.comments.updated += updated.len();

    if !doomed_comments.is_empty() {
        debug!(count = doomed_comments.len(), "deleting comments missing from the rubric");
        api.delete_all::<Comment>(&doomed_comments)
            .await
            .inspect_err(|error| report.comments.deleted += error.committed())?;
        report.comments.deleted += doomed_comments.len();
    }
    if !doomed_categories.is_empty() {
        let ids: Vec<ResourceId> = plan_order(&categories, &doomed_categories);
        debug!(count = ids.len(), "deleting categories missing from the desired rubric");
        api.delete_all::<Category>(&ids)
            .await
            .inspect_err(|error| report.categories.deleted += error.committed())?;
        report.categories.deleted += ids.len();
    }
    Ok(())
}

/// Ids of `resources` that are in `selected`, in the order of `resources`.
fn plan_order<R: Resource>(resources: &[R], selected: &HashSet<ResourceId>) -> Vec<ResourceId> {
    resources
        .iter()
        .map(Resource::id)
        .filter(|id| selected.contains(id))
        .collect()
}

/// Reads the current rubric back in the shape [`synchronize`] accepts, so an
/// export fed straight back in changes nothing.
#[instrument(level = "info", skip(api))]
pub async fn export_rubric<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
) -> Result<Vec<Value>> {
    export(api, assignment_id, false).await.during("export rubric")
}

/// Like [`export_rubric`], but every comment also carries a `usage` object
/// with its instance and vote counts across the assignment's submissions.
/// The extra field is ignored when the export is synchronized back.
#[instrument(level = "info", skip(api))]
pub async fn export_rubric_with_usage<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
) -> Result<Vec<Value>> {
    export(api, assignment_id, true).await.during("export rubric")
}

async fn export<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
    with_usage: bool,
) -> Result<Vec<Value>> {
    let rubric = api.rubric(assignment_id).await?;
    let usage = if with_usage {
        Some(api.comment_usage(assignment_id).await?)
    } else {
        None
    };
    info!(category_count = rubric.len(), with_usage, "exported rubric");
    Ok(rubric
        .iter()
        .map(|entry| desired_shape(entry, usage.as_ref()))
        .collect())
}

fn desired_shape(
    entry: &RubricCategory,
    usage: Option<&HashMap<ResourceId, CommentUsage>>,
) -> Value {
    let category = &entry.category;
    let comments: Vec<Value> = entry
        .comments
        .iter()
        .map(|comment| {
            let mut shape = json!({
                "name": comment.name,
                "text": comment.text,
                "pointDelta": comment.point_delta,
                "explanation": comment.explanation,
                "instructionText": comment.instruction_text,
                "templateTextOn": comment.template_text_on,
            });
            if let (Some(usage), Value::Object(fields)) = (usage, &mut shape) {
                let counts = usage.get(&comment.id).copied().unwrap_or_default();
                fields.insert("usage".into(), json!(counts));
            }
            shape
        })
        .collect();
    json!({
        "name": category.name,
        "pointLimit": category.point_limit,
        "helpText": category.help_text,
        "atMostOnce": category.at_most_once,
        "comments": comments,
    })
}

/// Renames comments of an assignment's rubric in one batch.
///
/// Unknown old names are skipped with a warning. A new name that would clash
/// with another comment fails validation before anything is changed. Returns
/// the number of renamed comments.
#[instrument(level = "info", skip(api, renames), fields(rename_count = renames.len()))]
pub async fn rename_comments<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
    renames: &[(String, String)],
) -> Result<usize> {
    apply_renames(api, assignment_id, renames)
        .await
        .during("rename comments")
}

async fn apply_renames<T: Transport>(
    api: &RubricApi<T>,
    assignment_id: ResourceId,
    renames: &[(String, String)],
) -> Result<usize> {
    let rubric = api.rubric(assignment_id).await?;
    let by_name: HashMap<&str, &Comment> = rubric
        .iter()
        .flat_map(|entry| entry.comments.iter())
        .map(|comment| (comment.name.as_str(), comment))
        .collect();

    let renamed_away: HashSet<&str> = renames
        .iter()
        .filter(|(old, new)| old != new && by_name.contains_key(old.as_str()))
        .map(|(old, _)| old.as_str())
        .collect();
    let mut taken: HashSet<&str> = by_name
        .keys()
        .copied()
        .filter(|name| !renamed_away.contains(name))
        .collect();

    let mut issues = ValidationError::default();
    let mut updates = Vec::new();
    for (index, (old, new)) in renames.iter().enumerate() {
        if old == new {
            continue;
        }
        let Some(comment) = by_name.get(old.as_str()) else {
            warn!(name = %old, "comment not in rubric; skipping rename");
            continue;
        };
        let path = format!("renames[{index}]");
        if new.trim().is_empty() {
            issues.push(path, "name", "must be a non-empty string");
            continue;
        }
        if !taken.insert(new.as_str()) {
            issues.push(path, "name", format!("\"{new}\" is already used by another comment"));
            continue;
        }
        debug!(id = comment.id, from = %old, to = %new, "renaming comment");
        let mut data = Map::new();
        data.insert("name".into(), json!(new));
        updates.push((comment.id, data));
    }
    issues.into_result()?;

    let updated: Vec<Comment> = api.update_all(&updates).await?;
    info!(renamed = updated.len(), "renamed rubric comments");
    Ok(updated.len())
}
