//! In-memory stand-in for the rubric API.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rubric_tools::Result;
use rubric_tools::batch::{ApiRequest, ApiResponse, Method, Transport};
use serde_json::{Map, Value, json};

#[derive(Default)]
struct State {
    next_id: u64,
    courses: Vec<Value>,
    assignments: BTreeMap<u64, String>,
    submissions: BTreeMap<u64, Vec<Value>>,
    files: BTreeMap<u64, Value>,
    feedback: BTreeMap<u64, Value>,
    categories: BTreeMap<u64, Map<String, Value>>,
    comments: BTreeMap<u64, Map<String, Value>>,
    log: Vec<ApiRequest>,
    failure: Option<Failure>,
}

struct Failure {
    method: Method,
    prefix: String,
    /// Only the nth matching request fails when set; otherwise all do.
    nth: Option<usize>,
    matched: usize,
}

impl Failure {
    fn hits(&mut self, request: &ApiRequest) -> bool {
        if self.method != request.method || !request.path.starts_with(self.prefix.as_str()) {
            return false;
        }
        self.matched += 1;
        self.nth.is_none_or(|nth| nth == self.matched)
    }
}

/// Stores records exactly as sent, so point values are kept in wire form.
pub struct FakeRemote {
    state: Mutex<State>,
}

impl FakeRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                next_id: 100,
                ..State::default()
            }),
        }
    }

    pub fn with_assignment(self, id: u64, name: &str) -> Self {
        self.state.lock().unwrap().assignments.insert(id, name.to_string());
        self
    }

    pub fn with_course(self, course: Value) -> Self {
        self.state.lock().unwrap().courses.push(course);
        self
    }

    /// Adds `count` submissions without files.
    pub fn set_submissions(&self, assignment: u64, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            let id = state.allocate();
            state
                .submissions
                .entry(assignment)
                .or_default()
                .push(json!({"id": id, "assignment": assignment, "files": []}));
        }
    }

    /// Adds a submission holding one file whose comments reference the given
    /// rubric comments with the given feedback votes.
    pub fn add_graded_submission(&self, assignment: u64, comments: &[(Option<u64>, i64)]) {
        let mut state = self.state.lock().unwrap();
        let mut comment_ids = Vec::new();
        for (rubric_comment, feedback) in comments {
            let id = state.allocate();
            state.feedback.insert(
                id,
                json!({"id": id, "rubricComment": rubric_comment, "feedback": feedback}),
            );
            comment_ids.push(id);
        }
        let file = state.allocate();
        state.files.insert(file, json!({"id": file, "comments": comment_ids}));
        let submission = state.allocate();
        state
            .submissions
            .entry(assignment)
            .or_default()
            .push(json!({"id": submission, "assignment": assignment, "files": [file]}));
    }

    /// Seeds a category in wire form and returns its id.
    pub fn seed_category(&self, assignment: u64, fields: Value) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate();
        let mut record = object(fields);
        record.insert("id".into(), json!(id));
        record.insert("assignment".into(), json!(assignment));
        state.categories.insert(id, record);
        id
    }

    /// Seeds a comment in wire form and returns its id.
    pub fn seed_comment(&self, category: u64, fields: Value) -> u64 {
        let mut state = self.state.lock().unwrap();
        let id = state.allocate();
        let mut record = object(fields);
        record.insert("id".into(), json!(id));
        record.insert("category".into(), json!(category));
        state.comments.insert(id, record);
        id
    }

    /// Makes every request of `method` whose path starts with `prefix` fail.
    pub fn fail_when(&self, method: Method, prefix: &str) {
        self.set_failure(method, prefix, None);
    }

    /// Makes only the `nth` (1-based) matching request fail.
    pub fn fail_nth(&self, method: Method, prefix: &str, nth: usize) {
        self.set_failure(method, prefix, Some(nth));
    }

    fn set_failure(&self, method: Method, prefix: &str, nth: Option<usize>) {
        self.state.lock().unwrap().failure = Some(Failure {
            method,
            prefix: prefix.to_string(),
            nth,
            matched: 0,
        });
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        self.state.lock().unwrap().log.clone()
    }

    /// Every logged request that is not a `GET`.
    pub fn mutations(&self) -> Vec<ApiRequest> {
        self.requests()
            .into_iter()
            .filter(|request| request.method != Method::Get)
            .collect()
    }

    pub fn clear_log(&self) {
        self.state.lock().unwrap().log.clear();
    }

    /// Stored categories of an assignment ordered by sort key.
    pub fn categories_of(&self, assignment: u64) -> Vec<Map<String, Value>> {
        let state = self.state.lock().unwrap();
        let mut categories: Vec<_> = state
            .categories
            .values()
            .filter(|record| record["assignment"] == json!(assignment))
            .cloned()
            .collect();
        categories.sort_by_key(sort_key);
        categories
    }

    /// Stored comments of a category ordered by sort key.
    pub fn comments_of(&self, category: u64) -> Vec<Map<String, Value>> {
        let state = self.state.lock().unwrap();
        let mut comments: Vec<_> = state
            .comments
            .values()
            .filter(|record| record["category"] == json!(category))
            .cloned()
            .collect();
        comments.sort_by_key(sort_key);
        comments
    }

    pub fn category_named(&self, assignment: u64, name: &str) -> Option<Map<String, Value>> {
        self.categories_of(assignment)
            .into_iter()
            .find(|record| record["name"] == json!(name))
    }

    pub fn comment_named(&self, name: &str) -> Option<Map<String, Value>> {
        let state = self.state.lock().unwrap();
        state
            .comments
            .values()
            .find(|record| record["name"] == json!(name))
            .cloned()
    }

    pub fn comment_count(&self) -> usize {
        self.state.lock().unwrap().comments.len()
    }
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn category_view(&self, id: u64) -> Option<Value> {
        let mut record = self.categories.get(&id)?.clone();
        let comments: Vec<u64> = self
            .comments
            .iter()
            .filter(|(_, comment)| comment["category"] == json!(id))
            .map(|(comment_id, _)| *comment_id)
            .collect();
        record.insert("rubricComments".into(), json!(comments));
        Some(Value::Object(record))
    }

    fn route(&mut self, request: &ApiRequest) -> ApiResponse {
        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        let id = segments.get(1).and_then(|raw| raw.parse::<u64>().ok());
        match (request.method, segments.as_slice(), id) {
            (Method::Get, ["courses"], _) => ok(json!(self.courses)),
            (Method::Get, ["assignments", _], Some(id)) => match self.assignments.get(&id) {
                Some(name) => {
                    let categories: Vec<u64> = self
                        .categories
                        .iter()
                        .filter(|(_, record)| record["assignment"] == json!(id))
                        .map(|(category_id, _)| *category_id)
                        .collect();
                    ok(json!({"id": id, "name": name, "rubricCategories": categories}))
                }
                None => not_found(),
            },
            (Method::Get, ["assignments", _, "submissions"], Some(id)) => {
                ok(json!(self.submissions.get(&id).cloned().unwrap_or_default()))
            }
            (Method::Get, ["files", _], Some(id)) => match self.files.get(&id) {
                Some(file) => ok(file.clone()),
                None => not_found(),
            },
            (Method::Get, ["comments", _], Some(id)) => match self.feedback.get(&id) {
                Some(comment) => ok(comment.clone()),
                None => not_found(),
            },
            (Method::Get, ["rubricCategories", _], Some(id)) => match self.category_view(id) {
                Some(view) => ok(view),
                None => not_found(),
            },
            (Method::Get, ["rubricComments", _], Some(id)) => match self.comments.get(&id) {
                Some(record) => ok(Value::Object(record.clone())),
                None => not_found(),
            },
            (Method::Post, ["rubricCategories"], _) => {
                let Some(mut record) = request.body.clone().and_then(into_object) else {
                    return bad_request("body required");
                };
                let Some(assignment) = record.get("assignment").and_then(Value::as_u64) else {
                    return bad_request("assignment required");
                };
                if !self.assignments.contains_key(&assignment) {
                    return bad_request("unknown assignment");
                }
                let id = self.allocate();
                record.insert("id".into(), json!(id));
                record.entry("sortKey").or_insert(json!(0));
                self.categories.insert(id, record);
                created(self.category_view(id).unwrap_or(Value::Null))
            }
            (Method::Post, ["rubricComments"], _) => {
                let Some(mut record) = request.body.clone().and_then(into_object) else {
                    return bad_request("body required");
                };
                let parent = record.get("category").and_then(Value::as_u64);
                if !parent.is_some_and(|parent| self.categories.contains_key(&parent)) {
                    return bad_request("unknown category");
                }
                let id = self.allocate();
                record.insert("id".into(), json!(id));
                record.entry("sortKey").or_insert(json!(0));
                record.entry("pointDelta").or_insert(json!(0));
                self.comments.insert(id, record.clone());
                created(Value::Object(record))
            }
            (Method::Patch, ["rubricCategories", _], Some(id)) => {
                let Some(record) = self.categories.get_mut(&id) else {
                    return not_found();
                };
                merge(record, request.body.clone());
                ok(self.category_view(id).unwrap_or(Value::Null))
            }
            (Method::Patch, ["rubricComments", _], Some(id)) => {
                if let Some(Value::Object(body)) = &request.body {
                    if let Some(parent) = body.get("category").and_then(Value::as_u64) {
                        if !self.categories.contains_key(&parent) {
                            return bad_request("unknown category");
                        }
                    }
                }
                let Some(record) = self.comments.get_mut(&id) else {
                    return not_found();
                };
                merge(record, request.body.clone());
                ok(Value::Object(record.clone()))
            }
            (Method::Delete, ["rubricCategories", _], Some(id)) => {
                if self.categories.remove(&id).is_none() {
                    return not_found();
                }
                self.comments.retain(|_, comment| comment["category"] != json!(id));
                no_content()
            }
            (Method::Delete, ["rubricComments", _], Some(id)) => {
                if self.comments.remove(&id).is_none() {
                    return not_found();
                }
                no_content()
            }
            _ => not_found(),
        }
    }
}

#[async_trait]
impl Transport for FakeRemote {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut state = self.state.lock().unwrap();
        state.log.push(request.clone());
        if state.failure.as_mut().is_some_and(|failure| failure.hits(&request)) {
            return Ok(ApiResponse::new(500, r#"{"detail": "injected failure"}"#));
        }
        Ok(state.route(&request))
    }
}

fn object(value: Value) -> Map<String, Value> {
    into_object(value).unwrap_or_default()
}

fn into_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn merge(record: &mut Map<String, Value>, body: Option<Value>) {
    if let Some(Value::Object(fields)) = body {
        for (field, value) in fields {
            record.insert(field, value);
        }
    }
}

fn sort_key(record: &Map<String, Value>) -> (u64, u64) {
    (
        record.get("sortKey").and_then(Value::as_u64).unwrap_or(0),
        record.get("id").and_then(Value::as_u64).unwrap_or(0),
    )
}

fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body.to_string())
}

fn created(body: Value) -> ApiResponse {
    ApiResponse::new(201, body.to_string())
}

fn no_content() -> ApiResponse {
    ApiResponse::new(204, "")
}

fn not_found() -> ApiResponse {
    ApiResponse::new(404, r#"{"detail": "Not found."}"#)
}

fn bad_request(detail: &str) -> ApiResponse {
    ApiResponse::new(400, json!({ "detail": detail }).to_string())
}
