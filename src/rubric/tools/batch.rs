//! Batched request layer.
//!
//! A batch is a set of independent operations of one method against one
//! collection. Every item is checked before anything is sent; the requests
//! are then dispatched together and their responses re-paired with the
//! originating item by index.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use futures::future::join_all;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::Value;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::rubric::tools::config::Config;
use crate::rubric::tools::error::{RequestError, Result, ToolError};

/// Request methods supported by the rubric API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Status code a successful response must carry.
    pub fn success_status(self) -> u16 {
        match self {
            Method::Get | Method::Patch => 200,
            Method::Post => 201,
            Method::Delete => 204,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RequestError;

    /// Accepts surrounding whitespace and any letter case.
    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PATCH" => Ok(Method::Patch),
            "DELETE" => Ok(Method::Delete),
            _ => Err(RequestError::UnsupportedMethod(raw.to_string())),
        }
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Strips leading slashes and guarantees exactly one trailing slash.
pub fn normalize_collection(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    format!("{trimmed}/")
}

/// A single request, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

/// Raw response as seen by the batch layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Sends one request over the wire. Implemented by [`HttpTransport`] and by
/// in-memory doubles in tests.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &T {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        (**self).send(request).await
    }
}

/// `reqwest`-backed transport carrying the API credential.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    authorization: String,
}

impl HttpTransport {
    /// Fails with a configuration error when the credential is missing.
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config.api_key()?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.clone(),
            authorization: format!("Token {api_key}"),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path.trim_start_matches('/')).map_err(|error| {
            ToolError::config(format!("cannot join '{path}' onto {}: {error}", self.base_url))
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let url = self.url(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.into(), url)
            .header(AUTHORIZATION, &self.authorization);
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(serde_json::to_vec(body)?);
        }
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(ApiResponse { status, body })
    }
}

/// Dispatches batches of independent requests through a [`Transport`].
#[derive(Debug, Clone)]
pub struct BatchClient<T> {
    transport: T,
}

impl<T: Transport> BatchClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends every item of `items` against `collection` and returns the parsed
    /// bodies in input order.
    ///
    /// Item shapes per method: `POST` takes the creation payload, `PATCH` an
    /// `{"id", "data"}` pair, `GET` and `DELETE` a bare id or an object with a
    /// numeric `id`. A `null` item counts as missing. Any malformed item
    /// rejects the whole batch before a request is issued.
    ///
    /// When some items of a mutating batch fail after others succeeded, the
    /// first failure comes back wrapped in [`ToolError::BatchIncomplete`]
    /// with the number of committed items.
    #[instrument(
        level = "debug",
        skip_all,
        fields(%method, %collection, item_count = items.len())
    )]
    pub async fn send_batch(
        &self,
        method: Method,
        collection: &str,
        items: &[Value],
    ) -> Result<Vec<Value>> {
        let collection = normalize_collection(collection);
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let requests = items
            .iter()
            .enumerate()
            .map(|(index, item)| prepare(method, &collection, index, item))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let responses = join_all(
            requests
                .into_iter()
                .map(|request| async move {
                    let path = request.path.clone();
                    let response = self.transport.send(request).await;
                    (path, response)
                }),
        )
        .await;

        let mut bodies = Vec::with_capacity(responses.len());
        let mut first_failure = None;
        for (index, (path, response)) in responses.into_iter().enumerate() {
            match response.and_then(|response| parse_response(method, &path, response)) {
                Ok(body) => bodies.push(body),
                Err(error) => {
                    warn!(index, %path, %error, "batch item failed");
                    first_failure.get_or_insert(error);
                }
            }
        }

        if let Some(error) = first_failure {
            if method == Method::Get || bodies.is_empty() {
                return Err(error);
            }
            warn!(%collection, committed = bodies.len(), "batch partially applied");
            return Err(ToolError::BatchIncomplete {
                method,
                committed: bodies.len(),
                source: Box::new(error),
            });
        }
        debug!(%collection, succeeded = bodies.len(), "batch completed");
        Ok(bodies)
    }

    /// Sends a single request to `path` and returns its parsed body.
    #[instrument(level = "debug", skip_all, fields(%method, %path))]
    pub async fn send_one(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let path = normalize_collection(path);
        let request = ApiRequest {
            method,
            path: path.clone(),
            body,
        };
        let response = self.transport.send(request).await?;
        parse_response(method, &path, response)
    }
}

fn prepare(
    method: Method,
    collection: &str,
    index: usize,
    item: &Value,
) -> std::result::Result<ApiRequest, RequestError> {
    match method {
        Method::Post => {
            if item.is_null() {
                return Err(RequestError::malformed(index, "missing data"));
            }
            Ok(ApiRequest {
                method,
                path: collection.to_string(),
                body: Some(item.clone()),
            })
        }
        Method::Patch => {
            let pair = item
                .as_object()
                .ok_or_else(|| RequestError::malformed(index, "missing item"))?;
            let data = match pair.get("data") {
                Some(data) if !data.is_null() => data.clone(),
                _ => return Err(RequestError::malformed(index, "missing data")),
            };
            let id = match pair.get("id") {
                None | Some(Value::Null) => {
                    return Err(RequestError::malformed(index, "missing id"));
                }
                Some(raw) => raw
                    .as_u64()
                    .ok_or_else(|| RequestError::malformed(index, format!("invalid id {raw}")))?,
            };
            Ok(ApiRequest {
                method,
                path: format!("{collection}{id}/"),
                body: Some(data),
            })
        }
        Method::Get | Method::Delete => {
            let id = item_id(item)
                .ok_or_else(|| RequestError::malformed(index, format!("invalid id {item}")))?;
            Ok(ApiRequest {
                method,
                path: format!("{collection}{id}/"),
                body: None,
            })
        }
    }
}

fn item_id(item: &Value) -> Option<u64> {
    match item {
        Value::Number(number) => number.as_u64(),
        Value::Object(fields) => fields.get("id").and_then(Value::as_u64),
        _ => None,
    }
}

fn parse_response(method: Method, path: &str, response: ApiResponse) -> Result<Value> {
    if response.status != method.success_status() {
        return Err(RequestError::UnexpectedStatus {
            method,
            path: path.to_string(),
            status: response.status,
            detail: error_detail(&response.body),
        }
        .into());
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&response.body)?)
}

/// Prefers the `detail` field of a JSON error body, falling back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value.get("detail") {
            Some(Value::String(detail)) => Some(detail.clone()),
            Some(other) => Some(other.to_string()),
            None => None,
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn methods_are_trimmed_and_case_folded() {
        assert_eq!(" patch ".parse::<Method>(), Ok(Method::Patch));
        assert_eq!("Delete".parse::<Method>(), Ok(Method::Delete));
        assert_eq!(
            "PUT".parse::<Method>(),
            Err(RequestError::UnsupportedMethod("PUT".into()))
        );
    }

    #[test]
    fn collection_paths_get_one_trailing_slash() {
        assert_eq!(normalize_collection("/rubricComments"), "rubricComments/");
        assert_eq!(normalize_collection("rubricComments//"), "rubricComments/");
        assert_eq!(normalize_collection("assignments/7"), "assignments/7/");
    }

    #[test]
    fn get_items_accept_ids_and_objects() {
        let bare = prepare(Method::Get, "rubricCategories/", 0, &json!(4)).expect("bare id");
        let object =
            prepare(Method::Get, "rubricCategories/", 1, &json!({"id": 5})).expect("object id");
        assert_eq!(bare.path, "rubricCategories/4/");
        assert_eq!(object.path, "rubricCategories/5/");
        assert_eq!(
            prepare(Method::Delete, "rubricCategories/", 2, &json!("x")),
            Err(RequestError::malformed(2, "invalid id \"x\""))
        );
    }

    #[test]
    fn error_detail_prefers_detail_field() {
        assert_eq!(error_detail(r#"{"detail": "Not found."}"#), "Not found.");
        assert_eq!(error_detail("<html>oops</html>"), "<html>oops</html>");
    }
}
