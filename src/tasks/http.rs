// ABOUTME: HTTP task implementation issuing requests with reqwest
// ABOUTME: Merges params into headers, query and body and maps failures to typed errors

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use tracing::debug;

use super::{config_error, param_to_string, TaskImplementation, TaskOutput};
use crate::engine::error::{ExecutionError, Result};
use crate::parser::{RunParams, TaskConfig};

/// Param keys with a dedicated meaning for HTTP tasks; they never become query pairs.
const HEADERS_PARAM: &str = "headers";
const BODY_PARAM: &str = "body";

/// Longest slice of a failing response body kept in the error message.
const ERROR_BODY_LIMIT: usize = 512;

pub struct HttpTask {
    client: reqwest::Client,
}

/// Configuration for HTTP tasks
///
/// ```yaml
/// kind: http
/// timeoutMs: 10000
/// config:
///   url: https://hooks.example.com/deploy
///   method: POST
///   headers:
///     Authorization: "Bearer {{ secrets.DEPLOY_TOKEN }}"
///   body:
///     service: api
/// ```
///
/// Params are merged in: a `headers` param object adds headers, a `body`
/// param is used when the config has no body, and every other scalar param
/// becomes a query pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub url: String,

    #[serde(default)]
    pub method: HttpMethod,

    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// JSON body. A string body is sent verbatim.
    #[serde(default)]
    pub body: Option<serde_json::Value>,

    #[serde(default)]
    pub query: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
        }
    }

    fn to_reqwest(self) -> reqwest::Method {
        match self {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
            HttpMethod::Head => reqwest::Method::HEAD,
        }
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            "HEAD" => Ok(HttpMethod::Head),
            other => Err(format!("unsupported HTTP method '{}'", other)),
        }
    }
}

impl TryFrom<String> for HttpMethod {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<HttpMethod> for String {
    fn from(method: HttpMethod) -> Self {
        method.as_str().to_string()
    }
}

impl HttpConfig {
    fn parse(task_id: &str, config: &serde_yaml::Value) -> Result<Self> {
        let config: HttpConfig = serde_yaml::from_value(config.clone())
            .map_err(|e| config_error(task_id, "http", e))?;

        if config.url.trim().is_empty() {
            return Err(config_error(task_id, "http", "url cannot be empty"));
        }
        // Placeholders are only resolved at execution time
        if !config.url.contains("{{") {
            reqwest::Url::parse(&config.url)
                .map_err(|e| config_error(task_id, "http", format!("invalid url: {}", e)))?;
        }
        Ok(config)
    }
}

/// Request parts after params have been merged into the declared config.
#[derive(Debug, Clone, PartialEq)]
struct PreparedRequest {
    headers: BTreeMap<String, String>,
    query: Vec<(String, String)>,
    body: Option<serde_json::Value>,
}

fn prepare(config: &HttpConfig, params: &RunParams) -> PreparedRequest {
    let mut headers: BTreeMap<String, String> = config
        .headers
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if let Some(serde_json::Value::Object(extra)) = params.get(HEADERS_PARAM) {
        for (name, value) in extra {
            headers.insert(name.clone(), param_to_string(value));
        }
    }

    let mut query: BTreeMap<String, String> = config
        .query
        .iter()
        .map(|(k, v)| (k.clone(), param_to_string(v)))
        .collect();
    for (key, value) in params {
        if key == HEADERS_PARAM || key == BODY_PARAM {
            continue;
        }
        if value.is_string() || value.is_number() || value.is_boolean() {
            query.insert(key.clone(), param_to_string(value));
        }
    }

    let body = config
        .body
        .clone()
        .or_else(|| params.get(BODY_PARAM).cloned());

    PreparedRequest {
        headers,
        query: query.into_iter().collect(),
        body,
    }
}

impl HttpTask {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn request_error(task_id: &str, url: &str, error: reqwest::Error, task: &TaskConfig) -> ExecutionError {
        if error.is_timeout() {
            return ExecutionError::TaskTimeout {
                task_id: task_id.to_string(),
                timeout: task.timeout(),
            };
        }
        ExecutionError::HttpFailed {
            task_id: task_id.to_string(),
            status: error.status().map(|s| s.as_u16()),
            message: format!("request to {} failed: {}", url, error.without_url()),
        }
    }
}

impl Default for HttpTask {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskImplementation for HttpTask {
    async fn execute(&self, task: &TaskConfig, params: &RunParams) -> Result<TaskOutput> {
        let config = HttpConfig::parse(&task.task_id, &task.config)?;
        let prepared = prepare(&config, params);

        let mut request = self
            .client
            .request(config.method.to_reqwest(), &config.url)
            .timeout(task.timeout());

        for (name, value) in &prepared.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if !prepared.query.is_empty() {
            request = request.query(&prepared.query);
        }
        request = match prepared.body {
            Some(serde_json::Value::String(text)) => request.body(text),
            Some(json) => request.json(&json),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| Self::request_error(&task.task_id, &config.url, e, task))?;

        let status = response.status();
        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| Self::request_error(&task.task_id, &config.url, e, task))?;

        debug!("Task {} received HTTP {}", task.task_id, status);

        if !status.is_success() {
            let snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
            return Err(ExecutionError::HttpFailed {
                task_id: task.task_id.clone(),
                status: Some(status.as_u16()),
                message: format!("{} {} returned {}: {}", config.method.as_str(), config.url, status, snippet),
            });
        }

        Ok(TaskOutput::Http {
            status: status.as_u16(),
            headers,
            body,
        })
    }

    fn task_type(&self) -> &'static str {
        "http"
    }

    fn validate_config(&self, config: &serde_yaml::Value) -> Result<()> {
        HttpConfig::parse("validation", config).map(|_| ())
    }

    fn describe(&self, config: &serde_yaml::Value) -> Option<String> {
        let config = HttpConfig::parse("describe", config).ok()?;
        Some(format!("{} {}", config.method.as_str(), config.url))
    }
}
