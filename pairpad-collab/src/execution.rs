//! Client for the external code-execution service.
//!
//! The service takes `{language, code}` and answers with
//! `{stdout, stderr, exitCode, executionTimeMs}`. Nothing that goes wrong
//! here is fatal: transport, HTTP and decoding failures all come back as
//! [`ExecutionResult::Error`].

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    pub exit_code: i32,
    #[serde(default)]
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// The service ran the code (the program itself may have failed).
    Completed(ExecutionOutput),
    /// The service could not be used.
    Error { message: String },
}

impl ExecutionResult {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ResultKind {
        match self {
            Self::Completed(_) => ResultKind::Completed,
            Self::Error { .. } => ResultKind::Error,
        }
    }

    pub fn output(&self) -> Option<&ExecutionOutput> {
        match self {
            Self::Completed(output) => Some(output),
            Self::Error { .. } => None,
        }
    }
}

/// Something that can run code.
pub trait Executor {
    fn execute(&self, request: &ExecutionRequest) -> impl Future<Output = ExecutionResult> + Send;
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Full URL of the execute endpoint
    pub endpoint: String,
    pub timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8000/execute".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// [`Executor`] that POSTs JSON to an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
    config: ExecutorConfig,
}

impl HttpExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|e| {
                log::warn!("falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self { client, config }
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn post(&self, request: &ExecutionRequest) -> Result<ExecutionOutput, String> {
        let response = self
            .client
            .post(&self.config.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| format!("execution service unreachable: {e}"))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read execution response: {e}"))?;

        if !status.is_success() {
            return Err(format!("execution service returned {status}: {body}"));
        }
        parse_response(&body)
    }
}

impl Executor for HttpExecutor {
    async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        log::debug!("executing {} bytes of {}", request.code.len(), request.language);
        match self.post(request).await {
            Ok(output) => ExecutionResult::Completed(output),
            Err(message) => {
                log::warn!("{message}");
                ExecutionResult::error(message)
            }
        }
    }
}

/// Decode the service's JSON body.
pub fn parse_response(body: &str) -> Result<ExecutionOutput, String> {
    serde_json::from_str(body).map_err(|e| format!("invalid execution response: {e}"))
}
