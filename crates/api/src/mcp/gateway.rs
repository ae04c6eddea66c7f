//! Tool Invocation Gateway
//!
//! Executes tool calls against connected backends and always answers with a
//! [`CallResponse`], never an error. Every call is counted once as an attempt
//! and once as a success or failure.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use mcphub_shared::{BatchCallResponse, CallRequest, CallResponse};
use serde_json::Value;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use super::client::{McpClientError, McpResult};
use super::metrics::MetricsAggregator;
use super::supervisor::{ConnectionSupervisor, SessionLease};

/// Upper bound on a single backoff step between retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct ToolInvocationGateway {
    supervisor: Arc<ConnectionSupervisor>,
    metrics: Arc<MetricsAggregator>,
}

impl ToolInvocationGateway {
    pub fn new(supervisor: Arc<ConnectionSupervisor>, metrics: Arc<MetricsAggregator>) -> Self {
        Self {
            supervisor,
            metrics,
        }
    }

    /// Run one tool call to completion
    pub async fn call_tool(&self, request: CallRequest) -> CallResponse {
        self.metrics.record_attempt();
        let backend_id = request.backend_id.as_str();

        let Some(lease) = self.supervisor.lease(backend_id).await else {
            self.metrics.record_failure(backend_id);
            tracing::warn!(backend_id = %backend_id, tool = %request.tool_name, "Call to unavailable backend");
            return CallResponse::failure(
                &request,
                format!("Server {} does not exist or is not connected", backend_id),
                0,
            );
        };

        let started = Instant::now();
        let outcome = invoke(&lease, &request).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        drop(lease);

        match outcome {
            Ok(data) => {
                self.metrics.record_success(backend_id, elapsed_ms);
                self.supervisor.touch(backend_id);
                tracing::debug!(backend_id = %backend_id, tool = %request.tool_name, elapsed_ms, "Tool call succeeded");
                CallResponse::success(&request, data, elapsed_ms)
            }
            Err(e) => {
                self.metrics.record_failure(backend_id);
                tracing::warn!(
                    backend_id = %backend_id,
                    tool = %request.tool_name,
                    elapsed_ms,
                    error = %e,
                    "Tool call failed"
                );
                CallResponse::failure(&request, e.to_string(), elapsed_ms)
            }
        }
    }

    /// Run a call on its own task so that dropping the caller (for example an
    /// HTTP client disconnecting) does not cancel it.
    pub async fn dispatch(&self, request: CallRequest) -> CallResponse {
        let fallback = request.clone();
        let gateway = self.clone();

        match tokio::spawn(async move { gateway.call_tool(request).await }).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(backend_id = %fallback.backend_id, error = %e, "Tool call task failed");
                CallResponse::failure(&fallback, format!("Tool call task failed: {}", e), 0)
            }
        }
    }

    /// Run every call concurrently; results keep submission order
    pub async fn call_batch(&self, requests: Vec<CallRequest>) -> BatchCallResponse {
        let results = join_all(requests.into_iter().map(|r| self.dispatch(r))).await;
        BatchCallResponse::from_results(results)
    }
}

/// Call the tool, applying the request's (or backend's) deadline and retry
/// budget. Only transient failures are retried.
async fn invoke(lease: &SessionLease, request: &CallRequest) -> McpResult<Value> {
    let deadline = request
        .timeout_ms
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
        .or_else(|| lease.descriptor.default_timeout());
    let attempts = request
        .retry_attempts
        .unwrap_or(lease.descriptor.retry.attempts) as usize;
    let base_ms = u64::try_from(lease.descriptor.retry.delay.as_millis()).unwrap_or(u64::MAX);

    // Delays of base, 2*base, 4*base... capped at RETRY_MAX_DELAY
    let strategy = ExponentialBackoff::from_millis(2)
        .factor(base_ms.max(2) / 2)
        .max_delay(RETRY_MAX_DELAY)
        .map(jitter)
        .take(attempts);

    let session = &lease.session;
    let tool_name = request.tool_name.as_str();
    let arguments = Value::Object(request.arguments.clone());

    let call = RetryIf::spawn(
        strategy,
        || {
            let arguments = arguments.clone();
            async move { session.call_tool(tool_name, arguments).await }
        },
        |e: &McpClientError| {
            let retry = e.is_transient();
            if retry {
                tracing::debug!(tool = %tool_name, error = %e, "Transient error - will retry");
            }
            retry
        },
    );

    match deadline {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| McpClientError::Timeout)?,
        None => call.await,
    }
}
