use std::time::{Duration, Instant};

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{Config, PollPolicy, API_KEY_HEADER, MAX_RETRY_AFTER_SECS};
use crate::error::{AppError, Result};
use crate::query::cancel::CancelToken;
use crate::types::{states, JobHandle, JobStatus, QuerySpec, ResultRow};

/// Client for the Dune execute / status / results endpoints.
///
/// Holds no per-execution state: every call to `run` gets its own
/// `JobHandle`, so one client can be shared by concurrent requests.
#[derive(Debug, Clone)]
pub struct QueryClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    query_parameters: &'a std::collections::BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct ExecuteResponse {
    execution_id: Option<String>,
}

#[derive(Deserialize)]
struct ResultsResponse {
    state: Option<String>,
    result: Option<ResultsBody>,
}

#[derive(Deserialize)]
struct ResultsBody {
    rows: Vec<ResultRow>,
}

impl QueryClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        http_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(http_timeout).build()?;
        Ok(Self::with_http_client(http, base_url, api_key))
    }

    pub fn with_http_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        Self::new(cfg.api_url.clone(), cfg.api_key.clone(), cfg.http_timeout)
    }

    /// Submit, wait for completion, and read the rows of one execution.
    pub async fn run(
        &self,
        spec: &QuerySpec,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<Vec<ResultRow>> {
        let started = Instant::now();
        let handle = self.submit(spec).await?;
        let attempts = self.await_completion(&handle, policy, cancel).await?;
        let rows = self.fetch_results(handle).await?;

        info!(
            query_id = spec.query_id(),
            rows = rows.len(),
            attempts,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query {} complete: {} rows after {} status polls",
            spec.query_id(),
            rows.len(),
            attempts,
        );
        Ok(rows)
    }

    pub async fn submit(&self, spec: &QuerySpec) -> Result<JobHandle> {
        let url = format!("{}/query/{}/execute", self.base_url, spec.query_id());
        let body = ExecuteRequest {
            query_parameters: spec.parameters(),
        };

        let resp = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Submission(format!("execute request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Submission(format!(
                "execute returned HTTP {status}: {}",
                snippet(&text)
            )));
        }

        let parsed: ExecuteResponse = resp
            .json()
            .await
            .map_err(|e| AppError::Submission(format!("unreadable execute response: {e}")))?;

        let execution_id = parsed
            .execution_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Submission("execute response has no execution_id".to_string()))?;

        info!(
            query_id = spec.query_id(),
            execution_id = %execution_id,
            "Submitted query {}",
            spec.query_id(),
        );
        Ok(JobHandle::new(execution_id))
    }

    /// Read the current state of an execution. Only transport failures are
    /// errors; every HTTP answer becomes some `JobStatus`.
    pub async fn poll_status(&self, handle: &JobHandle) -> Result<JobStatus> {
        let url = format!("{}/execution/{}/status", self.base_url, handle);
        let resp = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let code = resp.status();
        if code == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(|secs| Duration::from_secs(secs.min(MAX_RETRY_AFTER_SECS)));
            return Ok(JobStatus::Throttled { retry_after });
        }
        if !code.is_success() {
            warn!(execution_id = %handle, status = code.as_u16(), "Status poll returned HTTP {code}");
            return Ok(JobStatus::Pending {
                state: format!("HTTP_{}", code.as_u16()),
            });
        }

        let body: serde_json::Value = match resp.json().await {
            Ok(v) => v,
            Err(e) if e.is_decode() => {
                warn!(execution_id = %handle, "Unreadable status body: {e}");
                return Ok(JobStatus::Pending {
                    state: String::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let state = body.get("state").and_then(|s| s.as_str()).unwrap_or("");
        Ok(JobStatus::from_state(state))
    }

    /// Poll until the execution completes. Returns the number of status calls
    /// made. Fails with `Timeout` once `policy.max_attempts` polls or
    /// `policy.timeout` elapse, `JobFailed` on a terminal failure state, and
    /// `Cancelled` when `cancel` fires.
    pub async fn await_completion(
        &self,
        handle: &JobHandle,
        policy: &PollPolicy,
        cancel: &CancelToken,
    ) -> Result<u32> {
        let mut attempts = 0u32;
        let wait = self.poll_until_done(handle, policy, cancel, &mut attempts);

        let outcome = match policy.timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await,
            None => Ok(wait.await),
        };

        match outcome {
            Ok(Ok(())) => Ok(attempts),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(execution_id = %handle, attempts, "Execution wait hit its deadline");
                Err(AppError::Timeout {
                    handle: handle.to_string(),
                    attempts,
                })
            }
        }
    }

    async fn poll_until_done(
        &self,
        handle: &JobHandle,
        policy: &PollPolicy,
        cancel: &CancelToken,
        attempts: &mut u32,
    ) -> Result<()> {
        let mut cancel = cancel.clone();

        loop {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled(handle.to_string()));
            }

            *attempts += 1;
            let status = self.poll_status(handle).await?;
            debug!(execution_id = %handle, attempt = *attempts, status = %status, "Polled execution");

            let delay = match status {
                JobStatus::Completed => return Ok(()),
                JobStatus::Failed { state } => {
                    return Err(AppError::JobFailed {
                        handle: handle.to_string(),
                        state,
                    })
                }
                JobStatus::Throttled { retry_after } => {
                    let delay = retry_after.unwrap_or(policy.interval).max(policy.interval);
                    warn!(execution_id = %handle, "Status poll throttled, waiting {}ms", delay.as_millis());
                    delay
                }
                JobStatus::Pending { .. } => policy.interval,
            };

            if *attempts >= policy.max_attempts {
                warn!(execution_id = %handle, attempts = *attempts, "Execution still pending at attempt limit");
                return Err(AppError::Timeout {
                    handle: handle.to_string(),
                    attempts: *attempts,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    info!(execution_id = %handle, "Execution wait cancelled");
                    return Err(AppError::Cancelled(handle.to_string()));
                }
            }
        }
    }

    /// Read the rows of a completed execution. Consumes the handle.
    pub async fn fetch_results(&self, handle: JobHandle) -> Result<Vec<ResultRow>> {
        let url = format!("{}/execution/{}/results", self.base_url, handle);
        let resp = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| AppError::Fetch(format!("results request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AppError::Fetch(format!(
                "results for {handle} returned HTTP {status}: {}",
                snippet(&text)
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| AppError::Fetch(format!("reading results body: {e}")))?;
        let parsed: ResultsResponse = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Fetch(format!("malformed results for {handle}: {e}")))?;

        if let Some(state) = parsed.state.as_deref() {
            if state != states::COMPLETED {
                return Err(AppError::Fetch(format!(
                    "execution {handle} is not completed (state {state})"
                )));
            }
        }

        let rows = parsed
            .result
            .map(|r| r.rows)
            .ok_or_else(|| AppError::Fetch(format!("results for {handle} carry no rows")))?;

        debug!(execution_id = %handle, rows = rows.len(), "Fetched results");
        Ok(rows)
    }
}

fn snippet(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::cancel::cancel_pair;
    use crate::query::mock::{query_client as client, spawn_mock, MockDune, Step, KEY};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn policy(interval_ms: u64, max_attempts: u32) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(interval_ms),
            max_attempts,
            timeout: None,
        }
    }

    #[tokio::test]
    async fn run_polls_until_completed_then_fetches_once() {
        let mock = MockDune::new(&[
            Step::State(states::PENDING),
            Step::State(states::EXECUTING),
            Step::State(states::COMPLETED),
        ]);
        let base = spawn_mock(mock.clone()).await;
        let spec = QuerySpec::new(1362901).param("Creator Address", "0xabc");

        let started = Instant::now();
        let rows = client(&base)
            .run(&spec, &policy(30, 10), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].text("pool_address"), "0x01");
        assert_eq!(mock.execute_calls.load(Ordering::SeqCst), 1);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(mock.result_calls.load(Ordering::SeqCst), 1);
        // two pending answers, one interval after each
        assert!(started.elapsed() >= Duration::from_millis(60));

        let body = mock.last_body.lock().unwrap().clone().unwrap();
        assert_eq!(body, json!({ "query_parameters": { "Creator Address": "0xabc" } }));
        assert_eq!(mock.last_key.lock().unwrap().as_deref(), Some(KEY));
    }

    #[tokio::test]
    async fn never_completing_job_times_out_after_max_attempts() {
        let mock = MockDune::new(&[]);
        let base = spawn_mock(mock.clone()).await;
        let qc = client(&base);

        let handle = qc.submit(&QuerySpec::new(1)).await.unwrap();
        let err = qc
            .await_completion(&handle, &policy(5, 4), &CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Timeout { attempts: 4, .. }));
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 4);
        assert_eq!(mock.result_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn wall_clock_deadline_stops_waiting() {
        let mock = MockDune::new(&[]);
        let base = spawn_mock(mock).await;
        let qc = client(&base);

        let handle = qc.submit(&QuerySpec::new(1)).await.unwrap();
        let policy = PollPolicy {
            interval: Duration::from_millis(40),
            max_attempts: 10_000,
            timeout: Some(Duration::from_millis(150)),
        };
        let err = qc
            .await_completion(&handle, &policy, &CancelToken::never())
            .await
            .unwrap_err();

        match err {
            AppError::Timeout { attempts, .. } => assert!(attempts >= 1),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn failure_state_ends_the_wait() {
        let mock = MockDune::new(&[Step::State(states::PENDING), Step::State(states::FAILED)]);
        let base = spawn_mock(mock.clone()).await;

        let err = client(&base)
            .run(&QuerySpec::new(1), &policy(5, 10), &CancelToken::never())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::JobFailed { ref state, .. } if state == states::FAILED));
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 2);
        assert_eq!(mock.result_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn throttling_and_server_errors_keep_polling() {
        let mock = MockDune::new(&[
            Step::Throttle,
            Step::Http(500),
            Step::State("QUERY_STATE_UNHEARD_OF"),
            Step::State(states::COMPLETED),
        ]);
        let base = spawn_mock(mock.clone()).await;

        let rows = client(&base)
            .run(&QuerySpec::new(1), &policy(5, 10), &CancelToken::never())
            .await
            .unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(mock.status_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn throttled_status_carries_retry_after() {
        let mock = MockDune::new(&[Step::Throttle]);
        let base = spawn_mock(mock).await;

        let status = client(&base)
            .poll_status(&JobHandle::new("01HTEST"))
            .await
            .unwrap();
        assert_eq!(
            status,
            JobStatus::Throttled {
                retry_after: Some(Duration::ZERO)
            }
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let mock = MockDune::new(&[]);
        let base = spawn_mock(mock).await;
        let qc = client(&base);
        let (cancel_handle, token) = cancel_pair();

        let handle = qc.submit(&QuerySpec::new(1)).await.unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_handle.cancel();
        });

        let err = qc
            .await_completion(&handle, &policy(1_000, 100), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
    }

    #[tokio::test]
    async fn submit_without_execution_id_is_a_submission_error() {
        let mut mock = MockDune::new(&[]);
        mock.omit_execution_id = true;
        let base = spawn_mock(mock).await;

        let err = client(&base).submit(&QuerySpec::new(7)).await.unwrap_err();
        assert!(matches!(err, AppError::Submission(_)));
    }

    #[tokio::test]
    async fn fetching_an_unfinished_execution_fails() {
        let mut mock = MockDune::new(&[]);
        mock.results_state = states::EXECUTING;
        let base = spawn_mock(mock).await;

        let err = client(&base)
            .fetch_results(JobHandle::new("01HTEST"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch(msg) if msg.contains(states::EXECUTING)));
    }

    #[tokio::test]
    async fn unreachable_api_is_a_transport_error_when_polling() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"))
            .poll_status(&JobHandle::new("01HTEST"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
    }
}
