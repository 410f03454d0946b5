//! Batch execution: bounded in-process concurrency and a process pool.
//!
//! Evaluations that touch a device run through [`ProcessPool`], which
//! starts a fresh `eval-worker` process per request so that device state
//! never leaks between candidates. Results come back in completion order,
//! each tagged with the index of the job that produced it.

use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::domain::{EvalError, EvaluationRequest, EvaluationResult, Metadata};
use crate::eval::{evaluate, panic_message};
use crate::metrics::METRICS;

/// Run `f` over `items` with at most `max_workers` jobs in flight.
///
/// Returns `(index, outcome)` pairs in completion order. A job that
/// panics yields `Err` with the panic message instead of taking the batch
/// down.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    max_workers: usize,
    f: F,
) -> Vec<(usize, Result<R, String>)>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let sem = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let job = f(item);
        let sem = Arc::clone(&sem);
        set.spawn(async move {
            let _permit = sem.acquire_owned().await.ok();
            let outcome = match tokio::spawn(job).await {
                Ok(value) => Ok(value),
                Err(err) if err.is_panic() => Err(panic_message(err.into_panic())),
                Err(err) => Err(err.to_string()),
            };
            (index, outcome)
        });
    }

    let mut done = Vec::with_capacity(set.len());
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(pair) => done.push(pair),
            Err(err) => warn!(error = %err, "pool task lost"),
        }
    }
    done
}

/// One finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolResult {
    pub index: usize,
    pub result: EvaluationResult,
}

/// Runs each evaluation in its own short-lived worker process.
#[derive(Debug, Clone)]
pub struct ProcessPool {
    worker_exe: PathBuf,
    worker_args: Vec<String>,
    max_workers: usize,
    /// Slack on top of a request's own timeout before the process is killed.
    grace: Duration,
}

impl ProcessPool {
    /// A pool whose workers are `<worker_exe> eval-worker`.
    pub fn new(worker_exe: impl Into<PathBuf>) -> Self {
        Self {
            worker_exe: worker_exe.into(),
            worker_args: vec!["eval-worker".to_string()],
            max_workers: 1,
            grace: Duration::from_secs(10),
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.worker_args = args;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Evaluate every request; one result per request, in completion order.
    pub async fn run(&self, requests: Vec<EvaluationRequest>) -> Vec<PoolResult> {
        info!(jobs = requests.len(), workers = self.max_workers, "process pool started");
        let fallback: Vec<Metadata> = requests.iter().map(base_metadata).collect();
        let pool = self.clone();
        let finished = run_bounded(requests, self.max_workers, move |request| {
            let pool = pool.clone();
            async move { pool.run_one(request).await }
        })
        .await;

        finished
            .into_iter()
            .map(|(index, outcome)| PoolResult {
                index,
                result: outcome.unwrap_or_else(|message| {
                    EvaluationResult::infra_failure(
                        format!("pool job panicked: {message}"),
                        fallback.get(index).cloned().unwrap_or_default(),
                    )
                }),
            })
            .collect()
    }

    /// Evaluate one request in a fresh worker process.
    pub async fn run_one(&self, request: EvaluationRequest) -> EvaluationResult {
        let metadata = base_metadata(&request);
        let limit_secs = request.timeout_secs;
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => payload,
            Err(e) => return EvaluationResult::infra_failure(format!("request encoding: {e}"), metadata),
        };

        let mut child = match Command::new(&self.worker_exe)
            .args(&self.worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return EvaluationResult::infra_failure(
                    format!("failed to start eval worker {}: {e}", self.worker_exe.display()),
                    metadata,
                )
            }
        };
        debug!(pid = ?child.id(), "eval worker started");

        // Writing the request counts against the deadline too.
        let stdin = child.stdin.take();
        let exchange = async move {
            if let Some(mut stdin) = stdin {
                if let Err(e) = stdin.write_all(&payload).await {
                    warn!(error = %e, "failed to hand request to eval worker");
                }
            }
            child.wait_with_output().await
        };

        let limit = Duration::from_secs(limit_secs) + self.grace;
        let output = match tokio::time::timeout(limit, exchange).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return EvaluationResult::infra_failure(format!("eval worker io: {e}"), metadata)
            }
            Err(_) => {
                METRICS.inc_timeouts();
                warn!(limit_secs, "eval worker killed after timeout");
                return EvaluationResult::timed_out(limit_secs, metadata);
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());
        match last_line.map(serde_json::from_str::<EvaluationResult>) {
            Some(Ok(result)) => result,
            _ if !output.status.success() => EvaluationResult::infra_failure(
                format!("eval worker crashed: {}", output.status),
                metadata,
            ),
            Some(Err(e)) => {
                EvaluationResult::infra_failure(format!("unparsable eval worker output: {e}"), metadata)
            }
            None => EvaluationResult::infra_failure("eval worker produced no output", metadata),
        }
    }
}

fn base_metadata(request: &EvaluationRequest) -> Metadata {
    crate::eval::base_metadata(request, request.toolchain.instantiate().as_ref())
}

/// Worker side of the process pool: one request in, one result out.
///
/// A request that does not parse still produces a result line, so the
/// parent always has something structured to read.
pub async fn serve_eval_request<R, W>(mut reader: R, mut writer: W) -> Result<EvaluationResult, EvalError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut text = String::new();
    reader.read_to_string(&mut text).await?;

    let result = match serde_json::from_str::<EvaluationRequest>(&text) {
        Ok(request) => evaluate(request).await,
        Err(e) => EvaluationResult::infra_failure(format!("malformed request: {e}"), Metadata::new()),
    };

    let mut line = serde_json::to_vec(&result)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FailureKind;

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_completion_order() {
        let delays = vec![30u64, 10, 20];
        let done = run_bounded(delays, 3, |ms| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            ms
        })
        .await;
        let order: Vec<usize> = done.iter().map(|(i, _)| *i).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert_eq!(done[0].1, Ok(10));
    }

    #[tokio::test]
    async fn test_run_bounded_isolates_panics() {
        let done = run_bounded(vec![1, 2, 3], 2, |n| async move {
            if n == 2 {
                panic!("job two");
            }
            n * 10
        })
        .await;
        assert_eq!(done.len(), 3);
        let failed: Vec<_> = done.iter().filter(|(_, r)| r.is_err()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, 1);
        assert_eq!(failed[0].1, Err("job two".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_bounded_respects_limit() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (l, p) = (Arc::clone(&live), Arc::clone(&peak));
        run_bounded((0..8).collect::<Vec<_>>(), 2, move |_| {
            let (live, peak) = (Arc::clone(&l), Arc::clone(&p));
            async move {
                let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                live.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    fn request() -> EvaluationRequest {
        EvaluationRequest::new("forward(x):\n return x\n", "forward(x):\n return x\n")
    }

    #[tokio::test]
    async fn test_missing_worker_binary_is_infra_failure() {
        let pool = ProcessPool::new("/nonexistent/kbench-worker");
        let result = pool.run_one(request()).await;
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert!(result.metadata["other_error"]
            .as_str()
            .unwrap()
            .contains("failed to start"));
        assert_eq!(result.metadata["device"], "cpu");
    }

    #[tokio::test]
    async fn test_garbage_output_is_infra_failure() {
        let pool = ProcessPool::new("sh").with_args(vec![
            "-c".to_string(),
            "cat >/dev/null; echo 'not json'".to_string(),
        ]);
        let result = pool.run_one(request()).await;
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert!(!result.is_timeout());
    }

    #[tokio::test]
    async fn test_crashing_worker_is_infra_failure() {
        let pool = ProcessPool::new("sh").with_args(vec!["-c".to_string(), "exit 3".to_string()]);
        let result = pool.run_one(request()).await;
        assert!(result.metadata["other_error"]
            .as_str()
            .unwrap()
            .contains("crashed"));
    }

    #[tokio::test]
    async fn test_hung_worker_is_killed() {
        let pool = ProcessPool::new("sh")
            .with_args(vec!["-c".to_string(), "sleep 30".to_string()])
            .with_grace(Duration::ZERO);
        let result = pool.run_one(request().with_timeout_secs(1)).await;
        assert!(result.is_timeout());
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
    }

    #[tokio::test]
    async fn test_worker_ignoring_large_request_is_killed() {
        let candidate = format!("# {}\nforward(x):\n return x\n", "x".repeat(4 << 20));
        let request = EvaluationRequest::new("forward(x):\n return x\n", candidate).with_timeout_secs(1);
        let pool = ProcessPool::new("sh")
            .with_args(vec!["-c".to_string(), "sleep 30".to_string()])
            .with_grace(Duration::ZERO);

        let result = tokio::time::timeout(Duration::from_secs(10), pool.run_one(request))
            .await
            .expect("run_one must respect the request timeout");
        assert!(result.is_timeout());
    }

    #[tokio::test]
    async fn test_pool_returns_one_result_per_job() {
        let pool = ProcessPool::new("sh")
            .with_args(vec!["-c".to_string(), "exit 1".to_string()])
            .with_max_workers(2);
        let results = pool.run(vec![request(), request(), request()]).await;
        let mut indices: Vec<usize> = results.iter().map(|r| r.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_serve_eval_request_roundtrip() {
        let src = "input x: [8]\nforward(x):\n return x + 1\n";
        let dir = tempfile::tempdir().unwrap();
        let request = EvaluationRequest::new(src, src)
            .with_trials(2, 3)
            .with_build_root(dir.path());
        let input = serde_json::to_vec(&request).unwrap();
        let mut out = Vec::new();
        let result = serve_eval_request(&input[..], &mut out).await.unwrap();
        assert!(result.correctness);

        let line = String::from_utf8(out).unwrap();
        let echoed: EvaluationResult = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(echoed.compiled, result.compiled);
        assert_eq!(echoed.correctness, result.correctness);
        assert!(echoed.runtime.is_some());
    }

    #[tokio::test]
    async fn test_serve_eval_request_malformed() {
        let mut out = Vec::new();
        let result = serve_eval_request(&b"{broken"[..], &mut out).await.unwrap();
        assert_eq!(result.failure, Some(FailureKind::InfraFailure));
        assert!(!out.is_empty());
    }
}
