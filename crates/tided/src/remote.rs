//! Fetching session logs from remote hosts over ssh.
//!
//! Each fetch returns the whole file; remote logs are reparsed from the
//! start rather than tailed.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use tide_core::DomainError;
use tide_tmux::{CommandRunner, TmuxError};

use crate::config::RemoteConfig;

#[derive(Error, Debug)]
pub enum FetchError {
    /// Every attempt failed
    #[error("fetch from {host} failed after {attempts} attempts: {last_error}")]
    TransportFailure {
        host: String,
        attempts: u32,
        last_error: String,
    },
}

impl From<FetchError> for DomainError {
    fn from(err: FetchError) -> Self {
        match &err {
            FetchError::TransportFailure { host, .. } => DomainError::transport(host.clone(), err.to_string()),
        }
    }
}

/// Reads files on remote hosts through a [`CommandRunner`].
#[derive(Clone)]
pub struct RemoteLogFetcher {
    runner: Arc<dyn CommandRunner>,
    max_attempts: u32,
    base_backoff: Duration,
}

impl RemoteLogFetcher {
    pub fn new(runner: Arc<dyn CommandRunner>, config: &RemoteConfig) -> Self {
        Self {
            runner,
            max_attempts: config.max_attempts.max(1),
            base_backoff: Duration::from_millis(config.base_backoff_ms),
        }
    }

    /// Delay after failed attempt `attempt` (zero-based): base, 2x base, 4x base...
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(1u32 << attempt.min(16))
    }

    /// Fetches `path` (relative to the remote home) from `host`.
    ///
    /// Returns `Ok(None)` when the file does not exist or is empty.
    pub async fn fetch_file(&self, host: &str, path: &str) -> Result<Option<String>, FetchError> {
        let args = vec![path.to_string()];
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            match self.runner.run(Some(host), "cat", &args).await {
                Ok(output) if output.is_success() => {
                    debug!(host, path, bytes = output.stdout.len(), attempt, "fetched remote file");
                    if output.stdout.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(output.stdout));
                }
                Ok(output) if output.stderr.contains("No such file") => {
                    debug!(host, path, "remote file does not exist");
                    return Ok(None);
                }
                Ok(output) => {
                    last_error = TmuxError::Failed {
                        program: "cat".to_string(),
                        status: output.status,
                        stderr: output.stderr.trim().to_string(),
                    }
                    .to_string();
                }
                Err(e) => last_error = e.to_string(),
            }

            let delay = self.backoff(attempt);
            warn!(
                host,
                path,
                attempt = attempt + 1,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "remote fetch failed"
            );
            tokio::time::sleep(delay).await;
        }

        Err(FetchError::TransportFailure {
            host: host.to_string(),
            attempts: self.max_attempts,
            last_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tide_tmux::CommandOutput;
    use tokio::time::Instant;

    /// Replays canned results and records when each call happened.
    struct Scripted {
        results: Mutex<VecDeque<tide_tmux::Result<CommandOutput>>>,
        calls: Mutex<Vec<(Instant, Option<String>, Vec<String>)>>,
    }

    impl Scripted {
        fn new(results: Vec<tide_tmux::Result<CommandOutput>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl CommandRunner for Scripted {
        async fn run(&self, host: Option<&str>, _program: &str, args: &[String]) -> tide_tmux::Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((Instant::now(), host.map(str::to_string), args.to_vec()));
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::failure(255, "ssh: connect to host: Connection refused")))
        }
    }

    fn fetcher(runner: Arc<Scripted>) -> RemoteLogFetcher {
        RemoteLogFetcher::new(runner, &RemoteConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_attempts_with_backoff() {
        let runner = Scripted::new(vec![]);
        let start = Instant::now();

        let result = fetcher(runner.clone()).fetch_file("box", "log.jsonl").await;
        assert!(matches!(result, Err(FetchError::TransportFailure { attempts: 3, .. })));

        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let offsets: Vec<u128> = calls.iter().map(|c| (c.0 - start).as_millis()).collect();
        assert_eq!(offsets, vec![0, 500, 1500]);
        // The final backoff runs before the failure surfaces
        assert_eq!((Instant::now() - start).as_millis(), 3500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_short_circuits() {
        let runner = Scripted::new(vec![
            Err(TmuxError::Timeout {
                program: "ssh".to_string(),
                timeout: Duration::from_secs(5),
            }),
            Ok(CommandOutput::success("{\"type\":\"user\"}\n")),
        ]);

        let content = fetcher(runner.clone()).fetch_file("box", "log.jsonl").await.unwrap();
        assert_eq!(content.as_deref(), Some("{\"type\":\"user\"}\n"));
        let calls = runner.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1.as_deref(), Some("box"));
        assert_eq!(calls[0].2, vec!["log.jsonl"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_file_not_retried() {
        let runner = Scripted::new(vec![Ok(CommandOutput::failure(
            1,
            "cat: log.jsonl: No such file or directory",
        ))]);

        let content = fetcher(runner.clone()).fetch_file("box", "log.jsonl").await.unwrap();
        assert!(content.is_none());
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_file_is_none() {
        let runner = Scripted::new(vec![Ok(CommandOutput::success(""))]);
        let content = fetcher(runner).fetch_file("box", "log.jsonl").await.unwrap();
        assert!(content.is_none());
    }

    #[test]
    fn test_backoff_doubles() {
        let f = fetcher(Scripted::new(vec![]));
        assert_eq!(f.backoff(0), Duration::from_millis(500));
        assert_eq!(f.backoff(1), Duration::from_secs(1));
        assert_eq!(f.backoff(2), Duration::from_secs(2));
    }
}
