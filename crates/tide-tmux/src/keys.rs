//! Keystroke injection into a pane.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Result, TmuxError};
use crate::runner::CommandRunner;
use crate::target::TmuxTarget;

/// Sends literal text and Enter to a pane, locally or on a remote host.
#[derive(Clone)]
pub struct KeySender {
    runner: Arc<dyn CommandRunner>,
}

impl KeySender {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    /// Types `text` literally (`send-keys -l`), without pressing Enter.
    pub async fn send_literal(&self, host: Option<&str>, target: &TmuxTarget, text: &str) -> Result<()> {
        let args = vec![
            "send-keys".to_string(),
            "-t".to_string(),
            target.to_string(),
            "-l".to_string(),
            text.to_string(),
        ];
        self.runner.run(host, "tmux", &args).await?.into_result("tmux")?;
        Ok(())
    }

    pub async fn send_enter(&self, host: Option<&str>, target: &TmuxTarget) -> Result<()> {
        let args = vec![
            "send-keys".to_string(),
            "-t".to_string(),
            target.to_string(),
            "Enter".to_string(),
        ];
        self.runner.run(host, "tmux", &args).await?.into_result("tmux")?;
        Ok(())
    }

    /// Types `text` then presses Enter.
    ///
    /// `cancel` is checked before each key is sent; once it fires nothing
    /// more reaches the pane and [`TmuxError::Cancelled`] is returned.
    pub async fn send_line(
        &self,
        host: Option<&str>,
        target: &TmuxTarget,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        debug!(host = ?host, %target, chars = text.len(), "sending keys");
        ensure_live(target, cancel)?;
        self.send_literal(host, target, text).await?;
        ensure_live(target, cancel)?;
        self.send_enter(host, target).await
    }
}

fn ensure_live(target: &TmuxTarget, cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TmuxError::Cancelled(target.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::CommandOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(Option<String>, Vec<String>)>>,
        fail: bool,
    }

    #[async_trait]
    impl CommandRunner for Recorder {
        async fn run(&self, host: Option<&str>, _program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((host.map(str::to_string), args.to_vec()));
            if self.fail {
                Ok(CommandOutput::failure(1, "can't find pane"))
            } else {
                Ok(CommandOutput::success(""))
            }
        }
    }

    #[tokio::test]
    async fn test_send_line_types_then_enters() {
        let recorder = Arc::new(Recorder::default());
        let sender = KeySender::new(recorder.clone());
        let target = TmuxTarget::pane("main", 0, 1);

        sender
            .send_line(Some("cluster"), &target, "1", &CancellationToken::new())
            .await
            .unwrap();

        let calls = recorder.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.as_deref(), Some("cluster"));
        assert_eq!(calls[0].1, vec!["send-keys", "-t", "main:0.1", "-l", "1"]);
        assert_eq!(calls[1].1, vec!["send-keys", "-t", "main:0.1", "Enter"]);
    }

    #[tokio::test]
    async fn test_failed_send_stops_before_enter() {
        let recorder = Arc::new(Recorder {
            fail: true,
            ..Default::default()
        });
        let sender = KeySender::new(recorder.clone());

        let result = sender
            .send_line(None, &TmuxTarget::PaneId(3), "2", &CancellationToken::new())
            .await;
        assert!(result.is_err());
        assert_eq!(recorder.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_line_sends_nothing() {
        let recorder = Arc::new(Recorder::default());
        let sender = KeySender::new(recorder.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = sender
            .send_line(None, &TmuxTarget::pane("main", 0, 1), "1", &cancel)
            .await;
        assert!(matches!(result, Err(TmuxError::Cancelled(t)) if t == "main:0.1"));
        assert!(recorder.calls.lock().unwrap().is_empty());
    }
}
