//! User confirmation for sensitive tool calls.
//!
//! A tool whose definition carries a confirmation message is not run until
//! the [`ConfirmationHandler`] approves it. The executor treats a handler
//! that takes longer than the configured timeout as a denial.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// What the user is asked to approve.
#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationRequest {
    /// Qualified tool name, e.g. `shell.run`
    pub tool: String,
    pub message: String,
    /// The bound arguments the tool would receive
    pub arguments: serde_json::Value,
}

#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// `true` approves the call.
    async fn confirm(&self, request: &ConfirmationRequest) -> bool;
}

/// Approves everything. For tests and trusted batch runs.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoApprove;

#[async_trait]
impl ConfirmationHandler for AutoApprove {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        true
    }
}

/// Denies everything. The default: an agent with no way to ask the user
/// must not run sensitive tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDeny;

#[async_trait]
impl ConfirmationHandler for AutoDeny {
    async fn confirm(&self, _request: &ConfirmationRequest) -> bool {
        false
    }
}

/// Decides with a synchronous closure.
pub struct FnConfirmation<F> {
    decide: F,
}

impl<F> FnConfirmation<F>
where
    F: Fn(&ConfirmationRequest) -> bool + Send + Sync,
{
    pub fn new(decide: F) -> Self {
        Self { decide }
    }
}

#[async_trait]
impl<F> ConfirmationHandler for FnConfirmation<F>
where
    F: Fn(&ConfirmationRequest) -> bool + Send + Sync,
{
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        (self.decide)(request)
    }
}

/// Decides with an async closure, e.g. one that prompts on a terminal.
pub struct AsyncFnConfirmation<F> {
    decide: F,
}

impl<F, Fut> AsyncFnConfirmation<F>
where
    F: Fn(ConfirmationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    pub fn new(decide: F) -> Self {
        Self { decide }
    }
}

#[async_trait]
impl<F, Fut> ConfirmationHandler for AsyncFnConfirmation<F>
where
    F: Fn(ConfirmationRequest) -> Fut + Send + Sync,
    Fut: Future<Output = bool> + Send,
{
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        (self.decide)(request.clone()).await
    }
}

/// A confirmation waiting for an answer from the UI side of a
/// [`ChannelConfirmation`].
#[derive(Debug)]
pub struct PendingConfirmation {
    pub request: ConfirmationRequest,
    reply: oneshot::Sender<bool>,
}

impl PendingConfirmation {
    pub fn respond(self, approved: bool) {
        // the executor may have timed out and dropped the receiver
        let _ = self.reply.send(approved);
    }

    pub fn approve(self) {
        self.respond(true);
    }

    pub fn deny(self) {
        self.respond(false);
    }
}

/// Forwards requests over a channel so an interactive front end can answer
/// them asynchronously. A closed channel or a dropped reply counts as a
/// denial.
#[derive(Debug, Clone)]
pub struct ChannelConfirmation {
    sender: mpsc::Sender<PendingConfirmation>,
}

impl ChannelConfirmation {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<PendingConfirmation>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ConfirmationHandler for ChannelConfirmation {
    async fn confirm(&self, request: &ConfirmationRequest) -> bool {
        let (reply, answer) = oneshot::channel();
        let pending = PendingConfirmation {
            request: request.clone(),
            reply,
        };
        if self.sender.send(pending).await.is_err() {
            tracing::warn!(tool = %request.tool, "Confirmation channel closed, denying");
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

/// Ask `handler`, treating a missing answer within `timeout` as a denial.
pub async fn request_confirmation(
    handler: &dyn ConfirmationHandler,
    request: &ConfirmationRequest,
    timeout: Option<Duration>,
) -> bool {
    match timeout {
        None => handler.confirm(request).await,
        Some(limit) => match tokio::time::timeout(limit, handler.confirm(request)).await {
            Ok(approved) => approved,
            Err(_) => {
                tracing::warn!(
                    tool = %request.tool,
                    timeout_secs = limit.as_secs_f64(),
                    "Confirmation timed out, denying"
                );
                false
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(tool: &str) -> ConfirmationRequest {
        ConfirmationRequest {
            tool: tool.into(),
            message: "Allow?".into(),
            arguments: json!({}),
        }
    }

    #[tokio::test]
    async fn fixed_handlers() {
        assert!(AutoApprove.confirm(&request("x.y")).await);
        assert!(!AutoDeny.confirm(&request("x.y")).await);
    }

    #[tokio::test]
    async fn closure_sees_the_request() {
        let handler = FnConfirmation::new(|req: &ConfirmationRequest| req.tool == "files.write");
        assert!(handler.confirm(&request("files.write")).await);
        assert!(!handler.confirm(&request("shell.run")).await);
    }

    #[tokio::test]
    async fn async_closure() {
        let handler = AsyncFnConfirmation::new(|req: ConfirmationRequest| async move {
            tokio::task::yield_now().await;
            req.message == "Allow?"
        });
        assert!(handler.confirm(&request("files.write")).await);
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let (handler, mut pending) = ChannelConfirmation::channel(4);
        let ui = tokio::spawn(async move {
            let first = pending.recv().await.unwrap();
            assert_eq!(first.request.tool, "shell.run");
            first.approve();
            let second = pending.recv().await.unwrap();
            second.deny();
        });
        assert!(handler.confirm(&request("shell.run")).await);
        assert!(!handler.confirm(&request("shell.run")).await);
        ui.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_reply_denies() {
        let (handler, mut pending) = ChannelConfirmation::channel(1);
        tokio::spawn(async move {
            drop(pending.recv().await);
        });
        assert!(!handler.confirm(&request("shell.run")).await);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_denies() {
        let (handler, _pending) = ChannelConfirmation::channel(1);
        let approved =
            request_confirmation(&handler, &request("shell.run"), Some(Duration::from_secs(5))).await;
        assert!(!approved);
    }
}
