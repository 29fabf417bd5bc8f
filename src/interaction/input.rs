//! Modal text input used when creating overlays.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRequest {
    pub prompt: String,
    pub initial: Option<String>,
}

impl InputRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            initial: None,
        }
    }

    pub fn with_initial(mut self, initial: impl Into<String>) -> Self {
        self.initial = Some(initial.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputResponse {
    Submitted(String),
    Cancelled,
}

impl InputResponse {
    /// The submitted value when it has any non-whitespace content.
    pub fn into_value(self) -> Option<String> {
        match self {
            InputResponse::Submitted(value) if !value.trim().is_empty() => Some(value),
            _ => None,
        }
    }
}

/// Asks the user for a single line of input.
#[async_trait]
pub trait InputCapture: Send + Sync {
    async fn request(&self, request: InputRequest) -> InputResponse;
}

/// A request waiting for the host UI to answer it.
#[derive(Debug)]
pub struct PendingInput {
    pub request: InputRequest,
    reply: oneshot::Sender<InputResponse>,
}

impl PendingInput {
    pub fn submit(self, value: impl Into<String>) {
        let _ = self.reply.send(InputResponse::Submitted(value.into()));
    }

    pub fn cancel(self) {
        let _ = self.reply.send(InputResponse::Cancelled);
    }
}

/// [`InputCapture`] backed by a channel the host UI drains.
///
/// Each request is delivered as a [`PendingInput`]; dropping it unanswered, or
/// dropping the receiver, counts as a cancel.
#[derive(Clone)]
pub struct ModalInput {
    sender: mpsc::Sender<PendingInput>,
}

impl ModalInput {
    pub fn new() -> (Self, mpsc::Receiver<PendingInput>) {
        let (sender, receiver) = mpsc::channel(1);
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl InputCapture for ModalInput {
    async fn request(&self, request: InputRequest) -> InputResponse {
        let (reply, answer) = oneshot::channel();
        if self.sender.send(PendingInput { request, reply }).await.is_err() {
            return InputResponse::Cancelled;
        }
        answer.await.unwrap_or(InputResponse::Cancelled)
    }
}
