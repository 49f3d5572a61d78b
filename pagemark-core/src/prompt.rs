//! Modal text prompt used when a click creates a text label or comment.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    Text,
    Comment,
}

impl PromptKind {
    pub fn title(&self) -> &'static str {
        match self {
            PromptKind::Text => "Text label",
            PromptKind::Comment => "Comment",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PromptRequest {
    pub kind: PromptKind,
    pub initial: String,
}

impl PromptRequest {
    pub fn new(kind: PromptKind) -> Self {
        Self {
            kind,
            initial: String::new(),
        }
    }
}

/// Suspends until the user answers. `None` means cancelled.
#[async_trait]
pub trait TextPrompt: Send + Sync {
    async fn ask(&self, request: &PromptRequest) -> Option<String>;
}

/// Trims an answer and treats blank input as cancellation.
pub fn clean_answer(answer: Option<String>) -> Option<String> {
    answer
        .map(|text| text.trim().to_owned())
        .filter(|text| !text.is_empty())
}

/// Prompt that replays pre-recorded answers, then cancels.
#[derive(Debug, Default)]
pub struct QueuedPrompt {
    answers: Mutex<VecDeque<Option<String>>>,
}

impl QueuedPrompt {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = Option<S>>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(|a| a.map(Into::into)).collect()),
        }
    }

    pub fn push(&self, answer: Option<String>) {
        self.answers.lock().push_back(answer);
    }
}

#[async_trait]
impl TextPrompt for QueuedPrompt {
    async fn ask(&self, _request: &PromptRequest) -> Option<String> {
        self.answers.lock().pop_front().flatten()
    }
}
