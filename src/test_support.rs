//! Fakes for the external collaborators, shared by unit tests.

use crate::completion::{CompletionClient, CompletionError};
use crate::models::ChatMessage;
use crate::pdf_parser::{Extraction, TextExtractor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum Reply {
    Fixed(String),
    Numbered,
    Fail,
    Panic,
}

/// Completion client that records every message list it receives
pub struct ScriptedCompletion {
    reply: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompletion {
    pub fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self::build(Reply::Fixed(text.to_string()), None))
    }

    /// Answers the nth call with "result n"
    pub fn numbered() -> Arc<Self> {
        Arc::new(Self::build(Reply::Numbered, None))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::build(Reply::Fail, None))
    }

    /// Panics inside `complete`, like a client with a bug
    pub fn panicking() -> Arc<Self> {
        Arc::new(Self::build(Reply::Panic, None))
    }

    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(Reply::Fixed(text.to_string()), Some(delay)))
    }

    fn build(reply: Reply, delay: Option<Duration>) -> Self {
        Self {
            reply,
            delay,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, CompletionError> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(messages.to_vec());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match &self.reply {
            Reply::Fixed(text) => Ok(text.clone()),
            Reply::Numbered => Ok(format!("result {}", n)),
            Reply::Fail => Err(CompletionError::Status {
                status: 500,
                body: "backend down".to_string(),
            }),
            Reply::Panic => panic!("completion client crashed"),
        }
    }
}

/// Extractor returning the same outcome for every source
pub struct StaticExtractor {
    outcome: Extraction,
    calls: AtomicUsize,
}

impl StaticExtractor {
    pub fn pages(pages: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            outcome: Extraction::Text {
                text: crate::chunker::mark_pages(pages.iter().copied()),
                page_count: pages.len(),
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn unreadable() -> Arc<Self> {
        Arc::new(Self {
            outcome: Extraction::Unreadable {
                diagnostic: "not a PDF".to_string(),
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextExtractor for StaticExtractor {
    async fn extract(&self, _source: Arc<[u8]>) -> Extraction {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}
