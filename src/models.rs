use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static ID_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Build a creation-time derived identifier: `<prefix>-<unix millis>-<seq>`.
///
/// The trailing sequence keeps ids unique when several objects are created
/// within the same millisecond.
pub fn next_id(prefix: &str) -> String {
    let seq = ID_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    format!("{}-{}-{}", prefix, chrono::Utc::now().timestamp_millis(), seq)
}

/// Current time in unix milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A collection ("repo"): one original source document plus its derivatives
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: String,
    pub authors: Vec<String>,
    pub year: String,
    pub tags: Vec<String>,
    pub page_count: usize,
    pub imported_at: i64,
    pub documents: Vec<GeneratedDocument>,
}

/// Partial metadata update for a collection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub authors: Option<Vec<String>>,
    pub year: Option<String>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Original,
    Translation,
    Analysis,
    Comparison,
}

/// Either generated Markdown text or the binary source it was derived from.
/// A document never carries both.
#[derive(Debug, Clone)]
pub enum DocumentBody {
    Text(String),
    Source(Arc<[u8]>),
}

impl Serialize for DocumentBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("DocumentBody", 2)?;
        match self {
            DocumentBody::Text(content) => {
                state.serialize_field("format", "markdown")?;
                state.serialize_field("content", content)?;
            }
            DocumentBody::Source(bytes) => {
                state.serialize_field("format", "pdf")?;
                state.serialize_field("size", &bytes.len())?;
            }
        }
        state.end()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedDocument {
    pub id: String,
    pub name: String,
    pub kind: DocumentKind,
    #[serde(flatten)]
    pub body: DocumentBody,
    pub created_at: i64,
}

impl GeneratedDocument {
    pub fn original(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: next_id("file"),
            name: name.into(),
            kind: DocumentKind::Original,
            body: DocumentBody::Source(Arc::from(bytes)),
            created_at: now_millis(),
        }
    }

    pub fn markdown(name: impl Into<String>, kind: DocumentKind, content: String) -> Self {
        Self {
            id: next_id("file"),
            name: name.into(),
            kind,
            body: DocumentBody::Text(content),
            created_at: now_millis(),
        }
    }

    pub fn content(&self) -> Option<&str> {
        match &self.body {
            DocumentBody::Text(content) => Some(content),
            DocumentBody::Source(_) => None,
        }
    }

    pub fn source(&self) -> Option<&Arc<[u8]>> {
        match &self.body {
            DocumentBody::Source(bytes) => Some(bytes),
            DocumentBody::Text(_) => None,
        }
    }
}

/// Cross-collection pointer to a document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub repo_id: String,
    pub document_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    TextSelection,
    RegionSelection,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    /// Only forward, single-step transitions are legal:
    /// queued -> processing -> {completed, failed}
    pub fn can_advance_to(self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Queued, RunStatus::Processing)
                | (RunStatus::Processing, RunStatus::Completed)
                | (RunStatus::Processing, RunStatus::Failed)
        )
    }
}

/// Prompt plus optional selection context.
/// Text selections fill `text`/`context`, region selections fill `bbox`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Normalized `[x, y, width, height]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(default)]
    pub prompt: String,
}

impl RunInput {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub repo_id: String,
    #[serde(rename = "type")]
    pub run_type: RunType,
    pub status: RunStatus,
    pub input: RunInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Text selected inside a document pane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionEvent {
    pub text: String,
    pub context: String,
    /// 1-indexed page containing the selection anchor
    pub page: u32,
}

/// Rectangle selected on a page, every spatial field normalized to `[0, 1]`
/// of the capturing page surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionEvent {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub page: u32,
}
