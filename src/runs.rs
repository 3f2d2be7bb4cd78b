use crate::completion::CompletionClient;
use crate::error::{CoreError, Result};
use crate::models::{next_id, now_millis, ChatMessage, Run, RunInput, RunStatus, RunType};
use crate::store::CollectionStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Output stored on a run whose completion call failed
pub const FAILURE_MARKER: &str = "AI Processing Failed";

const TUTOR_INSTRUCTION: &str = "You are an academic tutor. For the passage the user selected, \
provide a concept explanation, background context, or guiding critical questions.";

const REGION_INSTRUCTION: &str = "You are an academic tutor. The user marked a rectangular region \
of a paper page (a figure, table or formula). Coordinates are fractions of the page width and \
height. Explain what such a region most likely shows and how to read it.";

const ASSISTANT_INSTRUCTION: &str = "You are an academic research assistant.";

const DEFAULT_SELECTION_PROMPT: &str = "Explain this concept and recommend related literature.";
const DEFAULT_REGION_PROMPT: &str = "Explain what this region of the page shows.";
const DEFAULT_CHAT_PROMPT: &str = "Hello";

/// Owns the lifecycle of runs: creation, one background processing attempt
/// per run, and snapshot reads for pollers.
#[derive(Clone)]
pub struct RunEngine {
    store: CollectionStore,
    completion: Arc<dyn CompletionClient>,
    output_language: String,
    /// repo id -> runs, newest first
    runs: Arc<Mutex<HashMap<String, Vec<Run>>>>,
}

impl RunEngine {
    pub fn new(
        store: CollectionStore,
        completion: Arc<dyn CompletionClient>,
        output_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            completion,
            output_language: output_language.into(),
            runs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<Run>>> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a queued run and schedule its processing without waiting for it.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn create_run(&self, repo_id: &str, run_type: RunType, input: RunInput) -> Result<Run> {
        if !self.store.exists(repo_id) {
            return Err(CoreError::CollectionNotFound(repo_id.to_string()));
        }

        let run = Run {
            id: next_id("run"),
            repo_id: repo_id.to_string(),
            run_type,
            status: RunStatus::Queued,
            input,
            output: None,
            created_at: now_millis(),
        };

        self.lock()
            .entry(repo_id.to_string())
            .or_default()
            .insert(0, run.clone());
        log::info!("Queued {:?} run {} for collection {}", run_type, run.id, repo_id);

        let engine = self.clone();
        let run_id = run.id.clone();
        tokio::spawn(async move {
            engine.process_run(&run_id).await;
        });

        Ok(run)
    }

    /// Single processing attempt. A run that is not `queued` is left alone,
    /// so a second invocation for the same id does nothing.
    async fn process_run(&self, run_id: &str) {
        let Some(run) = self.advance(run_id, RunStatus::Processing, None) else {
            return;
        };

        let messages = build_messages(&run, &self.output_language);
        let client = Arc::clone(&self.completion);

        // A panicking client must still settle the run
        let outcome = tokio::spawn(async move { client.complete(&messages).await }).await;

        match outcome {
            Ok(Ok(output)) => {
                self.advance(run_id, RunStatus::Completed, Some(output));
            }
            Ok(Err(e)) => {
                log::warn!("Run {} failed: {}", run_id, e);
                self.advance(run_id, RunStatus::Failed, Some(FAILURE_MARKER.to_string()));
            }
            Err(e) => {
                log::error!("Run {} completion task aborted: {}", run_id, e);
                self.advance(run_id, RunStatus::Failed, Some(FAILURE_MARKER.to_string()));
            }
        }
    }

    /// Move a run one step forward. Returns the updated snapshot, or `None`
    /// when the run is gone or the transition would go backwards.
    fn advance(&self, run_id: &str, next: RunStatus, output: Option<String>) -> Option<Run> {
        let mut runs = self.lock();
        let Some(run) = runs.values_mut().flat_map(|list| list.iter_mut()).find(|r| r.id == run_id) else {
            log::debug!("Run {} disappeared before reaching {:?}", run_id, next);
            return None;
        };

        if !run.status.can_advance_to(next) {
            log::warn!("Rejected run {} transition {:?} -> {:?}", run_id, run.status, next);
            return None;
        }

        run.status = next;
        if output.is_some() {
            run.output = output;
        }
        log::info!("Run {} is now {:?}", run_id, next);
        Some(run.clone())
    }

    /// Snapshot of a collection's runs, newest first
    pub fn get_runs(&self, repo_id: &str) -> Vec<Run> {
        self.lock().get(repo_id).cloned().unwrap_or_default()
    }

    pub fn get_run(&self, run_id: &str) -> Result<Run> {
        self.lock()
            .values()
            .flat_map(|list| list.iter())
            .find(|r| r.id == run_id)
            .cloned()
            .ok_or_else(|| CoreError::RunNotFound(run_id.to_string()))
    }

    /// Submit a failed run's type and input again as a brand-new run.
    /// The failed run keeps its terminal status.
    pub fn resubmit(&self, run_id: &str) -> Result<Run> {
        let failed = self.get_run(run_id)?;
        if failed.status != RunStatus::Failed {
            return Err(CoreError::NotResubmittable(run_id.to_string()));
        }
        self.create_run(&failed.repo_id, failed.run_type, failed.input)
    }

    /// Drop every run of a deleted collection
    pub fn purge(&self, repo_id: &str) -> usize {
        let removed = self.lock().remove(repo_id).map(|runs| runs.len()).unwrap_or(0);
        log::info!("Purged {} runs of collection {}", removed, repo_id);
        removed
    }

    /// Poll a run every `interval` until it settles or `max_polls` reads have
    /// been made; returns the last snapshot either way.
    pub async fn wait_until_settled(&self, run_id: &str, interval: Duration, max_polls: usize) -> Result<Run> {
        let mut run = self.get_run(run_id)?;
        for _ in 0..max_polls {
            if run.status.is_terminal() {
                break;
            }
            tokio::time::sleep(interval).await;
            run = self.get_run(run_id)?;
        }
        Ok(run)
    }
}

fn non_empty_or<'a>(prompt: &'a str, fallback: &'a str) -> &'a str {
    if prompt.trim().is_empty() {
        fallback
    } else {
        prompt
    }
}

/// System instruction chosen by run type, then one user message
pub fn build_messages(run: &Run, output_language: &str) -> Vec<ChatMessage> {
    let input = &run.input;
    let (instruction, user) = match run.run_type {
        RunType::TextSelection => {
            let mut user = format!(
                "Context: \"{}\"\nSelected: \"{}\"\n",
                input.context.as_deref().unwrap_or(""),
                input.text.as_deref().unwrap_or("")
            );
            if let Some(page) = input.page {
                user.push_str(&format!("Page: {}\n", page));
            }
            user.push_str(&format!(
                "Prompt: \"{}\"",
                non_empty_or(&input.prompt, DEFAULT_SELECTION_PROMPT)
            ));
            (TUTOR_INSTRUCTION, user)
        }
        RunType::RegionSelection => {
            let mut user = String::new();
            if let Some([x, y, w, h]) = input.bbox {
                user.push_str(&format!(
                    "Region on page {}: x={:.3}, y={:.3}, width={:.3}, height={:.3}\n",
                    input.page.unwrap_or(1),
                    x,
                    y,
                    w,
                    h
                ));
            }
            user.push_str(&format!(
                "Prompt: \"{}\"",
                non_empty_or(&input.prompt, DEFAULT_REGION_PROMPT)
            ));
            (REGION_INSTRUCTION, user)
        }
        RunType::Chat => (
            ASSISTANT_INSTRUCTION,
            non_empty_or(&input.prompt, DEFAULT_CHAT_PROMPT).to_string(),
        ),
    };

    vec![
        ChatMessage::system(format!("{} Answer in {}.", instruction, output_language)),
        ChatMessage::user(user),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::test_support::ScriptedCompletion;

    const POLL: Duration = Duration::from_millis(5);

    fn engine_with(client: Arc<ScriptedCompletion>) -> (RunEngine, String) {
        let store = CollectionStore::new();
        let repo = store.import("paper.pdf", vec![1], 3);
        (RunEngine::new(store, client, "English"), repo.id)
    }

    #[tokio::test]
    async fn test_text_selection_run_completes_with_default_prompt() {
        let client = ScriptedCompletion::replying("Gradient descent walks downhill.");
        let (engine, repo_id) = engine_with(client.clone());

        let input = RunInput {
            text: Some("gradient descent".to_string()),
            context: Some("...gradient descent converges...".to_string()),
            page: Some(3),
            ..RunInput::default()
        };
        let run = engine.create_run(&repo_id, RunType::TextSelection, input).unwrap();
        assert_eq!(run.status, RunStatus::Queued);
        assert!(run.output.is_none());

        let settled = engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();
        assert_eq!(settled.status, RunStatus::Completed);
        assert_eq!(settled.output.as_deref(), Some("Gradient descent walks downhill."));

        let calls = client.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0][0].role, Role::System);
        assert!(calls[0][0].content.contains("Answer in English."));
        let user = &calls[0][1].content;
        assert!(user.contains("Selected: \"gradient descent\""));
        assert!(user.contains("Page: 3"));
        assert!(user.contains(DEFAULT_SELECTION_PROMPT));
    }

    #[tokio::test]
    async fn test_failed_completion_settles_run_as_failed_without_retry() {
        let client = ScriptedCompletion::failing();
        let (engine, repo_id) = engine_with(client.clone());

        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        let settled = engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        assert_eq!(settled.status, RunStatus::Failed);
        assert_eq!(settled.output.as_deref(), Some(FAILURE_MARKER));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_panicking_client_still_settles_run() {
        let client = ScriptedCompletion::panicking();
        let (engine, repo_id) = engine_with(client.clone());

        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        let settled = engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        assert_eq!(settled.status, RunStatus::Failed);
        assert_eq!(settled.output.as_deref(), Some(FAILURE_MARKER));
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_create_returns_before_processing_finishes() {
        let client = ScriptedCompletion::slow("done", Duration::from_millis(100));
        let (engine, repo_id) = engine_with(client);

        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        // Mid-flight reads are fine
        let snapshot = engine.get_run(&run.id).unwrap();
        assert!(!snapshot.status.is_terminal());

        let settled = engine.wait_until_settled(&run.id, POLL, 500).await.unwrap();
        assert_eq!(settled.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_processing_is_attempted_once() {
        let client = ScriptedCompletion::replying("ok");
        let (engine, repo_id) = engine_with(client.clone());

        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        engine.process_run(&run.id).await;

        assert_eq!(client.call_count(), 1);
        assert_eq!(engine.get_run(&run.id).unwrap().status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_status_never_reverts() {
        let client = ScriptedCompletion::replying("ok");
        let (engine, repo_id) = engine_with(client);

        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        assert!(engine.advance(&run.id, RunStatus::Processing, None).is_none());
        assert!(engine
            .advance(&run.id, RunStatus::Failed, Some("late".to_string()))
            .is_none());

        let run = engine.get_run(&run.id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.output.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_runs_are_listed_newest_first() {
        let client = ScriptedCompletion::replying("ok");
        let (engine, repo_id) = engine_with(client);

        let first = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("one"))
            .unwrap();
        let second = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("two"))
            .unwrap();

        let ids: Vec<String> = engine.get_runs(&repo_id).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
        assert!(engine.get_runs("other-repo").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection_is_rejected() {
        let (engine, _) = engine_with(ScriptedCompletion::replying("ok"));
        let err = engine
            .create_run("repo-missing", RunType::Chat, RunInput::prompt("hi"))
            .unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotFound(_)));
    }

    #[tokio::test]
    async fn test_resubmit_creates_new_run() {
        let client = ScriptedCompletion::failing();
        let (engine, repo_id) = engine_with(client.clone());

        let failed = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("again"))
            .unwrap();
        engine.wait_until_settled(&failed.id, POLL, 200).await.unwrap();

        let retry = engine.resubmit(&failed.id).unwrap();
        assert_ne!(retry.id, failed.id);
        assert_eq!(retry.input, failed.input);
        engine.wait_until_settled(&retry.id, POLL, 200).await.unwrap();

        assert_eq!(engine.get_run(&failed.id).unwrap().status, RunStatus::Failed);
        assert_eq!(engine.get_runs(&repo_id).len(), 2);
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_resubmit_rejects_non_failed_runs() {
        let (engine, repo_id) = engine_with(ScriptedCompletion::replying("ok"));
        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        assert!(matches!(
            engine.resubmit(&run.id),
            Err(CoreError::NotResubmittable(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_removes_collection_runs() {
        let (engine, repo_id) = engine_with(ScriptedCompletion::replying("ok"));
        let run = engine
            .create_run(&repo_id, RunType::Chat, RunInput::prompt("hi"))
            .unwrap();
        engine.wait_until_settled(&run.id, POLL, 200).await.unwrap();

        assert_eq!(engine.purge(&repo_id), 1);
        assert!(engine.get_runs(&repo_id).is_empty());
        assert!(matches!(engine.get_run(&run.id), Err(CoreError::RunNotFound(_))));
    }

    #[test]
    fn test_message_building_per_type() {
        let mut run = Run {
            id: "run-1".to_string(),
            repo_id: "repo-1".to_string(),
            run_type: RunType::Chat,
            status: RunStatus::Queued,
            input: RunInput::default(),
            output: None,
            created_at: 0,
        };

        let chat = build_messages(&run, "Chinese");
        assert_eq!(chat.len(), 2);
        assert_eq!(chat[1].content, "Hello");
        assert!(chat[0].content.ends_with("Answer in Chinese."));

        run.run_type = RunType::RegionSelection;
        run.input = RunInput {
            bbox: Some([0.1, 0.2, 0.3, 0.4]),
            page: Some(2),
            prompt: "What is plotted?".to_string(),
            ..RunInput::default()
        };
        let region = build_messages(&run, "Chinese");
        assert!(region[0].content.starts_with(REGION_INSTRUCTION));
        assert!(region[1]
            .content
            .contains("Region on page 2: x=0.100, y=0.200, width=0.300, height=0.400"));
        assert!(region[1].content.contains("What is plotted?"));
    }
}
