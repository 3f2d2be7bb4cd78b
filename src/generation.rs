use crate::chunker::{group_pages, markdown_to_text, split_pages, truncate_chars};
use crate::completion::CompletionClient;
use crate::error::{CoreError, Result};
use crate::models::{ChatMessage, DocumentBody, DocumentKind, DocumentRef, GeneratedDocument};
use crate::pdf_parser::{Extraction, TextExtractor};
use crate::store::CollectionStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Placed between translated chunks
pub const CHUNK_SEPARATOR: &str = "\n\n---\n\n";

/// Placed between labeled excerpts in a comparison request
pub const EXCERPT_DELIMITER: &str = "\n\n----------------\n\n";

/// Characters of each document sent to a comparison
pub const COMPARISON_CHAR_CAP: usize = 10_000;

pub const COMPARISON_OUTPUT_NAME: &str = "Comparison Matrix.md";

const COMPARE_INSTRUCTION: &str = "You are writing an academic literature review. Build a comparison \
matrix of the provided documents (or parts). Produce a Markdown table with one column per document \
and one row per dimension: 1. Core Problem 2. Methodology 3. Dataset 4. Key Results 5. Limitations. \
Below the table, summarize the main contradictions or complementary relationships between them.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GenerationKind {
    Translation,
    Methodology,
    Critique,
    ConceptGraph,
    ResearchGaps,
    PodcastScript,
}

/// How the extracted text is split across completion calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPolicy {
    /// One call over the entire text
    WholeText,
    /// One call per group of pages, reading at most `max_pages`
    PageGroups { pages_per_call: usize, max_pages: usize },
}

#[derive(Debug)]
pub struct GenerationProfile {
    pub kind: GenerationKind,
    pub instruction: &'static str,
    /// Prepended to the extracted text in the user message
    pub lead_in: &'static str,
    /// Prepended to the concatenated output
    pub heading: Option<&'static str>,
    pub output_name: &'static str,
    pub document_kind: DocumentKind,
    pub chunking: ChunkPolicy,
}

/// Indexed by `GenerationKind as usize`
static PROFILES: [GenerationProfile; 6] = [
    GenerationProfile {
        kind: GenerationKind::Translation,
        instruction: "You are a professional translator of academic papers. Translate the provided \
paper excerpt. Requirements: 1. Keep the Markdown structure (headings, lists, code blocks). \
2. Keep math formulas in LaTeX. 3. Translate terminology accurately in an academic register. \
4. Output only the translated body, with no preamble or closing remarks.",
        lead_in: "",
        heading: Some("# Full Translation"),
        output_name: "Full Translation.md",
        document_kind: DocumentKind::Translation,
        chunking: ChunkPolicy::PageGroups {
            pages_per_call: 2,
            max_pages: 6,
        },
    },
    GenerationProfile {
        kind: GenerationKind::Methodology,
        instruction: "You are a senior researcher fluent in algorithms and experimental design. \
Extract the research methodology of this paper and write a teaching guide covering: \
1. Core algorithm flow, step by step. 2. The meaning of the key formulas. \
3. Implementation details (hyperparameters, training tricks, data processing). \
4. Pitfalls to expect when reproducing the method. Use Markdown.",
        lead_in: "Full Paper Content:",
        heading: None,
        output_name: "Methodology Guide.md",
        document_kind: DocumentKind::Analysis,
        chunking: ChunkPolicy::WholeText,
    },
    GenerationProfile {
        kind: GenerationKind::Critique,
        instruction: "You are \"Reviewer #2\", a famously strict reviewer. Run a critical-thinking \
review of this paper covering: 1. Logical gaps in the argument. 2. Whether the evidence supports \
the claims, or overclaims. 3. Alternative explanations for the observed results. 4. Bias in the \
choice of baselines or datasets. Use Markdown and stay objective, sharp and well argued.",
        lead_in: "Full Paper Content:",
        heading: None,
        output_name: "Critical Review.md",
        document_kind: DocumentKind::Analysis,
        chunking: ChunkPolicy::WholeText,
    },
    GenerationProfile {
        kind: GenerationKind::ConceptGraph,
        instruction: "You are a knowledge graph expert. Analyze the core concepts of this paper and \
produce Mermaid.js flowchart or mindmap code showing how they relate (cause, containment, contrast). \
Output only the Mermaid code block with no explanation, use `graph TD` or `mindmap` syntax, and make \
sure the code renders.",
        lead_in: "Analyze the concepts in this paper:",
        heading: None,
        output_name: "Concept Map.md",
        document_kind: DocumentKind::Analysis,
        chunking: ChunkPolicy::WholeText,
    },
    GenerationProfile {
        kind: GenerationKind::ResearchGaps,
        instruction: "You are a forward-looking research strategist. Mine this paper for future \
opportunities: 1. Open problems it leaves unsolved. 2. Conclusions that conflict with mainstream \
views or classic papers. 3. Other fields the method could transfer to. 4. The next research topic \
a PhD student should pick in this direction. Use Markdown.",
        lead_in: "Find research gaps in this paper:",
        heading: None,
        output_name: "Research Gaps and Trends.md",
        document_kind: DocumentKind::Analysis,
        chunking: ChunkPolicy::WholeText,
    },
    GenerationProfile {
        kind: GenerationKind::PodcastScript,
        instruction: "You produce a popular tech podcast. Read this paper and write a dialogue script \
between two hosts. Host A is curious, asks questions and speaks for the general listener. Host B is \
a witty domain expert who explains hard ideas with everyday analogies. Keep it conversational, open \
with \"Welcome to today's Deep Dive\", cover the problem, the innovation and why it matters, mark \
turns with **Host A:** and **Host B:**, and aim for 5-8 minutes of reading.",
        lead_in: "Create a podcast script for this paper:",
        heading: None,
        output_name: "Podcast Script (Deep Dive).md",
        document_kind: DocumentKind::Analysis,
        chunking: ChunkPolicy::WholeText,
    },
];

impl GenerationKind {
    pub const ALL: [GenerationKind; 6] = [
        GenerationKind::Translation,
        GenerationKind::Methodology,
        GenerationKind::Critique,
        GenerationKind::ConceptGraph,
        GenerationKind::ResearchGaps,
        GenerationKind::PodcastScript,
    ];

    pub fn profile(self) -> &'static GenerationProfile {
        &PROFILES[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GenerationKind::Translation => "translation",
            GenerationKind::Methodology => "methodology",
            GenerationKind::Critique => "critique",
            GenerationKind::ConceptGraph => "concept-graph",
            GenerationKind::ResearchGaps => "research-gaps",
            GenerationKind::PodcastScript => "podcast-script",
        }
    }
}

impl fmt::Display for GenerationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        GenerationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown generation kind: {}", s))
    }
}

/// Extract -> chunk-or-not -> complete -> concatenate -> attach.
///
/// Holds no lock across awaits: concurrent generations on one collection
/// each append their own document in whatever order they finish.
#[derive(Clone)]
pub struct GenerationPipeline {
    store: CollectionStore,
    extractor: Arc<dyn TextExtractor>,
    completion: Arc<dyn CompletionClient>,
    output_language: String,
}

impl GenerationPipeline {
    pub fn new(
        store: CollectionStore,
        extractor: Arc<dyn TextExtractor>,
        completion: Arc<dyn CompletionClient>,
        output_language: impl Into<String>,
    ) -> Self {
        Self {
            store,
            extractor,
            completion,
            output_language: output_language.into(),
        }
    }

    /// Generate a derivative of the collection's original document and
    /// attach it. Any failure aborts before anything is attached.
    pub async fn generate(&self, repo_id: &str, kind: GenerationKind) -> Result<GeneratedDocument> {
        let profile = kind.profile();
        log::info!("Generating {} for collection {}", kind, repo_id);

        let original = self.store.original(repo_id)?;
        let text = self.document_text(&original).await?;

        let content = match profile.chunking {
            ChunkPolicy::WholeText => {
                let user = format!("{}\n{}", profile.lead_in, text);
                self.complete(profile.instruction, user).await?
            }
            ChunkPolicy::PageGroups {
                pages_per_call,
                max_pages,
            } => {
                let pages = split_pages(&text);
                let groups = group_pages(&pages, pages_per_call, max_pages);
                if groups.is_empty() {
                    return Err(CoreError::ExtractionFailure(
                        "source has no page text".to_string(),
                    ));
                }

                let mut parts = Vec::with_capacity(groups.len());
                for (idx, group) in groups.into_iter().enumerate() {
                    log::debug!("{} chunk {} ({} chars)", kind, idx + 1, group.len());
                    let user = if profile.lead_in.is_empty() {
                        group
                    } else {
                        format!("{}\n{}", profile.lead_in, group)
                    };
                    parts.push(self.complete(profile.instruction, user).await?);
                }
                parts.join(CHUNK_SEPARATOR)
            }
        };

        let content = match profile.heading {
            Some(heading) => format!("{}\n\n{}", heading, content),
            None => content,
        };

        let document = GeneratedDocument::markdown(profile.output_name, profile.document_kind, content);
        self.store.append_document(repo_id, document)
    }

    /// Compare documents that may live in other collections; the result is
    /// attached to `repo_id`.
    pub async fn compare(&self, repo_id: &str, refs: &[DocumentRef]) -> Result<GeneratedDocument> {
        self.store.get(repo_id)?;

        let documents = refs
            .iter()
            .map(|r| self.store.document(&r.repo_id, &r.document_id))
            .collect::<Result<Vec<_>>>()?;

        self.compare_documents(repo_id, &documents).await
    }

    pub async fn compare_documents(
        &self,
        repo_id: &str,
        documents: &[GeneratedDocument],
    ) -> Result<GeneratedDocument> {
        if documents.len() < 2 {
            return Err(CoreError::InvalidComparison(format!(
                "need at least 2 documents, got {}",
                documents.len()
            )));
        }
        self.store.get(repo_id)?;
        log::info!("Comparing {} documents into collection {}", documents.len(), repo_id);

        let mut excerpts = Vec::with_capacity(documents.len());
        for document in documents {
            let text = self.document_text(document).await?;
            excerpts.push(format!(
                "Document ({}):\n{}",
                document.name,
                truncate_chars(&text, COMPARISON_CHAR_CAP)
            ));
        }

        let user = format!("Compare the following texts:\n\n{}", excerpts.join(EXCERPT_DELIMITER));
        let content = self.complete(COMPARE_INSTRUCTION, user).await?;

        let document = GeneratedDocument::markdown(COMPARISON_OUTPUT_NAME, DocumentKind::Comparison, content);
        self.store.append_document(repo_id, document)
    }

    /// Plain text of a document: extracted for binary sources, flattened
    /// Markdown for generated ones
    async fn document_text(&self, document: &GeneratedDocument) -> Result<String> {
        match &document.body {
            DocumentBody::Source(bytes) => match self.extractor.extract(Arc::clone(bytes)).await {
                Extraction::Text { text, .. } => Ok(text),
                Extraction::Unreadable { diagnostic } => {
                    log::warn!("Cannot read '{}': {}", document.name, diagnostic);
                    Err(CoreError::ExtractionFailure(diagnostic))
                }
            },
            DocumentBody::Text(content) => Ok(markdown_to_text(content)),
        }
    }

    async fn complete(&self, instruction: &str, user: String) -> Result<String> {
        let messages = [
            ChatMessage::system(format!(
                "{} Write the entire answer in {}.",
                instruction, self.output_language
            )),
            ChatMessage::user(user),
        ];
        Ok(self.completion.complete(&messages).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_millis, Collection};
    use crate::test_support::{ScriptedCompletion, StaticExtractor};

    const SIX_PAGES: [&str; 6] = ["page one", "page two", "page three", "page four", "page five", "page six"];

    fn pipeline(
        extractor: Arc<StaticExtractor>,
        completion: Arc<ScriptedCompletion>,
    ) -> (GenerationPipeline, CollectionStore) {
        let store = CollectionStore::new();
        let pipeline = GenerationPipeline::new(store.clone(), extractor, completion, "Chinese");
        (pipeline, store)
    }

    #[test]
    fn test_profile_table_is_indexed_by_kind() {
        for kind in GenerationKind::ALL {
            assert_eq!(kind.profile().kind, kind);
            assert_eq!(kind.as_str().parse::<GenerationKind>().unwrap(), kind);
        }
        assert!("summary".parse::<GenerationKind>().is_err());

        let chunked: Vec<_> = GenerationKind::ALL
            .into_iter()
            .filter(|k| k.profile().chunking != ChunkPolicy::WholeText)
            .collect();
        assert_eq!(chunked, vec![GenerationKind::Translation]);
    }

    #[tokio::test]
    async fn test_translation_of_six_pages_uses_three_calls() {
        let completion = ScriptedCompletion::numbered();
        let (pipeline, store) = pipeline(StaticExtractor::pages(&SIX_PAGES), completion.clone());
        let repo = store.import("paper.pdf", vec![1], 6);

        let doc = pipeline.generate(&repo.id, GenerationKind::Translation).await.unwrap();

        let calls = completion.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[0][1].content.contains("page one"));
        assert!(calls[0][1].content.contains("page two"));
        assert!(!calls[0][1].content.contains("page three"));
        assert!(calls[2][1].content.contains("page six"));
        assert!(calls[0][0].content.ends_with("Write the entire answer in Chinese."));

        assert_eq!(doc.kind, DocumentKind::Translation);
        assert_eq!(doc.name, "Full Translation.md");
        let content = doc.content().unwrap();
        assert!(content.starts_with("# Full Translation"));
        assert_eq!(content.matches(CHUNK_SEPARATOR).count(), 2);
        let r1 = content.find("result 1").unwrap();
        let r3 = content.find("result 3").unwrap();
        assert!(r1 < r3);
    }

    #[tokio::test]
    async fn test_translation_caps_pages() {
        let completion = ScriptedCompletion::numbered();
        let pages = ["a1", "a2", "a3", "a4", "a5", "a6", "a7", "a8", "a9"];
        let (pipeline, store) = pipeline(StaticExtractor::pages(&pages), completion.clone());
        let repo = store.import("long.pdf", vec![1], 9);

        pipeline.generate(&repo.id, GenerationKind::Translation).await.unwrap();

        assert_eq!(completion.call_count(), 3);
        assert!(completion.calls().iter().all(|c| !c[1].content.contains("a7")));
    }

    #[tokio::test]
    async fn test_whole_text_kinds_make_one_call() {
        for kind in GenerationKind::ALL.into_iter().filter(|k| *k != GenerationKind::Translation) {
            let completion = ScriptedCompletion::replying("analysis body");
            let (pipeline, store) = pipeline(StaticExtractor::pages(&SIX_PAGES), completion.clone());
            let repo = store.import("paper.pdf", vec![1], 6);

            let doc = pipeline.generate(&repo.id, kind).await.unwrap();

            assert_eq!(completion.call_count(), 1, "{}", kind);
            let user = &completion.calls()[0][1].content;
            assert!(user.starts_with(kind.profile().lead_in));
            assert!(user.contains("page one") && user.contains("page six"));
            assert_eq!(doc.kind, DocumentKind::Analysis);
            assert_eq!(doc.name, kind.profile().output_name);
            assert_eq!(doc.content(), Some("analysis body"));
            assert_eq!(store.get(&repo.id).unwrap().documents.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_missing_original_fails_and_leaves_collection_unchanged() {
        let completion = ScriptedCompletion::replying("unused");
        let extractor = StaticExtractor::pages(&SIX_PAGES);
        let (pipeline, store) = pipeline(extractor.clone(), completion.clone());
        store.insert(Collection {
            id: "repo-empty".to_string(),
            name: "empty".to_string(),
            description: String::new(),
            authors: vec![],
            year: "2024".to_string(),
            tags: vec![],
            page_count: 1,
            imported_at: now_millis(),
            documents: vec![GeneratedDocument::markdown(
                "notes.md",
                DocumentKind::Analysis,
                "old".to_string(),
            )],
        });

        let err = pipeline
            .generate("repo-empty", GenerationKind::Methodology)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::NoSourceDocument));
        assert_eq!(store.get("repo-empty").unwrap().documents.len(), 1);
        assert_eq!(extractor.call_count(), 0);
        assert_eq!(completion.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_source_aborts() {
        let completion = ScriptedCompletion::replying("unused");
        let (pipeline, store) = pipeline(StaticExtractor::unreadable(), completion.clone());
        let repo = store.import("scan.pdf", vec![1], 1);

        let err = pipeline.generate(&repo.id, GenerationKind::Critique).await.unwrap_err();

        assert!(matches!(err, CoreError::ExtractionFailure(_)));
        assert_eq!(completion.call_count(), 0);
        assert_eq!(store.get(&repo.id).unwrap().documents.len(), 1);
    }

    #[tokio::test]
    async fn test_completion_failure_attaches_nothing() {
        let completion = ScriptedCompletion::failing();
        let (pipeline, store) = pipeline(StaticExtractor::pages(&SIX_PAGES), completion.clone());
        let repo = store.import("paper.pdf", vec![1], 6);

        let err = pipeline.generate(&repo.id, GenerationKind::Translation).await.unwrap_err();

        assert!(matches!(err, CoreError::CompletionFailure(_)));
        // The first chunk failure stops the loop
        assert_eq!(completion.call_count(), 1);
        assert_eq!(store.get(&repo.id).unwrap().documents.len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_generation_creates_duplicates() {
        let completion = ScriptedCompletion::replying("again");
        let (pipeline, store) = pipeline(StaticExtractor::pages(&SIX_PAGES), completion);
        let repo = store.import("paper.pdf", vec![1], 6);

        let first = pipeline.generate(&repo.id, GenerationKind::ResearchGaps).await.unwrap();
        let second = pipeline.generate(&repo.id, GenerationKind::ResearchGaps).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(store.get(&repo.id).unwrap().documents.len(), 3);
    }

    fn excerpt_set(user: &str) -> Vec<String> {
        let body = user.trim_start_matches("Compare the following texts:\n\n");
        let mut parts: Vec<String> = body.split(EXCERPT_DELIMITER).map(str::to_string).collect();
        parts.sort();
        parts
    }

    #[tokio::test]
    async fn test_comparison_is_order_independent_in_content() {
        let completion = ScriptedCompletion::replying("| matrix |");
        let (pipeline, store) = pipeline(StaticExtractor::pages(&["alpha text"]), completion.clone());
        let home = store.import("home.pdf", vec![1], 1);
        let other = store.import("other.pdf", vec![2], 1);

        let a = store.original(&other.id).unwrap();
        let b = GeneratedDocument::markdown("Notes.md", DocumentKind::Analysis, "# Notes\n\n**beta** text".to_string());

        pipeline.compare_documents(&home.id, &[a.clone(), b.clone()]).await.unwrap();
        let doc = pipeline.compare_documents(&home.id, &[b, a]).await.unwrap();

        let calls = completion.calls();
        assert_eq!(calls.len(), 2);
        let first = excerpt_set(&calls[0][1].content);
        let second = excerpt_set(&calls[1][1].content);
        assert_eq!(first, second);
        assert!(first.iter().any(|e| e.starts_with("Document (other.pdf):") && e.contains("alpha text")));
        assert!(first.iter().any(|e| e.starts_with("Document (Notes.md):") && e.contains("beta text")));

        // Written to the invoking collection only
        assert_eq!(doc.kind, DocumentKind::Comparison);
        assert_eq!(doc.name, COMPARISON_OUTPUT_NAME);
        assert_eq!(store.get(&home.id).unwrap().documents.len(), 3);
        assert_eq!(store.get(&other.id).unwrap().documents.len(), 1);
    }

    #[tokio::test]
    async fn test_comparison_caps_each_excerpt() {
        let completion = ScriptedCompletion::replying("matrix");
        let (pipeline, store) = pipeline(StaticExtractor::pages(&["x"]), completion.clone());
        let repo = store.import("home.pdf", vec![1], 1);

        let long = GeneratedDocument::markdown("Long.md", DocumentKind::Analysis, "y".repeat(25_000));
        let short = GeneratedDocument::markdown("Short.md", DocumentKind::Analysis, "z".repeat(10));
        pipeline.compare_documents(&repo.id, &[long, short]).await.unwrap();

        let user = &completion.calls()[0][1].content;
        assert_eq!(user.matches('y').count(), COMPARISON_CHAR_CAP);
    }

    #[tokio::test]
    async fn test_comparison_by_reference_and_validation() {
        let completion = ScriptedCompletion::replying("matrix");
        let (pipeline, store) = pipeline(StaticExtractor::pages(&["text"]), completion.clone());
        let home = store.import("home.pdf", vec![1], 1);
        let other = store.import("other.pdf", vec![2], 1);

        let refs = vec![
            DocumentRef {
                repo_id: home.id.clone(),
                document_id: home.documents[0].id.clone(),
            },
            DocumentRef {
                repo_id: other.id.clone(),
                document_id: other.documents[0].id.clone(),
            },
        ];
        pipeline.compare(&home.id, &refs).await.unwrap();
        assert_eq!(store.get(&home.id).unwrap().documents.len(), 2);

        let err = pipeline.compare(&home.id, &refs[..1]).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidComparison(_)));

        let err = pipeline.compare("repo-missing", &refs).await.unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotFound(_)));
        assert_eq!(completion.call_count(), 1);
    }
}
