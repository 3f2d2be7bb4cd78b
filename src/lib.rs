pub mod chunker;
pub mod completion;
pub mod config;
pub mod error;
pub mod generation;
pub mod http_server;
pub mod models;
pub mod pdf_parser;
pub mod reader;
pub mod runs;
pub mod scroll_sync;
pub mod selection;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

use std::sync::Arc;

use completion::CompletionClient;
use config::AppConfig;
use generation::GenerationPipeline;
use pdf_parser::TextExtractor;
use runs::RunEngine;
use store::CollectionStore;

/// Everything a request handler needs; cheap to clone
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: CollectionStore,
    pub engine: RunEngine,
    pub pipeline: GenerationPipeline,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        completion: Arc<dyn CompletionClient>,
        extractor: Arc<dyn TextExtractor>,
    ) -> Self {
        let store = CollectionStore::new();
        let engine = RunEngine::new(
            store.clone(),
            Arc::clone(&completion),
            config.output_language.clone(),
        );
        let pipeline = GenerationPipeline::new(
            store.clone(),
            extractor,
            completion,
            config.output_language.clone(),
        );

        Self {
            config,
            store,
            engine,
            pipeline,
        }
    }
}
