use crate::error::{CoreError, Result};
use crate::models::{next_id, now_millis, Collection, CollectionUpdate, DocumentKind, GeneratedDocument};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Datelike;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// In-process collection store.
///
/// Every operation takes the lock once, so appends to a collection's document
/// list are atomic with respect to each other. Nothing is persisted.
#[derive(Clone, Default)]
pub struct CollectionStore {
    collections: Arc<Mutex<HashMap<String, Collection>>>,
}

impl CollectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a collection around an uploaded PDF.
    /// The upload becomes the collection's single `original` document.
    pub fn import(&self, file_name: &str, bytes: Vec<u8>, page_count: usize) -> Collection {
        let name = file_name
            .strip_suffix(".pdf")
            .unwrap_or(file_name)
            .to_string();

        let collection = Collection {
            id: next_id("repo"),
            name,
            description: "Imported document".to_string(),
            authors: vec!["Unknown Author".to_string()],
            year: chrono::Utc::now().year().to_string(),
            tags: vec!["New Import".to_string()],
            page_count: page_count.max(1),
            imported_at: now_millis(),
            documents: vec![GeneratedDocument::original(file_name, bytes)],
        };

        log::info!("Imported collection {} ({})", collection.id, collection.name);
        self.lock().insert(collection.id.clone(), collection.clone());
        collection
    }

    /// All collections, most recently imported first
    pub fn list(&self) -> Vec<Collection> {
        let mut collections: Vec<Collection> = self.lock().values().cloned().collect();
        collections.sort_by(|a, b| b.imported_at.cmp(&a.imported_at).then_with(|| b.id.cmp(&a.id)));
        collections
    }

    pub fn get(&self, repo_id: &str) -> Result<Collection> {
        self.lock()
            .get(repo_id)
            .cloned()
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))
    }

    pub fn exists(&self, repo_id: &str) -> bool {
        self.lock().contains_key(repo_id)
    }

    pub fn rename(&self, repo_id: &str, name: &str) -> Result<()> {
        self.update_metadata(
            repo_id,
            CollectionUpdate {
                name: Some(name.to_string()),
                ..CollectionUpdate::default()
            },
        )
        .map(|_| ())
    }

    pub fn update_metadata(&self, repo_id: &str, update: CollectionUpdate) -> Result<Collection> {
        let mut collections = self.lock();
        let collection = collections
            .get_mut(repo_id)
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))?;

        if let Some(name) = update.name {
            collection.name = name;
        }
        if let Some(description) = update.description {
            collection.description = description;
        }
        if let Some(authors) = update.authors {
            collection.authors = authors;
        }
        if let Some(year) = update.year {
            collection.year = year;
        }
        if let Some(tags) = update.tags {
            collection.tags = tags;
        }

        Ok(collection.clone())
    }

    pub fn delete(&self, repo_id: &str) -> Result<()> {
        self.lock()
            .remove(repo_id)
            .map(|_| log::info!("Deleted collection {}", repo_id))
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))
    }

    /// The collection's original document, which must carry the binary source
    pub fn original(&self, repo_id: &str) -> Result<GeneratedDocument> {
        let collections = self.lock();
        let collection = collections
            .get(repo_id)
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))?;

        collection
            .documents
            .iter()
            .find(|doc| doc.kind == DocumentKind::Original && doc.source().is_some())
            .cloned()
            .ok_or(CoreError::NoSourceDocument)
    }

    pub fn document(&self, repo_id: &str, document_id: &str) -> Result<GeneratedDocument> {
        let collections = self.lock();
        let collection = collections
            .get(repo_id)
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))?;

        collection
            .documents
            .iter()
            .find(|doc| doc.id == document_id)
            .cloned()
            .ok_or_else(|| CoreError::DocumentNotFound(document_id.to_string()))
    }

    pub fn append_document(&self, repo_id: &str, document: GeneratedDocument) -> Result<GeneratedDocument> {
        let mut collections = self.lock();
        let collection = collections
            .get_mut(repo_id)
            .ok_or_else(|| CoreError::CollectionNotFound(repo_id.to_string()))?;

        collection.documents.push(document.clone());
        log::info!(
            "Attached {:?} document '{}' to collection {}",
            document.kind,
            document.name,
            repo_id
        );
        Ok(document)
    }

    /// Opaque share token: `<repo id>-<unix millis>`, URL-safe base64
    pub fn share_token(&self, repo_id: &str) -> Result<String> {
        if !self.exists(repo_id) {
            return Err(CoreError::CollectionNotFound(repo_id.to_string()));
        }
        let token = URL_SAFE_NO_PAD.encode(format!("{}-{}", repo_id, now_millis()));
        log::info!("Shared collection {}", repo_id);
        Ok(token)
    }

    /// Collection a share token points at. Tokens for deleted collections
    /// and undecodable tokens both resolve to `CollectionNotFound`.
    pub fn resolve_share(&self, token: &str) -> Result<Collection> {
        let decoded = URL_SAFE_NO_PAD
            .decode(token)
            .ok()
            .and_then(|bytes| String::from_utf8(bytes).ok());
        let repo_id = decoded
            .as_deref()
            .and_then(|raw| raw.rsplit_once('-'))
            .filter(|(_, stamp)| stamp.parse::<i64>().is_ok())
            .map(|(id, _)| id)
            .ok_or_else(|| CoreError::CollectionNotFound(format!("share token {}", token)))?;
        self.get(repo_id)
    }

    /// Insert a fully built collection, e.g. one without an original document
    #[cfg(test)]
    pub fn insert(&self, collection: Collection) {
        self.lock().insert(collection.id.clone(), collection);
    }
}
