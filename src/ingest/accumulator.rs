//! Per-document scratch space built up while a stream is open.
//!
//! The registry lock only guards the map; each [`DocumentContext`] carries its own lock so
//! chunks for unrelated documents never contend. Neither lock is held across an await point.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct ContextState {
    text: String,
    sections: Vec<String>,
}

/// Accumulated text and discovered sections of one document.
#[derive(Debug, Default)]
pub struct DocumentContext {
    state: Mutex<ContextState>,
}

impl DocumentContext {
    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append raw text without recording a section.
    pub fn push_text(&self, text: &str) {
        self.lock().text.push_str(text);
    }

    /// Append a chapter/text pair and remember the chapter on first sight.
    pub fn append(&self, chapter: &str, text: &str) {
        let mut state = self.lock();
        state.text.reserve(chapter.len() + text.len() + 2);
        state.text.push_str(chapter);
        state.text.push('\n');
        state.text.push_str(text);
        state.text.push('\n');
        if !chapter.is_empty() && !state.sections.iter().any(|known| known == chapter) {
            state.sections.push(chapter.to_string());
        }
    }

    /// Copy of the section list.
    pub fn sections(&self) -> Vec<String> {
        self.lock().sections.clone()
    }

    /// Copy of the accumulated text.
    pub fn text(&self) -> String {
        self.lock().text.clone()
    }
}

/// Registry of open document contexts keyed by file id.
#[derive(Debug, Default)]
pub struct AccumulatorRegistry {
    contexts: Mutex<HashMap<String, Arc<DocumentContext>>>,
}

impl AccumulatorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<DocumentContext>>> {
        self.contexts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Existing context for `file_id`, or a fresh one registered atomically.
    pub fn get_or_create(&self, file_id: &str) -> Arc<DocumentContext> {
        Arc::clone(self.lock().entry(file_id.to_string()).or_default())
    }

    /// Existing context, if any.
    pub fn get(&self, file_id: &str) -> Option<Arc<DocumentContext>> {
        self.lock().get(file_id).cloned()
    }

    /// Register a context for `file_id` holding only `text`.
    ///
    /// Returns `None`, leaving the live context untouched, when one is already open.
    pub fn open(&self, file_id: &str, text: &str) -> Option<Arc<DocumentContext>> {
        let mut contexts = self.lock();
        if contexts.contains_key(file_id) {
            return None;
        }
        let context = Arc::new(DocumentContext::default());
        context.push_text(text);
        contexts.insert(file_id.to_string(), Arc::clone(&context));
        Some(context)
    }

    /// Fold a chapter/text pair into the document's context, creating it when missing.
    pub fn append_text(&self, file_id: &str, chapter: &str, text: &str) {
        self.get_or_create(file_id).append(chapter, text);
    }

    /// Section list of the document; empty when no context exists.
    pub fn snapshot(&self, file_id: &str) -> Vec<String> {
        self.get(file_id)
            .map(|context| context.sections())
            .unwrap_or_default()
    }

    /// Full accumulated text, if a context exists.
    pub fn full_text(&self, file_id: &str) -> Option<String> {
        self.get(file_id).map(|context| context.text())
    }

    /// Drop the document's context. Returns whether one existed.
    pub fn discard(&self, file_id: &str) -> bool {
        self.lock().remove(file_id).is_some()
    }

    /// Whether a context exists for `file_id`.
    pub fn contains(&self, file_id: &str) -> bool {
        self.lock().contains_key(file_id)
    }

    /// Number of open contexts.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no contexts are open.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
