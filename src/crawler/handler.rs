//! Document handlers
//!
//! A handler turns a fetched document into follow-up tasks. Handlers are
//! registered per document type; any `Fn(&Task, &Document) -> anyhow::Result<I>`
//! closure where `I` yields tasks is a handler.

use crate::config::DocumentTypeEntry;
use crate::crawler::document::Document;
use crate::queue::Task;
use crate::SpindleError;
use scraper::Selector;
use std::collections::HashMap;
use std::sync::Arc;

/// Lazily produced follow-up tasks
pub type TaskIter<'a> = Box<dyn Iterator<Item = Task> + 'a>;

/// Produces follow-up tasks for a fetched document
pub trait Handler: Send + Sync {
    fn handle<'a>(&'a self, task: &'a Task, document: &'a Document) -> anyhow::Result<TaskIter<'a>>;
}

impl<F, I> Handler for F
where
    F: Fn(&Task, &Document) -> anyhow::Result<I> + Send + Sync,
    I: IntoIterator<Item = Task>,
    I::IntoIter: 'static,
{
    fn handle<'a>(&'a self, task: &'a Task, document: &'a Document) -> anyhow::Result<TaskIter<'a>> {
        Ok(Box::new(self(task, document)?.into_iter()))
    }
}

/// Handlers keyed by document type
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one [`LinkRuleHandler`] per configured document type
    pub fn from_config(document_types: &[DocumentTypeEntry]) -> Result<Self, SpindleError> {
        let mut registry = Self::new();
        for entry in document_types {
            registry.add(&entry.name, Arc::new(LinkRuleHandler::from_entry(entry)?))?;
        }
        Ok(registry)
    }

    /// Registers a handler; each document type may have only one
    pub fn add(
        &mut self,
        document_type: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Result<(), SpindleError> {
        let document_type = document_type.into();
        if self.handlers.contains_key(&document_type) {
            return Err(SpindleError::DuplicateHandler(document_type));
        }
        self.handlers.insert(document_type, handler);
        Ok(())
    }

    pub fn get(&self, document_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(document_type).cloned()
    }

    pub fn contains(&self, document_type: &str) -> bool {
        self.handlers.contains_key(document_type)
    }

    /// Registered document types, sorted
    pub fn document_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Follows links matched by CSS selectors, one target document type per rule
///
/// Emitted tasks carry the document URL as their referer.
pub struct LinkRuleHandler {
    rules: Vec<(Selector, String)>,
}

impl LinkRuleHandler {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Adds a rule: links matching `selector` become `document_type` tasks
    pub fn follow(
        mut self,
        selector: &str,
        document_type: impl Into<String>,
    ) -> Result<Self, SpindleError> {
        let parsed = Selector::parse(selector).map_err(|e| {
            SpindleError::Config(crate::ConfigError::Validation(format!(
                "Invalid selector '{}': {:?}",
                selector, e
            )))
        })?;
        self.rules.push((parsed, document_type.into()));
        Ok(self)
    }

    fn from_entry(entry: &DocumentTypeEntry) -> Result<Self, SpindleError> {
        entry
            .follow
            .iter()
            .try_fold(Self::new(), |handler, rule| {
                handler.follow(&rule.selector, rule.document_type.as_str())
            })
    }
}

impl Default for LinkRuleHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler for LinkRuleHandler {
    fn handle<'a>(&'a self, _task: &'a Task, document: &'a Document) -> anyhow::Result<TaskIter<'a>> {
        let mut tasks = Vec::new();
        for (selector, document_type) in &self.rules {
            for link in document.select_links(selector)? {
                tasks.push(
                    Task::builder(link)
                        .document_type(document_type.as_str())
                        .referer(document.url())
                        .build()?,
                );
            }
        }
        Ok(Box::new(tasks.into_iter()))
    }
}
