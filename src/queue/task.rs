//! Task model
//!
//! A [`Task`] is one unit of crawl work: a URL plus the request shape and the
//! scheduling metadata the queue acts on. Tasks are built through
//! [`TaskBuilder`], which enforces that a task is never both high priority and
//! deferred.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default minimum spacing between two crawls of the same URL (seconds)
pub const DEFAULT_MIN_AGE_SECS: u64 = 3600;

/// Errors raised when building a task
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidTaskError {
    #[error("a high-priority task cannot be deferred (scheduled_timestamp = {scheduled_timestamp})")]
    PriorityAndDeferred { scheduled_timestamp: i64 },

    #[error("repeat interval must be at least one second")]
    ZeroRepeatInterval,

    #[error("{field} of {seconds}s is out of range")]
    DurationOutOfRange { field: &'static str, seconds: u64 },
}

/// Whole seconds of `duration`, rejected if they do not fit a timestamp offset
fn offset_secs(field: &'static str, duration: Duration) -> Result<u64, InvalidTaskError> {
    let seconds = duration.as_secs();
    if i64::try_from(seconds).is_err() {
        return Err(InvalidTaskError::DurationOutOfRange { field, seconds });
    }
    Ok(seconds)
}

/// A value that is either set explicitly or taken from the parent task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Inherited<T> {
    Explicit(T),
    FromParent,
}

impl<T> Inherited<T> {
    /// The explicit value, if any
    pub fn explicit(&self) -> Option<&T> {
        match self {
            Self::Explicit(value) => Some(value),
            Self::FromParent => None,
        }
    }

    pub fn is_from_parent(&self) -> bool {
        matches!(self, Self::FromParent)
    }
}

impl<T: Clone> Inherited<T> {
    fn resolve(&mut self, parent: &Inherited<T>) {
        if self.is_from_parent() {
            *self = parent.clone();
        }
    }
}

/// HTTP request method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    #[default]
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// A schedulable unit of crawl work
///
/// Field order is fixed by this type and form data is kept sorted, so equal
/// tasks always serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    url: String,
    method: Method,
    data: BTreeMap<String, String>,
    document_type: Inherited<String>,
    referer: Inherited<Option<String>>,
    high_priority: bool,
    scheduled_timestamp: i64,
    repeat_after: Option<u64>,
    min_age: Option<u64>,
}

impl Task {
    /// A GET task for `url`, ready immediately, with the default min-age
    ///
    /// The referer is taken from the parent task when this task is emitted
    /// by a handler.
    pub fn new(url: impl Into<String>, document_type: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            data: BTreeMap::new(),
            document_type: Inherited::Explicit(document_type.into()),
            referer: Inherited::FromParent,
            high_priority: false,
            scheduled_timestamp: 0,
            repeat_after: None,
            min_age: Some(DEFAULT_MIN_AGE_SECS),
        }
    }

    pub fn builder(url: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(url)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn data(&self) -> &BTreeMap<String, String> {
        &self.data
    }

    pub fn document_type(&self) -> &Inherited<String> {
        &self.document_type
    }

    /// The resolved document type, if it is not still waiting on a parent
    pub fn document_type_name(&self) -> Option<&str> {
        self.document_type.explicit().map(String::as_str)
    }

    pub fn referer(&self) -> &Inherited<Option<String>> {
        &self.referer
    }

    /// The referer URL to send, if one is known
    pub fn referer_url(&self) -> Option<&str> {
        self.referer.explicit().and_then(|r| r.as_deref())
    }

    pub fn high_priority(&self) -> bool {
        self.high_priority
    }

    /// Epoch seconds before which the task is not eligible; 0 means as soon as possible
    pub fn scheduled_timestamp(&self) -> i64 {
        self.scheduled_timestamp
    }

    /// Seconds after each pop at which the task is scheduled again
    pub fn repeat_after(&self) -> Option<u64> {
        self.repeat_after
    }

    /// Minimum seconds between two crawls of this URL
    pub fn min_age(&self) -> Option<u64> {
        self.min_age
    }

    /// Fills inherit markers from the task that emitted this one
    pub fn resolve_from_parent(&mut self, parent: &Task) {
        self.referer.resolve(&parent.referer);
        self.document_type.resolve(&parent.document_type);
    }

    pub(crate) fn set_scheduled_timestamp(&mut self, timestamp: i64) {
        self.scheduled_timestamp = timestamp;
    }

    /// The task to schedule after this one is popped at `now`, if it repeats
    pub(crate) fn successor(&self, now: i64) -> Option<Task> {
        let interval = i64::try_from(self.repeat_after?).unwrap_or(i64::MAX);
        Some(Task {
            high_priority: false,
            scheduled_timestamp: now.saturating_add(interval),
            ..self.clone()
        })
    }
}

/// Builder for [`Task`]
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    url: String,
    method: Method,
    data: BTreeMap<String, String>,
    document_type: Inherited<String>,
    referer: Inherited<Option<String>>,
    high_priority: bool,
    scheduled_timestamp: i64,
    repeat_after: Option<Duration>,
    min_age: Option<Duration>,
}

impl TaskBuilder {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            data: BTreeMap::new(),
            document_type: Inherited::FromParent,
            referer: Inherited::FromParent,
            high_priority: false,
            scheduled_timestamp: 0,
            repeat_after: None,
            min_age: Some(Duration::from_secs(DEFAULT_MIN_AGE_SECS)),
        }
    }

    pub fn document_type(mut self, document_type: impl Into<String>) -> Self {
        self.document_type = Inherited::Explicit(document_type.into());
        self
    }

    pub fn referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Inherited::Explicit(Some(referer.into()));
        self
    }

    /// Send no referer, even when emitted by a parent task
    pub fn no_referer(mut self) -> Self {
        self.referer = Inherited::Explicit(None);
        self
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn form_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn high_priority(mut self, high_priority: bool) -> Self {
        self.high_priority = high_priority;
        self
    }

    /// Defers the task until the given epoch second
    pub fn scheduled_at(mut self, timestamp: i64) -> Self {
        self.scheduled_timestamp = timestamp;
        self
    }

    pub fn repeat_after(mut self, interval: Duration) -> Self {
        self.repeat_after = Some(interval);
        self
    }

    pub fn min_age(mut self, min_age: Duration) -> Self {
        self.min_age = Some(min_age);
        self
    }

    pub fn no_min_age(mut self) -> Self {
        self.min_age = None;
        self
    }

    pub fn build(self) -> Result<Task, InvalidTaskError> {
        if self.high_priority && self.scheduled_timestamp != 0 {
            return Err(InvalidTaskError::PriorityAndDeferred {
                scheduled_timestamp: self.scheduled_timestamp,
            });
        }

        let repeat_after = self
            .repeat_after
            .map(|d| offset_secs("repeat_after", d))
            .transpose()?;
        if repeat_after == Some(0) {
            return Err(InvalidTaskError::ZeroRepeatInterval);
        }
        let min_age = self.min_age.map(|d| offset_secs("min_age", d)).transpose()?;

        Ok(Task {
            url: self.url,
            method: self.method,
            data: self.data,
            document_type: self.document_type,
            referer: self.referer,
            high_priority: self.high_priority,
            scheduled_timestamp: self.scheduled_timestamp,
            repeat_after,
            min_age,
        })
    }
}
