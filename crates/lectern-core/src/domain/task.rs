use futures::future::BoxFuture;
use std::borrow::Cow;
use std::fmt;
use tokio::time::Instant;

use super::TaskId;
use crate::app::StoreSet;
use crate::error::ServiceError;

/// Human-readable task name used in logs ("saveBookInfo", "OpenStores", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskName(Cow<'static, str>);

impl TaskName {
    pub fn new(s: impl Into<Cow<'static, str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&'static str> for TaskName {
    fn from(s: &'static str) -> Self {
        Self(Cow::Borrowed(s))
    }
}

impl From<String> for TaskName {
    fn from(s: String) -> Self {
        Self(Cow::Owned(s))
    }
}

/// Body of a task. Runs once on the worker with exclusive access to the stores.
pub type TaskBody = Box<
    dyn for<'a> FnOnce(&'a mut StoreSet) -> BoxFuture<'a, Result<(), ServiceError>> + Send,
>;

/// A unit of work owned by the queue from submission until it has run.
pub struct Task {
    id: TaskId,
    name: TaskName,
    body: TaskBody,
    enqueued_at: Instant,
}

impl Task {
    pub(crate) fn new(id: TaskId, name: TaskName, body: TaskBody, enqueued_at: Instant) -> Self {
        Self {
            id,
            name,
            body,
            enqueued_at,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Consume the task, handing its body to the caller (the worker).
    pub(crate) fn into_parts(self) -> (TaskId, TaskName, TaskBody) {
        (self.id, self.name, self.body)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("enqueued_at", &self.enqueued_at)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_name_from_static_and_owned() {
        let a = TaskName::from("OpenStores");
        let b = TaskName::from(String::from("OpenStores"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "OpenStores");
    }
}
