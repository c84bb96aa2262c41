use std::collections::HashMap;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A registered background task: the cooperative cancel flag and the join
/// handle. Cancellation is always cooperative — the token is flipped and the
/// task is expected to observe it at its checkpoints; nothing is aborted.
#[derive(Debug)]
pub struct TaskHandle {
    pub cancel: CancellationToken,
    pub handle: JoinHandle<()>,
}

impl TaskHandle {
    pub fn new(cancel: CancellationToken, handle: JoinHandle<()>) -> Self {
        Self { cancel, handle }
    }
}

/// Per-URI registry of background re-assembly tasks. Starting a new task for
/// a URI cancels any in-flight task for the same URI first; this is the only
/// place tasks are registered and cancelled.
#[derive(Debug, Default)]
pub struct DocumentLifecycleManager {
    tasks: HashMap<String, TaskHandle>,
}

impl DocumentLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task for `uri`, cancelling any previous one.
    pub fn put(&mut self, uri: &str, task: TaskHandle) {
        if let Some(previous) = self.tasks.insert(uri.to_string(), task) {
            previous.cancel.cancel();
        }
    }

    /// Cancel and remove the task for `uri`, if any.
    pub fn cancel_task(&mut self, uri: &str) {
        if let Some(task) = self.tasks.remove(uri) {
            task.cancel.cancel();
        }
    }

    pub fn cancel_all_tasks(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel.cancel();
        }
    }

    pub fn get_task(&self, uri: &str) -> Option<&TaskHandle> {
        self.tasks.get(uri)
    }

    /// Take every registered task, for `wait_for_all_tasks`. The registry is
    /// left empty; callers await the handles outside any state lock.
    pub fn drain_tasks(&mut self) -> Vec<TaskHandle> {
        self.tasks.drain().map(|(_, t)| t).collect()
    }
}

/// Await completion of previously drained tasks without cancelling them.
pub async fn wait_for_all_tasks(tasks: Vec<TaskHandle>) {
    for task in tasks {
        let _ = task.handle.await;
    }
}
