//! [`TaskRegistry`] – the host-side stand-in for the scheduler's task table.
//!
//! Every task Vigil creates (self-test workers, the IP task, network tasks)
//! is recorded here with its priority.  Tokio has no notion of task
//! priority, so priorities are bookkeeping only: they are validated against
//! the configured number of levels and reported, which is what the link
//! gate's priority dance needs to be observable.
//!
//! The registry also enforces a task capacity so that task-creation failure
//! (an exhausted heap on target) can be exercised.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, info};
use vigil_kernel::PriorityControl;
use vigil_types::{Priority, TaskId, VigilError};

/// Default number of priority levels; valid priorities are `0..5`.
pub const DEFAULT_MAX_PRIORITIES: u8 = 5;

/// Default number of tasks the registry accepts.
pub const DEFAULT_MAX_TASKS: usize = 32;

/// Snapshot of one registered task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub priority: Priority,
    /// `false` once the task body has returned or been aborted.
    pub running: bool,
}

struct TaskRecord {
    name: String,
    priority: Priority,
    handle: Option<JoinHandle<()>>,
}

struct RegistryInner {
    max_priorities: u8,
    max_tasks: usize,
    next_id: u64,
    tasks: BTreeMap<TaskId, TaskRecord>,
}

/// Shared task table.  Clone it cheaply – all clones see the same tasks.
#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PRIORITIES, DEFAULT_MAX_TASKS)
    }
}

impl TaskRegistry {
    pub fn new(max_priorities: u8, max_tasks: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                max_priorities: max_priorities.max(1),
                max_tasks,
                next_id: 1,
                tasks: BTreeMap::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn max_priorities(&self) -> u8 {
        self.lock().max_priorities
    }

    /// Record a new task at `priority` and return its id.
    ///
    /// # Errors
    ///
    /// [`VigilError::TaskCreation`] when the table is full or `priority` is
    /// out of range.
    pub fn register(&self, name: &str, priority: Priority) -> Result<TaskId, VigilError> {
        let mut inner = self.lock();
        if priority.0 >= inner.max_priorities {
            return Err(VigilError::TaskCreation {
                task: name.to_string(),
                details: format!(
                    "priority {priority} exceeds the highest level {}",
                    inner.max_priorities - 1
                ),
            });
        }
        if inner.tasks.len() >= inner.max_tasks {
            return Err(VigilError::TaskCreation {
                task: name.to_string(),
                details: format!("task table full ({} tasks)", inner.max_tasks),
            });
        }
        let id = TaskId(inner.next_id);
        inner.next_id += 1;
        inner.tasks.insert(
            id,
            TaskRecord {
                name: name.to_string(),
                priority,
                handle: None,
            },
        );
        debug!(task = name, %id, %priority, "task registered");
        Ok(id)
    }

    /// Attach the Tokio task running `id`'s body.
    pub fn attach(&self, id: TaskId, handle: JoinHandle<()>) {
        match self.lock().tasks.get_mut(&id) {
            Some(record) => record.handle = Some(handle),
            None => handle.abort(),
        }
    }

    /// Move task `id` to `priority`.
    pub fn set_priority(&self, id: TaskId, priority: Priority) -> Result<(), VigilError> {
        let mut inner = self.lock();
        if priority.0 >= inner.max_priorities {
            return Err(VigilError::Scheduler(format!(
                "priority {priority} out of range 0..{}",
                inner.max_priorities
            )));
        }
        let record = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| VigilError::Scheduler(format!("{id} does not exist")))?;
        if record.priority != priority {
            info!(task = %record.name, %id, from = %record.priority, to = %priority, "priority changed");
            record.priority = priority;
        }
        Ok(())
    }

    pub fn priority(&self, id: TaskId) -> Option<Priority> {
        self.lock().tasks.get(&id).map(|r| r.priority)
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }

    /// Id of the first task registered under `name`.
    pub fn find(&self, name: &str) -> Option<TaskId> {
        self.lock()
            .tasks
            .iter()
            .find(|(_, r)| r.name == name)
            .map(|(id, _)| *id)
    }

    /// Snapshot of every task in creation order.
    pub fn snapshot(&self) -> Vec<TaskInfo> {
        self.lock()
            .tasks
            .iter()
            .map(|(id, r)| TaskInfo {
                id: *id,
                name: r.name.clone(),
                priority: r.priority,
                running: r.handle.as_ref().is_some_and(|h| !h.is_finished()),
            })
            .collect()
    }

    /// Abort every attached task body.  Records are kept.
    pub fn abort_all(&self) {
        for record in self.lock().tasks.values_mut() {
            if let Some(handle) = record.handle.take() {
                handle.abort();
            }
        }
    }

    /// A [`PriorityControl`] bound to task `id`.
    pub fn priority_handle(&self, id: TaskId) -> TaskPriorityHandle {
        TaskPriorityHandle {
            registry: self.clone(),
            id,
        }
    }
}

/// Priority control over one registered task.
#[derive(Clone)]
pub struct TaskPriorityHandle {
    registry: TaskRegistry,
    id: TaskId,
}

impl TaskPriorityHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl PriorityControl for TaskPriorityHandle {
    fn set_priority(&mut self, priority: Priority) -> Result<(), VigilError> {
        self.registry.set_priority(self.id, priority)
    }

    fn priority(&self) -> Priority {
        self.registry.priority(self.id).unwrap_or(Priority::IDLE)
    }
}
