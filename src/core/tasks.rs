//! Tasks - Cooperative background commands
//!
//! Tasks never preempt each other. Pending tasks are picked up at yield
//! points (after each iteration step and after each script line) and run
//! to completion with their output captured.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Done,
    Cancelled,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Done => "done",
            TaskState::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: u32,
    pub cmd: String,
    pub state: TaskState,
    /// Captured output once done
    pub result: Option<String>,
    pub status: i32,
    /// Removed as soon as it finishes
    pub transient: bool,
}

#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Vec<Task>,
    next_id: u32,
    /// Set while a task runs so nested yields do not start another one
    running: bool,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 1,
            running: false,
        }
    }

    pub fn enqueue(&mut self, cmd: &str, transient: bool) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.push(Task {
            id,
            cmd: cmd.to_string(),
            state: TaskState::Pending,
            result: None,
            status: 0,
            transient,
        });
        log::debug!("task {} queued: {}", id, cmd);
        id
    }

    pub fn list(&self) -> &[Task] {
        &self.tasks
    }

    pub fn get(&self, id: u32) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn remove(&mut self, id: u32) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        before != self.tasks.len()
    }

    /// Drop every finished or cancelled task
    pub fn remove_finished(&mut self) -> usize {
        let before = self.tasks.len();
        self.tasks
            .retain(|t| matches!(t.state, TaskState::Pending | TaskState::Running));
        before - self.tasks.len()
    }

    pub fn cancel(&mut self, id: u32) -> bool {
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) if task.state == TaskState::Pending => {
                task.state = TaskState::Cancelled;
                true
            }
            _ => false,
        }
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(|t| t.state == TaskState::Pending)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Claim the next pending task, marking it running
    pub fn begin_next(&mut self) -> Option<(u32, String)> {
        if self.running {
            return None;
        }
        let task = self
            .tasks
            .iter_mut()
            .find(|t| t.state == TaskState::Pending)?;
        task.state = TaskState::Running;
        self.running = true;
        Some((task.id, task.cmd.clone()))
    }

    pub fn finish(&mut self, id: u32, output: String, status: i32) {
        self.running = false;
        if let Some(pos) = self.tasks.iter().position(|t| t.id == id) {
            if self.tasks[pos].transient {
                self.tasks.remove(pos);
                return;
            }
            let task = &mut self.tasks[pos];
            task.state = TaskState::Done;
            task.result = Some(output);
            task.status = status;
        }
        log::debug!("task {} finished with status {}", id, status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle() {
        let mut queue = TaskQueue::new();
        let a = queue.enqueue("?e a", false);
        let b = queue.enqueue("?e b", true);
        let (id, cmd) = queue.begin_next().unwrap();
        assert_eq!((id, cmd.as_str()), (a, "?e a"));
        assert!(queue.begin_next().is_none());
        queue.finish(a, "a\n".into(), 0);
        assert_eq!(queue.get(a).unwrap().state, TaskState::Done);
        let (id, _) = queue.begin_next().unwrap();
        queue.finish(id, String::new(), 0);
        assert!(queue.get(b).is_none());
        assert_eq!(queue.remove_finished(), 1);
    }

    #[test]
    fn test_cancel_pending_only() {
        let mut queue = TaskQueue::new();
        let id = queue.enqueue("px", false);
        assert!(queue.cancel(id));
        assert!(!queue.cancel(id));
        assert!(!queue.has_pending());
    }
}
