use super::definition::RetryPolicy;
use super::value_objects::QueueStatus;
use crate::domain::agent::TaskResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// Instruction to run a task definition for an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSchedule {
    /// Id of the task definition to run
    pub task_id: String,
    pub agent_id: String,
    /// Higher runs first
    pub priority: i32,
    pub scheduled_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Definition ids that must have completed in the same agent's queue
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub metadata: ScheduleMetadata,
}

impl TaskSchedule {
    pub fn new(
        task_id: impl Into<String>,
        agent_id: impl Into<String>,
        scheduled_time: DateTime<Utc>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            agent_id: agent_id.into(),
            priority: 0,
            scheduled_time,
            deadline: None,
            dependencies: Vec::new(),
            parameters: Map::new(),
            metadata: ScheduleMetadata {
                created_at: scheduled_time,
                created_by: created_by.into(),
                tags: None,
            },
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Runtime wrapper around a schedule, owned by its agent's queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedTask {
    /// Identifies this instance; distinct from the definition id
    pub id: Uuid,
    pub schedule: TaskSchedule,
    pub status: QueueStatus,
    pub attempts: u32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Result of the most recent attempt that reached the agent
    pub execution: Option<TaskResult>,
}

impl QueuedTask {
    pub fn new(schedule: TaskSchedule) -> Self {
        Self {
            id: Uuid::new_v4(),
            schedule,
            status: QueueStatus::Pending,
            attempts: 0,
            last_attempt: None,
            next_attempt: None,
            last_error: None,
            execution: None,
        }
    }

    /// Pending tasks once their time has come, retrying tasks once the backoff
    /// has elapsed. Dependencies are checked by the queue.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.schedule.scheduled_time > now {
            return false;
        }
        match self.status {
            QueueStatus::Pending => true,
            QueueStatus::Retrying => self.next_attempt.map_or(true, |at| at <= now),
            _ => false,
        }
    }

    pub fn begin_attempt(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Executing;
        self.attempts += 1;
        self.last_attempt = Some(now);
        self.next_attempt = None;
    }

    pub fn complete(&mut self, result: TaskResult) {
        self.status = QueueStatus::Completed;
        self.last_error = None;
        self.execution = Some(result);
    }

    /// Records a failed attempt; returns whether the task will be retried
    pub fn fail(&mut self, error: String, policy: Option<&RetryPolicy>, now: DateTime<Utc>) -> bool {
        self.last_error = Some(error);
        match policy {
            Some(policy) if policy.allows_retry(self.attempts) => {
                // An out-of-range backoff waits forever rather than overflowing
                let next_attempt = now
                    .checked_add_signed(policy.delay_for_attempt(self.attempts))
                    .unwrap_or(DateTime::<Utc>::MAX_UTC);
                self.next_attempt = Some(next_attempt);
                self.status = QueueStatus::Retrying;
                true
            }
            _ => {
                self.status = QueueStatus::Failed;
                self.next_attempt = None;
                false
            }
        }
    }

    /// Descending priority, then ascending scheduled time
    pub fn dispatch_order(a: &QueuedTask, b: &QueuedTask) -> Ordering {
        b.schedule
            .priority
            .cmp(&a.schedule.priority)
            .then_with(|| a.schedule.scheduled_time.cmp(&b.schedule.scheduled_time))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetadata {
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-agent queue of task instances
///
/// Terminal instances stay in the queue for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskQueue {
    pub agent_id: String,
    pub name: String,
    pub tasks: Vec<QueuedTask>,
    pub concurrency_limit: usize,
    pub metadata: QueueMetadata,
}

impl TaskQueue {
    pub fn new(agent_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        let agent_id = agent_id.into();
        Self {
            name: format!("Agent {} Queue", agent_id),
            agent_id,
            tasks: Vec::new(),
            concurrency_limit: 1,
            metadata: QueueMetadata {
                created_at: now,
                updated_at: now,
            },
        }
    }

    pub fn push(&mut self, task: QueuedTask, now: DateTime<Utc>) {
        self.tasks.push(task);
        self.metadata.updated_at = now;
    }

    pub fn get(&self, id: Uuid) -> Option<&QueuedTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut QueuedTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Whether a non-terminal instance of `task_id` is in the queue
    pub fn has_live(&self, task_id: &str) -> bool {
        self.tasks
            .iter()
            .any(|t| t.schedule.task_id == task_id && !t.status.is_terminal())
    }

    /// A dependency is met when an instance of it completed and none is still live
    pub fn dependency_met(&self, task_id: &str) -> bool {
        let completed = self
            .tasks
            .iter()
            .any(|t| t.schedule.task_id == task_id && t.status == QueueStatus::Completed);
        completed && !self.has_live(task_id)
    }

    pub fn dependencies_met(&self, task: &QueuedTask) -> bool {
        task.schedule
            .dependencies
            .iter()
            .all(|dep| self.dependency_met(dep))
    }

    /// The instance `process_queue` should run next, if any
    pub fn next_ready(&self, now: DateTime<Utc>) -> Option<&QueuedTask> {
        let mut ready: Vec<&QueuedTask> = self
            .tasks
            .iter()
            .filter(|t| t.is_due(now) && self.dependencies_met(t))
            .collect();
        ready.sort_by(|a, b| QueuedTask::dispatch_order(a, b));
        ready.into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn schedule(task_id: &str, at: DateTime<Utc>) -> TaskSchedule {
        TaskSchedule::new(task_id, "agent-1", at, "tester")
    }

    #[test]
    fn higher_priority_runs_first() {
        let now = Utc::now();
        let mut queue = TaskQueue::new("agent-1", now);
        queue.push(QueuedTask::new(schedule("low", now).with_priority(1)), now);
        queue.push(QueuedTask::new(schedule("high", now).with_priority(5)), now);

        assert_eq!(queue.next_ready(now).unwrap().schedule.task_id, "high");
    }

    #[test]
    fn earlier_schedule_breaks_priority_tie() {
        let now = Utc::now();
        let mut queue = TaskQueue::new("agent-1", now);
        queue.push(QueuedTask::new(schedule("later", now - Duration::seconds(1))), now);
        queue.push(QueuedTask::new(schedule("earlier", now - Duration::seconds(10))), now);

        assert_eq!(queue.next_ready(now).unwrap().schedule.task_id, "earlier");
    }

    #[test]
    fn future_tasks_are_not_ready() {
        let now = Utc::now();
        let mut queue = TaskQueue::new("agent-1", now);
        queue.push(QueuedTask::new(schedule("later", now + Duration::minutes(1))), now);

        assert!(queue.next_ready(now).is_none());
    }

    #[test]
    fn unmet_dependency_blocks_selection() {
        let now = Utc::now();
        let mut queue = TaskQueue::new("agent-1", now);
        queue.push(
            QueuedTask::new(schedule("t2", now).with_priority(10).with_dependencies(["t1"])),
            now,
        );
        queue.push(QueuedTask::new(schedule("t1", now)), now);

        assert_eq!(queue.next_ready(now).unwrap().schedule.task_id, "t1");
    }

    #[test]
    fn missing_dependency_is_never_met() {
        let now = Utc::now();
        let mut queue = TaskQueue::new("agent-1", now);
        queue.push(QueuedTask::new(schedule("t2", now).with_dependencies(["t1"])), now);

        assert!(queue.next_ready(now).is_none());
    }

    #[test]
    fn retrying_task_waits_for_backoff() {
        let now = Utc::now();
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_multiplier: 2.0,
            initial_delay: 1000,
            max_delay: 5000,
        };
        let mut task = QueuedTask::new(schedule("t1", now));
        task.begin_attempt(now);
        let will_retry = task.fail("boom".to_string(), Some(&policy), now);

        assert!(will_retry);
        assert_eq!(task.status, QueueStatus::Retrying);
        assert!(!task.is_due(now));
        assert!(task.is_due(now + Duration::milliseconds(1000)));
    }

    #[test]
    fn failure_without_policy_is_terminal() {
        let now = Utc::now();
        let mut task = QueuedTask::new(schedule("t1", now));
        task.begin_attempt(now);

        assert!(!task.fail("boom".to_string(), None, now));
        assert_eq!(task.status, QueueStatus::Failed);
        assert_eq!(task.attempts, 1);
    }
}
