//! In-memory job table.
//!
//! Each job sits behind its own mutex, so transitions on one job are
//! serialised while unrelated jobs proceed independently. Accepted
//! transitions are announced on the manager's [`EventBus`] after the job
//! lock is released, which lets listeners read the job back. Under
//! concurrent transitions of the same job the notifications can arrive out
//! of order; [`JobNotification::sequence`] is the event's position in the
//! job's history.

use super::{
    Job, JobEvent, JobId, JobStatus, JobSubmission, JsSyntaxValidator, Schedule, SessionId,
    SyntaxValidator,
};
use crate::error::{MasterError, Result};
use crate::events::{BusEvent, EventBus, Listener};
use crate::sandbox::{Sandbox, SharedRegistry};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Placement collaborator: decides which sandboxes run which partitions.
pub trait Scheduler: Send + Sync {
    fn plan(&self, job: &Job, sandboxes: &[Sandbox]) -> Result<Schedule>;
}

/// One accepted status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobNotification {
    pub job_id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
    pub at: DateTime<Utc>,
    /// 1-based index of the event in the job's history.
    pub sequence: usize,
}

impl BusEvent for JobNotification {
    type Kind = JobStatus;

    fn kind(&self) -> JobStatus {
        self.to
    }
}

type JobSlot = Arc<Mutex<Job>>;

pub struct JobManager {
    jobs: RwLock<IndexMap<JobId, JobSlot>>,
    validator: Arc<dyn SyntaxValidator>,
    bus: EventBus<JobNotification>,
}

impl JobManager {
    pub fn new(validator: Arc<dyn SyntaxValidator>) -> Self {
        Self {
            jobs: RwLock::new(IndexMap::new()),
            validator,
            bus: EventBus::new(),
        }
    }

    /// Register a fresh CREATED job.
    pub fn create(&self) -> JobId {
        self.insert(Job::new())
    }

    /// Build a job from a raw JSON submission. Nothing is registered if any field is rejected.
    pub fn submit(&self, submission: &Value) -> Result<JobId> {
        let submission = JobSubmission::from_value(submission)?;
        let mut job = Job::new();
        submission.apply(&mut job, self.validator.as_ref())?;
        Ok(self.insert(job))
    }

    /// Copy of the job's current state.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.slot(id).ok().map(|slot| slot.lock().clone())
    }

    /// Job ids in creation order.
    pub fn ids(&self) -> Vec<JobId> {
        self.jobs.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Run `f` with exclusive access to the job. Any transitions `f` makes
    /// are published once the job lock is released.
    pub fn with_job<R>(&self, id: JobId, f: impl FnOnce(&mut Job) -> R) -> Result<R> {
        let slot = self.slot(id)?;
        let (result, notifications) = {
            let mut job = slot.lock();
            let seen = job.events().len();
            let before = job.status();
            let result = f(&mut *job);
            (result, notifications_since(&job, seen, before))
        };
        for notification in &notifications {
            self.bus.publish(notification);
        }
        Ok(result)
    }

    pub fn set_application(&self, id: JobId, source: impl Into<String>) -> Result<()> {
        let validator = Arc::clone(&self.validator);
        self.with_job(id, |job| job.set_application(source, validator.as_ref()))?
    }

    pub fn transition(&self, id: JobId, next: JobStatus) -> Result<JobEvent> {
        self.with_job(id, |job| job.transition(next).cloned())?
    }

    pub fn deploy(&self, id: JobId, parent: SessionId) -> Result<JobEvent> {
        self.with_job(id, |job| job.deploy(parent).cloned())?
    }

    pub fn abort(&self, id: JobId) -> Result<JobEvent> {
        self.with_job(id, |job| job.abort().cloned())?
    }

    /// Ask `scheduler` for a placement over the sandboxes currently in
    /// `registry` and store it on the job. Only CREATED jobs accept a schedule.
    pub fn schedule(
        &self,
        id: JobId,
        scheduler: &dyn Scheduler,
        registry: &SharedRegistry,
    ) -> Result<Schedule> {
        let sandboxes = registry.sandboxes();
        self.with_job(id, |job| -> Result<Schedule> {
            if job.status() != JobStatus::Created {
                return Err(MasterError::validation(
                    "schedule",
                    format!("job is {} and can no longer be scheduled", job.status()),
                ));
            }
            let schedule = scheduler.plan(job, &sandboxes)?;
            job.set_schedule(schedule.clone())?;
            debug!(job_id = %id, sandboxes = sandboxes.len(), "Job scheduled");
            Ok(schedule)
        })?
    }

    /// Drop a job that has reached a terminal status.
    pub fn remove(&self, id: JobId) -> Result<Job> {
        let mut jobs = self.jobs.write();
        let slot = jobs.get(&id).ok_or_else(|| not_found(id))?;
        let status = slot.lock().status();
        if !status.is_terminal() {
            return Err(MasterError::validation(
                "job",
                format!("job {} is {} and cannot be removed yet", id, status),
            ));
        }
        let slot = jobs.shift_remove(&id).ok_or_else(|| not_found(id))?;
        drop(jobs);

        info!(job_id = %id, %status, "Job removed");
        let job = slot.lock().clone();
        Ok(job)
    }

    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<JobId> {
        self.jobs
            .read()
            .iter()
            .filter(|(_, slot)| slot.lock().status() == status)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn events(&self) -> &EventBus<JobNotification> {
        &self.bus
    }

    /// Listen for transitions into `status`.
    pub fn subscribe<F>(&self, status: JobStatus, f: F) -> Listener<JobNotification>
    where
        F: Fn(&JobNotification) + Send + Sync + 'static,
    {
        self.bus.on(status, f)
    }

    pub fn unsubscribe(&self, status: JobStatus, listener: &Listener<JobNotification>) -> bool {
        self.bus.unsubscribe(status, listener)
    }

    fn insert(&self, job: Job) -> JobId {
        let id = job.id();
        debug!(job_id = %id, name = job.name(), "Job registered");
        self.jobs.write().insert(id, Arc::new(Mutex::new(job)));
        id
    }

    fn slot(&self, id: JobId) -> Result<JobSlot> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }
}

impl Default for JobManager {
    fn default() -> Self {
        Self::new(Arc::new(JsSyntaxValidator))
    }
}

fn not_found(id: JobId) -> MasterError {
    MasterError::NotFound {
        kind: "job",
        id: id.to_string(),
    }
}

fn notifications_since(job: &Job, seen: usize, mut from: JobStatus) -> Vec<JobNotification> {
    job.events()
        .iter()
        .enumerate()
        .skip(seen)
        .map(|(index, event)| {
            let notification = JobNotification {
                job_id: job.id(),
                from,
                to: event.status(),
                at: event.time(),
                sequence: index + 1,
            };
            info!(job_id = %job.id(), from = %from, to = %event.status(), "Job status changed");
            from = event.status();
            notification
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxId;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct EvenSplit;

    impl Scheduler for EvenSplit {
        fn plan(&self, job: &Job, sandboxes: &[Sandbox]) -> Result<Schedule> {
            if sandboxes.is_empty() {
                return Err(MasterError::validation("schedule", "no sandboxes available"));
            }
            let partitions = job
                .parameters()
                .and_then(|p| p.partition_count())
                .unwrap_or(1);
            let plan: Vec<Value> = (0..partitions)
                .map(|i| json!(sandboxes[i % sandboxes.len()].id.as_str()))
                .collect();
            Ok(Schedule::new(Value::Array(plan)))
        }
    }

    fn session() -> SessionId {
        SessionId::new("client-7").unwrap()
    }

    #[test]
    fn test_create_and_lookup() {
        let manager = JobManager::default();
        let a = manager.create();
        let b = manager.create();

        assert_eq!(manager.ids(), vec![a, b]);
        assert_eq!(manager.len(), 2);
        assert_eq!(manager.get(a).unwrap().status(), JobStatus::Created);
        assert!(manager.get(JobId::generate()).is_none());
    }

    #[test]
    fn test_submit_rejects_whole_job() {
        let manager = JobManager::default();
        let err = manager
            .submit(&json!({"name": "bad", "application": "f(}"}))
            .unwrap_err();
        assert!(err.is_validation());
        assert!(manager.is_empty());

        let id = manager
            .submit(&json!({"name": "good", "type": "_STREAM", "application": "f()"}))
            .unwrap();
        assert_eq!(manager.get(id).unwrap().name(), "good");
    }

    #[test]
    fn test_transitions_are_published() {
        let manager = JobManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for status in JobStatus::ALL {
            let seen = Arc::clone(&seen);
            manager.subscribe(status, move |n| seen.lock().push((n.from, n.to, n.sequence)));
        }

        let id = manager.create();
        manager.deploy(id, session()).unwrap();
        manager.transition(id, JobStatus::Executing).unwrap();
        manager.abort(id).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (JobStatus::Created, JobStatus::Deployed, 1),
                (JobStatus::Deployed, JobStatus::Executing, 2),
                (JobStatus::Executing, JobStatus::Aborted, 3),
            ]
        );
    }

    #[test]
    fn test_rejected_transition_publishes_nothing() {
        let manager = JobManager::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        manager.subscribe(JobStatus::Completed, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = manager.create();
        let err = manager.transition(id, JobStatus::Completed).unwrap_err();
        assert!(matches!(err, MasterError::InvalidTransition { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(manager.get(id).unwrap().events().is_empty());
    }

    #[test]
    fn test_listener_can_read_job_back() {
        let manager = Arc::new(JobManager::default());
        let observed = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&manager);
        let slot = Arc::clone(&observed);
        manager.subscribe(JobStatus::Deployed, move |n| {
            if let Some(manager) = weak.upgrade() {
                *slot.lock() = manager.get(n.job_id).map(|job| job.status());
            }
        });

        let id = manager.create();
        manager.deploy(id, session()).unwrap();
        assert_eq!(*observed.lock(), Some(JobStatus::Deployed));
    }

    #[test]
    fn test_concurrent_transitions_on_one_job() {
        let manager = JobManager::default();
        let id = manager.create();

        let accepted = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if manager.transition(id, JobStatus::Deployed).is_ok() {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        let job = manager.get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Deployed);
        assert_eq!(job.events().len(), 1);
    }

    #[test]
    fn test_remove_only_terminal_jobs() {
        let manager = JobManager::default();
        let id = manager.create();

        assert!(manager.remove(id).unwrap_err().is_validation());
        manager.deploy(id, session()).unwrap();
        manager.transition(id, JobStatus::Executing).unwrap();
        manager.transition(id, JobStatus::Completed).unwrap();

        let removed = manager.remove(id).unwrap();
        assert_eq!(removed.status(), JobStatus::Completed);
        assert!(matches!(
            manager.remove(id),
            Err(MasterError::NotFound { kind: "job", .. })
        ));
    }

    #[test]
    fn test_jobs_with_status() {
        let manager = JobManager::default();
        let a = manager.create();
        let b = manager.create();
        manager.deploy(b, session()).unwrap();

        assert_eq!(manager.jobs_with_status(JobStatus::Created), vec![a]);
        assert_eq!(manager.jobs_with_status(JobStatus::Deployed), vec![b]);
        assert!(manager.jobs_with_status(JobStatus::Failed).is_empty());
    }

    #[test]
    fn test_schedule_over_registry() {
        let manager = JobManager::default();
        let registry = SharedRegistry::new();
        let id = manager
            .submit(&json!({"paramsArePartitioned": true, "parameters": [1, 2, 3]}))
            .unwrap();

        assert!(manager.schedule(id, &EvenSplit, &registry).is_err());

        registry.update(|r| {
            r.insert(Sandbox::new(SandboxId::new("s1").unwrap()));
            r.insert(Sandbox::new(SandboxId::new("s2").unwrap()));
        });
        let schedule = manager.schedule(id, &EvenSplit, &registry).unwrap();
        assert_eq!(schedule.plan(), &json!(["s1", "s2", "s1"]));
        assert_eq!(manager.get(id).unwrap().schedule(), Some(&schedule));

        manager.deploy(id, session()).unwrap();
        assert!(manager.schedule(id, &EvenSplit, &registry).is_err());
    }

    #[test]
    fn test_custom_validator() {
        let manager = JobManager::new(Arc::new(|src: &str| {
            if src.contains("eval") {
                Err("eval is not allowed".to_string())
            } else {
                Ok(())
            }
        }));
        let id = manager.create();
        assert!(manager.set_application(id, "eval(x)").is_err());
        manager.set_application(id, "run(x)").unwrap();
        assert_eq!(manager.get(id).unwrap().application(), Some("run(x)"));
    }
}
