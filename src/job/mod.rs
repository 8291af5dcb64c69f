//! Job entity and its lifecycle.
//!
//! Status only changes through [`Job::transition`], which walks
//! `CREATED -> DEPLOYED -> EXECUTING -> {COMPLETED, FAILED, ABORTED}` and
//! records one [`JobEvent`] per accepted step.

use crate::error::{MasterError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use url::Url;
use uuid::Uuid;

pub mod manager;
pub mod submission;
pub mod validator;

pub use manager::{JobManager, JobNotification, Scheduler};
pub use submission::JobSubmission;
pub use validator::{JsSyntaxValidator, SyntaxValidator};

/// Globally unique job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| MasterError::validation("job id", e.to_string()))
    }
}

/// Connection a job was submitted from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(MasterError::validation("parent session id", "must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = MasterError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "_STREAM")]
    Streaming,
    #[serde(rename = "_BATCH")]
    Batch,
}

impl JobType {
    pub fn tag(&self) -> &'static str {
        match self {
            JobType::Streaming => "_STREAM",
            JobType::Batch => "_BATCH",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JobType {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "_STREAM" | "STREAMING" => Ok(JobType::Streaming),
            "_BATCH" | "BATCH" => Ok(JobType::Batch),
            other => Err(MasterError::validation(
                "job type",
                format!("'{}' is not one of _STREAM, _BATCH", other),
            )),
        }
    }
}

impl TryFrom<&Value> for JobType {
    type Error = MasterError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(tag) => tag.parse(),
            other => Err(MasterError::validation(
                "job type",
                format!("expected a type tag string, got {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "_CREATED")]
    Created,
    #[serde(rename = "_DEPLOYED")]
    Deployed,
    #[serde(rename = "_EXECUTING")]
    Executing,
    #[serde(rename = "_COMPLETED")]
    Completed,
    #[serde(rename = "_FAILED")]
    Failed,
    #[serde(rename = "_ABORTED")]
    Aborted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Created,
        JobStatus::Deployed,
        JobStatus::Executing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Aborted,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            JobStatus::Created => "_CREATED",
            JobStatus::Deployed => "_DEPLOYED",
            JobStatus::Executing => "_EXECUTING",
            JobStatus::Completed => "_COMPLETED",
            JobStatus::Failed => "_FAILED",
            JobStatus::Aborted => "_ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted
        )
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Created, JobStatus::Deployed)
                | (JobStatus::Deployed, JobStatus::Executing)
                | (
                    JobStatus::Executing,
                    JobStatus::Completed | JobStatus::Failed | JobStatus::Aborted
                )
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for JobStatus {
    type Err = MasterError;

    fn from_str(s: &str) -> Result<Self> {
        let bare = s.strip_prefix('_').unwrap_or(s);
        JobStatus::ALL
            .into_iter()
            .find(|status| &status.tag()[1..] == bare)
            .ok_or_else(|| MasterError::validation("job status", format!("unknown status '{}'", s)))
    }
}

/// Immutable `(time, status)` record of one accepted transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobEvent {
    time: DateTime<Utc>,
    status: JobStatus,
}

impl JobEvent {
    fn now(status: JobStatus) -> Self {
        Self {
            time: Utc::now(),
            status,
        }
    }

    pub fn time(&self) -> DateTime<Utc> {
        self.time
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }
}

/// Application parameters; when partitioned, `data` holds one element per partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    data: Value,
}

impl JobParameters {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn partition_count(&self) -> Option<usize> {
        self.data.as_array().map(Vec::len)
    }
}

/// Placement plan produced by the scheduler. Opaque to the lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    plan: Value,
}

impl Schedule {
    pub fn new(plan: Value) -> Self {
        Self { plan }
    }

    pub fn plan(&self) -> &Value {
        &self.plan
    }
}

/// Reference to a remote disk: an absolute http(s) URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteDisk(Url);

impl RemoteDisk {
    pub fn parse(raw: &str) -> Result<Self> {
        let url = Url::parse(raw.trim())
            .map_err(|e| MasterError::validation("remote disk", format!("'{}': {}", raw, e)))?;
        if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
            return Err(MasterError::validation(
                "remote disk",
                format!("'{}' is not an http(s) disk reference", raw),
            ));
        }
        Ok(Self(url))
    }

    pub fn url(&self) -> &Url {
        &self.0
    }
}

impl TryFrom<String> for RemoteDisk {
    type Error = MasterError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RemoteDisk> for String {
    fn from(disk: RemoteDisk) -> Self {
        disk.0.into()
    }
}

/// A unit of submitted work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    id: JobId,
    name: String,
    description: String,
    job_type: Option<JobType>,
    params_partitioned: bool,
    application: Option<String>,
    parameters: Option<JobParameters>,
    schedule: Option<Schedule>,
    remote_disks: Vec<RemoteDisk>,
    parent_session: Option<SessionId>,
    status: JobStatus,
    events: Vec<JobEvent>,
}

impl Job {
    pub fn new() -> Self {
        let id = JobId::generate();
        let created = Utc::now();
        Self {
            id,
            name: format!("Job-{}-{}", id, created.format("%Y-%m-%d %H:%M:%S")),
            description: String::new(),
            job_type: None,
            params_partitioned: false,
            application: None,
            parameters: None,
            schedule: None,
            remote_disks: Vec::new(),
            parent_session: None,
            status: JobStatus::Created,
            events: Vec::new(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn job_type(&self) -> Option<JobType> {
        self.job_type
    }

    pub fn params_partitioned(&self) -> bool {
        self.params_partitioned
    }

    pub fn application(&self) -> Option<&str> {
        self.application.as_deref()
    }

    pub fn parameters(&self) -> Option<&JobParameters> {
        self.parameters.as_ref()
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn remote_disks(&self) -> &[RemoteDisk] {
        &self.remote_disks
    }

    pub fn parent_session(&self) -> Option<&SessionId> {
        self.parent_session.as_ref()
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn events(&self) -> &[JobEvent] {
        &self.events
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn set_job_type(&mut self, job_type: JobType) -> Result<JobType> {
        self.ensure_configurable("job type")?;
        self.job_type = Some(job_type);
        Ok(job_type)
    }

    /// Parse a type tag; on failure the current type is kept.
    pub fn set_job_type_tag(&mut self, tag: &str) -> Result<JobType> {
        let job_type = tag.parse()?;
        self.set_job_type(job_type)
    }

    pub fn set_params_partitioned(&mut self, partitioned: bool) -> Result<bool> {
        self.ensure_configurable("partitioning flag")?;
        if partitioned {
            if let Some(params) = &self.parameters {
                check_partitioned(params)?;
            }
        }
        self.params_partitioned = partitioned;
        Ok(partitioned)
    }

    pub fn set_application(
        &mut self,
        source: impl Into<String>,
        validator: &dyn SyntaxValidator,
    ) -> Result<()> {
        self.ensure_configurable("application")?;
        let source = source.into();
        validator
            .check(&source)
            .map_err(|reason| MasterError::validation("application", reason))?;
        self.application = Some(source);
        Ok(())
    }

    pub fn set_parameters(&mut self, parameters: JobParameters) -> Result<()> {
        self.ensure_configurable("parameters")?;
        if self.params_partitioned {
            check_partitioned(&parameters)?;
        }
        self.parameters = Some(parameters);
        Ok(())
    }

    pub fn set_schedule(&mut self, schedule: Schedule) -> Result<()> {
        self.ensure_configurable("schedule")?;
        self.schedule = Some(schedule);
        Ok(())
    }

    pub fn set_remote_disks(&mut self, disks: Vec<RemoteDisk>) -> Result<()> {
        self.ensure_configurable("remote disks")?;
        self.remote_disks = disks;
        Ok(())
    }

    /// Move to `next`, appending exactly one event. Rejected moves leave the job untouched.
    pub fn transition(&mut self, next: JobStatus) -> Result<&JobEvent> {
        if !self.status.can_transition_to(next) {
            return Err(MasterError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.events.push(JobEvent::now(next));
        Ok(&self.events[self.events.len() - 1])
    }

    /// Record the originating session and move to DEPLOYED.
    pub fn deploy(&mut self, parent: SessionId) -> Result<&JobEvent> {
        if let Some(existing) = &self.parent_session {
            return Err(MasterError::validation(
                "parent session id",
                format!("already set to '{}'", existing),
            ));
        }
        if !self.status.can_transition_to(JobStatus::Deployed) {
            return Err(MasterError::InvalidTransition {
                from: self.status.to_string(),
                to: JobStatus::Deployed.to_string(),
            });
        }
        self.parent_session = Some(parent);
        self.transition(JobStatus::Deployed)
    }

    pub fn start(&mut self) -> Result<&JobEvent> {
        self.transition(JobStatus::Executing)
    }

    pub fn complete(&mut self) -> Result<&JobEvent> {
        self.transition(JobStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<&JobEvent> {
        self.transition(JobStatus::Failed)
    }

    pub fn abort(&mut self) -> Result<&JobEvent> {
        self.transition(JobStatus::Aborted)
    }

    fn ensure_configurable(&self, field: &str) -> Result<()> {
        if self.status != JobStatus::Created {
            return Err(MasterError::validation(
                field,
                format!("job is {} and can no longer be reconfigured", self.status),
            ));
        }
        Ok(())
    }
}

impl Default for Job {
    fn default() -> Self {
        Self::new()
    }
}

fn check_partitioned(parameters: &JobParameters) -> Result<()> {
    if parameters.partition_count().is_none() {
        return Err(MasterError::validation(
            "parameters",
            "partitioned parameters must be an array of partitions",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn executing_job() -> Job {
        let mut job = Job::new();
        job.deploy(SessionId::new("client-1").unwrap()).unwrap();
        job.start().unwrap();
        job
    }

    #[test]
    fn test_new_job_defaults() {
        let job = Job::new();
        assert_eq!(job.status(), JobStatus::Created);
        assert!(job.events().is_empty());
        assert!(job.name().starts_with(&format!("Job-{}-", job.id())));
        assert_eq!(job.description(), "");
        assert!(job.job_type().is_none());
        assert_ne!(Job::new().id(), job.id());
    }

    #[test]
    fn test_tags() {
        assert_eq!(JobType::Streaming.tag(), "_STREAM");
        assert_eq!(JobType::Batch.tag(), "_BATCH");
        assert_eq!("_EXECUTING".parse::<JobStatus>().unwrap(), JobStatus::Executing);
        assert_eq!("ABORTED".parse::<JobStatus>().unwrap(), JobStatus::Aborted);
        assert!("_RUNNING".parse::<JobStatus>().is_err());
        assert_eq!(
            serde_json::to_value(JobStatus::Completed).unwrap(),
            json!("_COMPLETED")
        );
    }

    #[test]
    fn test_full_lifecycle_records_events() {
        let mut job = executing_job();
        job.complete().unwrap();

        let statuses: Vec<JobStatus> = job.events().iter().map(JobEvent::status).collect();
        assert_eq!(
            statuses,
            vec![JobStatus::Deployed, JobStatus::Executing, JobStatus::Completed]
        );
        assert!(job.events().windows(2).all(|w| w[0].time() <= w[1].time()));
        assert_eq!(job.parent_session().unwrap().as_str(), "client-1");
    }

    #[test]
    fn test_every_pair_against_graph() {
        let reachable = |target: JobStatus| -> Job {
            let mut job = Job::new();
            let path = [JobStatus::Deployed, JobStatus::Executing, target];
            for step in path {
                if job.status() == target {
                    break;
                }
                job.transition(step).unwrap();
            }
            job
        };

        for from in JobStatus::ALL {
            for to in JobStatus::ALL {
                let mut job = reachable(from);
                assert_eq!(job.status(), from);
                let before = job.events().len();
                let result = job.transition(to);
                if from.can_transition_to(to) {
                    assert_eq!(result.unwrap().status(), to);
                    assert_eq!(job.events().len(), before + 1);
                } else {
                    assert!(matches!(result, Err(MasterError::InvalidTransition { .. })));
                    assert_eq!(job.status(), from);
                    assert_eq!(job.events().len(), before);
                }
            }
        }
    }

    #[test]
    fn test_repeat_terminal_rejected() {
        let mut job = executing_job();
        job.fail().unwrap();
        let err = job.fail().unwrap_err();
        assert!(err.is_validation());
        assert!(job.abort().is_err());
        assert_eq!(job.status(), JobStatus::Failed);
        assert_eq!(job.events().len(), 3);
    }

    #[test]
    fn test_deploy_sets_parent_once() {
        let mut job = Job::new();
        job.deploy(SessionId::new("a").unwrap()).unwrap();
        let err = job.deploy(SessionId::new("b").unwrap()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(job.parent_session().unwrap().as_str(), "a");
        assert!(SessionId::new("").is_err());
    }

    #[test]
    fn test_bad_type_keeps_type_unset() {
        let mut job = Job::new();
        assert!(job.set_job_type_tag("hello").unwrap_err().is_validation());
        assert!(JobType::try_from(&json!(2)).is_err());
        assert!(job.job_type().is_none());

        job.set_job_type_tag("_BATCH").unwrap();
        assert!(job.set_job_type_tag("hello").is_err());
        assert_eq!(job.job_type(), Some(JobType::Batch));
        assert_eq!(job.set_job_type(JobType::Streaming).unwrap(), JobType::Streaming);
    }

    #[test]
    fn test_configuration_frozen_after_deploy() {
        let mut job = Job::new();
        job.deploy(SessionId::new("c").unwrap()).unwrap();
        assert!(job.set_job_type(JobType::Batch).is_err());
        assert!(job.set_params_partitioned(true).is_err());
        assert!(job.set_schedule(Schedule::new(json!({}))).is_err());
        job.set_name("renamed");
        assert_eq!(job.name(), "renamed");
    }

    #[test]
    fn test_partitioned_parameters_must_be_array() {
        let mut job = Job::new();
        job.set_params_partitioned(true).unwrap();
        assert!(job.set_parameters(JobParameters::new(json!({"data": 1}))).is_err());
        assert!(job.parameters().is_none());
        job.set_parameters(JobParameters::new(json!([1, 2, 3]))).unwrap();
        assert_eq!(job.parameters().unwrap().partition_count(), Some(3));

        let mut other = Job::new();
        other.set_parameters(JobParameters::new(json!({"flag": true}))).unwrap();
        assert!(other.set_params_partitioned(true).is_err());
        assert!(!other.params_partitioned());
    }

    #[test]
    fn test_remote_disk_references() {
        assert!(RemoteDisk::parse("https://disks.example.org/vol/1").is_ok());
        assert!(RemoteDisk::parse("hello").is_err());
        assert!(RemoteDisk::parse("file:///tmp/disk").is_err());

        let mut job = Job::new();
        let disks = vec![
            RemoteDisk::parse("https://a.example.org/d").unwrap(),
            RemoteDisk::parse("http://10.0.0.2/d").unwrap(),
        ];
        job.set_remote_disks(disks.clone()).unwrap();
        assert_eq!(job.remote_disks(), disks.as_slice());
    }
}
