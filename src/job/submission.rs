use super::{Job, JobParameters, JobType, RemoteDisk, SyntaxValidator};
use crate::error::{MasterError, Result};
use serde_json::{Map, Value};

/// A job submission decoded from JSON, validated field by field.
///
/// Absent fields leave the job's current value in place. Applying is
/// all-or-nothing: the job is only modified once every field has passed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSubmission {
    pub name: Option<String>,
    pub description: Option<String>,
    pub job_type: Option<JobType>,
    pub params_partitioned: Option<bool>,
    pub application: Option<String>,
    pub parameters: Option<JobParameters>,
    pub remote_disks: Option<Vec<RemoteDisk>>,
}

impl JobSubmission {
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Object(fields) = value else {
            return Err(MasterError::validation("job submission", "must be a JSON object"));
        };

        if let Some(unknown) = fields.keys().find(|k| !KNOWN_FIELDS.contains(&k.as_str())) {
            return Err(MasterError::validation(
                unknown.as_str(),
                "unknown job submission field",
            ));
        }

        Ok(Self {
            name: text(fields, "name")?,
            description: text(fields, "description")?,
            job_type: fields.get("type").map(JobType::try_from).transpose()?,
            params_partitioned: match fields.get("paramsArePartitioned") {
                None => None,
                Some(Value::Bool(flag)) => Some(*flag),
                Some(other) => {
                    return Err(MasterError::validation(
                        "paramsArePartitioned",
                        format!("expected a boolean, got {}", other),
                    ))
                }
            },
            application: text(fields, "application")?,
            parameters: fields.get("parameters").cloned().map(JobParameters::new),
            remote_disks: match fields.get("remoteDisks") {
                None => None,
                Some(Value::Array(entries)) => Some(
                    entries
                        .iter()
                        .map(|entry| match entry {
                            Value::String(raw) => RemoteDisk::parse(raw),
                            other => Err(MasterError::validation(
                                "remoteDisks",
                                format!("expected a disk reference string, got {}", other),
                            )),
                        })
                        .collect::<Result<Vec<_>>>()?,
                ),
                Some(other) => {
                    return Err(MasterError::validation(
                        "remoteDisks",
                        format!("expected an array, got {}", other),
                    ))
                }
            },
        })
    }

    /// Validate against `job` on a scratch copy, then commit.
    pub fn apply(self, job: &mut Job, validator: &dyn SyntaxValidator) -> Result<()> {
        let mut staged = job.clone();

        if let Some(name) = self.name {
            staged.set_name(name);
        }
        if let Some(description) = self.description {
            staged.set_description(description);
        }
        if let Some(job_type) = self.job_type {
            staged.set_job_type(job_type)?;
        }
        // Clearing the flag first lets non-array parameters through; setting
        // it last checks it against the new parameters.
        if self.params_partitioned == Some(false) {
            staged.set_params_partitioned(false)?;
        }
        if let Some(parameters) = self.parameters {
            staged.set_parameters(parameters)?;
        }
        if self.params_partitioned == Some(true) {
            staged.set_params_partitioned(true)?;
        }
        if let Some(application) = self.application {
            staged.set_application(application, validator)?;
        }
        if let Some(disks) = self.remote_disks {
            staged.set_remote_disks(disks)?;
        }

        *job = staged;
        Ok(())
    }
}

const KNOWN_FIELDS: [&str; 7] = [
    "name",
    "description",
    "type",
    "paramsArePartitioned",
    "application",
    "parameters",
    "remoteDisks",
];

fn text(fields: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match fields.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(MasterError::validation(
            key,
            format!("expected a string, got {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobStatus, JsSyntaxValidator};
    use serde_json::json;

    #[test]
    fn test_full_submission() {
        let submission = JobSubmission::from_value(&json!({
            "name": "word count",
            "description": "counts words",
            "type": "_BATCH",
            "paramsArePartitioned": true,
            "application": "function run(p){return p.length;}",
            "parameters": [["a"], ["b", "c"]],
            "remoteDisks": ["https://disks.example.org/corpus"]
        }))
        .unwrap();

        let mut job = Job::new();
        submission.apply(&mut job, &JsSyntaxValidator).unwrap();

        assert_eq!(job.name(), "word count");
        assert_eq!(job.job_type(), Some(JobType::Batch));
        assert!(job.params_partitioned());
        assert_eq!(job.parameters().unwrap().partition_count(), Some(2));
        assert_eq!(job.remote_disks().len(), 1);
        assert_eq!(job.status(), JobStatus::Created);
    }

    #[test]
    fn test_field_type_errors() {
        for (field, value) in [
            ("name", json!(2)),
            ("description", json!(false)),
            ("type", json!(2)),
            ("type", json!("hello")),
            ("paramsArePartitioned", json!("hello")),
            ("paramsArePartitioned", json!(2)),
            ("application", json!(2)),
            ("remoteDisks", json!(2)),
            ("remoteDisks", json!([{}, "hello"])),
            ("colour", json!("blue")),
        ] {
            let mut fields = Map::new();
            fields.insert(field.to_string(), value.clone());
            let err = JobSubmission::from_value(&Value::Object(fields)).unwrap_err();
            assert!(err.is_validation(), "{} = {} should be rejected", field, value);
        }
        assert!(JobSubmission::from_value(&json!([1])).is_err());
    }

    #[test]
    fn test_failed_apply_leaves_job_unchanged() {
        let mut job = Job::new();
        job.set_name("kept");
        let kept_name = job.name().to_string();

        let submission = JobSubmission::from_value(&json!({
            "name": "replaced",
            "type": "_STREAM",
            "application": "if(true){var a=10;}else j='hello';}"
        }))
        .unwrap();

        assert!(submission.apply(&mut job, &JsSyntaxValidator).is_err());
        assert_eq!(job.name(), kept_name);
        assert!(job.job_type().is_none());
        assert!(job.application().is_none());
    }

    #[test]
    fn test_partitioned_flag_with_object_parameters() {
        let submission = JobSubmission::from_value(&json!({
            "paramsArePartitioned": true,
            "parameters": {"data": [1, 2, 3], "flag": true}
        }))
        .unwrap();
        let mut job = Job::new();
        assert!(submission.apply(&mut job, &JsSyntaxValidator).is_err());
        assert!(job.parameters().is_none());
    }
}
