//! Job registry (spec §11 supplement): an in-memory CRUD surface over
//! scheduled and manual pipeline runs, used by the execution monitor and
//! exposed read-only through the Query API.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Daily,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Running,
    Completed,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub job_type: JobType,
    pub scheduled_for: DateTime<Utc>,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, record: JobRecord) {
        self.jobs.write().insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().get(id).cloned()
    }

    pub fn update_status(&self, id: &str, status: JobStatus) {
        if let Some(record) = self.jobs.write().get_mut(id) {
            record.status = status;
            if matches!(status, JobStatus::Completed | JobStatus::Failed | JobStatus::TimedOut) {
                record.finished_at = Some(Utc::now());
            }
        }
    }

    pub fn list_by_status(&self, status: JobStatus) -> Vec<JobRecord> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.status == status)
            .cloned()
            .collect()
    }

    pub fn list_by_type(&self, job_type: JobType) -> Vec<JobRecord> {
        self.jobs
            .read()
            .values()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }

    pub fn remove(&self, id: &str) -> bool {
        self.jobs.write().remove(id).is_some()
    }

    pub fn clear(&self) {
        self.jobs.write().clear();
    }

    pub fn count(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn list_all(&self) -> Vec<JobRecord> {
        self.jobs.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: &str, status: JobStatus) -> JobRecord {
        JobRecord {
            id: id.to_string(),
            job_type: JobType::Manual,
            scheduled_for: Utc::now(),
            status,
            started_at: Some(Utc::now()),
            finished_at: None,
        }
    }

    #[test]
    fn register_then_get_round_trips() {
        let registry = JobRegistry::new();
        registry.register(sample("job-1", JobStatus::Running));
        assert_eq!(registry.get("job-1").unwrap().status, JobStatus::Running);
    }

    #[test]
    fn update_status_sets_finished_at_on_terminal_states() {
        let registry = JobRegistry::new();
        registry.register(sample("job-1", JobStatus::Running));
        registry.update_status("job-1", JobStatus::Completed);
        let job = registry.get("job-1").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn list_by_status_filters_correctly() {
        let registry = JobRegistry::new();
        registry.register(sample("a", JobStatus::Running));
        registry.register(sample("b", JobStatus::Completed));
        assert_eq!(registry.list_by_status(JobStatus::Running).len(), 1);
    }

    #[test]
    fn remove_and_clear_shrink_the_registry() {
        let registry = JobRegistry::new();
        registry.register(sample("a", JobStatus::Running));
        registry.register(sample("b", JobStatus::Running));
        assert!(registry.remove("a"));
        assert_eq!(registry.count(), 1);
        registry.clear();
        assert_eq!(registry.count(), 0);
    }
}
