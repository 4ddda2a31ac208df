use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::job::JobState;

/// Scheduler operational metrics exposed to the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerMetrics {
    /// Finished executions by job name.
    pub tasks_executed: HashMap<String, u64>,
    /// Failed or timed-out executions by job name.
    pub tasks_failed: HashMap<String, u64>,
    /// Cancelled executions by job name.
    pub tasks_cancelled: HashMap<String, u64>,
    /// Average run duration by job name.
    #[serde(serialize_with = "serialize_millis")]
    pub avg_task_duration: HashMap<String, Duration>,
    /// Last finish time by job name.
    pub last_run: HashMap<String, DateTime<Utc>>,
    /// Submissions refused because the queue bound was reached.
    pub backpressure_rejections: u64,
    /// Dispatch ticks completed / failed.
    pub ticks: u64,
    pub tick_failures: u64,
    /// Running tasks over total capacity (0.0 - 1.0).
    pub worker_utilization: f64,
}

impl SchedulerMetrics {
    /// Record a finished execution.
    pub fn record_execution(&mut self, job_name: &str, state: JobState, duration: Duration) {
        match state {
            JobState::Failed => *self.tasks_failed.entry(job_name.to_string()).or_default() += 1,
            JobState::Cancelled => {
                *self.tasks_cancelled.entry(job_name.to_string()).or_default() += 1
            }
            _ => {}
        }
        *self.tasks_executed.entry(job_name.to_string()).or_default() += 1;
        self.last_run.insert(job_name.to_string(), Utc::now());

        let count = self.tasks_executed[job_name];
        let prev_avg = self
            .avg_task_duration
            .get(job_name)
            .copied()
            .unwrap_or_default();

        // Incremental mean: new_avg = prev_avg + (duration - prev_avg) / count
        let new_avg = if count == 1 {
            duration
        } else {
            let prev_nanos = prev_avg.as_nanos() as f64;
            let cur_nanos = duration.as_nanos() as f64;
            let avg_nanos = prev_nanos + (cur_nanos - prev_nanos) / count as f64;
            Duration::from_nanos(avg_nanos as u64)
        };

        self.avg_task_duration.insert(job_name.to_string(), new_avg);
    }

    pub fn record_backpressure(&mut self) {
        self.backpressure_rejections += 1;
    }

    pub fn record_tick(&mut self, ok: bool) {
        self.ticks += 1;
        if !ok {
            self.tick_failures += 1;
        }
    }
}

fn serialize_millis<S>(map: &HashMap<String, Duration>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeMap;
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (name, d) in map {
        out.serialize_entry(name, &(d.as_millis() as u64))?;
    }
    out.end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_single_execution() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("poll:edge-1", JobState::Succeeded, Duration::from_millis(100));

        assert_eq!(m.tasks_executed["poll:edge-1"], 1);
        assert!(m.last_run.contains_key("poll:edge-1"));
        assert_eq!(m.avg_task_duration["poll:edge-1"], Duration::from_millis(100));
        assert!(m.tasks_failed.is_empty());
    }

    #[test]
    fn record_multiple_executions_averages() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("task", JobState::Succeeded, Duration::from_millis(100));
        m.record_execution("task", JobState::Failed, Duration::from_millis(200));

        assert_eq!(m.tasks_executed["task"], 2);
        assert_eq!(m.tasks_failed["task"], 1);
        let avg = m.avg_task_duration["task"].as_millis();
        assert!((140..=160).contains(&avg), "expected ~150ms, got {}ms", avg);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let mut m = SchedulerMetrics::default();
        m.record_execution("t", JobState::Cancelled, Duration::from_millis(1500));
        m.record_backpressure();
        m.record_tick(false);
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["avg_task_duration"]["t"], 1500);
        assert_eq!(json["tasks_cancelled"]["t"], 1);
        assert_eq!(json["backpressure_rejections"], 1);
        assert_eq!(json["tick_failures"], 1);
    }
}
