//! Versioned `job_state` blob.
//!
//! ```json
//! {"version": 1, "job": { ...Job... }}
//! ```
//!
//! The version is read on its own first so that a blob written by another
//! layout is reported as such instead of as a field error.

use cadence_core::Job;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub const STATE_VERSION: u32 = 1;

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    job: &'a Job,
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

#[derive(Deserialize)]
struct Decoded {
    job: Job,
}

pub fn encode(job: &Job) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&Envelope {
        version: STATE_VERSION,
        job,
    })?)
}

/// Decode the blob stored under `id`.
pub fn decode(id: &str, bytes: &[u8]) -> Result<Job> {
    let fail = |reason: String| StoreError::Decode {
        id: id.to_string(),
        reason,
    };

    let probe: VersionProbe =
        serde_json::from_slice(bytes).map_err(|e| fail(format!("unreadable header: {e}")))?;
    if probe.version != STATE_VERSION {
        return Err(fail(format!(
            "unsupported state version {} (expected {STATE_VERSION})",
            probe.version
        )));
    }

    let decoded: Decoded = serde_json::from_slice(bytes).map_err(|e| fail(e.to_string()))?;
    if decoded.job.id != id {
        return Err(fail(format!("state belongs to job {}", decoded.job.id)));
    }
    Ok(decoded.job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::{JobSpec, SchedulerConfig, Trigger};
    use chrono::{TimeZone, Utc};

    fn sample() -> Job {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        JobSpec::new(Trigger::parse("cron", "0 30 9 * * mon-fri", now).unwrap(), "backup.sh")
            .id("nightly")
            .arg("--full")
            .kwarg("TARGET", "s3")
            .coalesce(false)
            .max_instances(2)
            .into_job(&SchedulerConfig::default(), now)
            .unwrap()
    }

    #[test]
    fn decodes_what_it_encodes() {
        let job = sample();
        let blob = encode(&job).unwrap();
        assert_eq!(decode("nightly", &blob).unwrap(), job);
    }

    #[test]
    fn rejects_other_versions() {
        let mut value: serde_json::Value = serde_json::from_slice(&encode(&sample()).unwrap()).unwrap();
        value["version"] = 2.into();
        let err = decode("nightly", &serde_json::to_vec(&value).unwrap()).unwrap_err();
        assert!(err.to_string().contains("unsupported state version 2"), "{err}");
    }

    #[test]
    fn rejects_garbage_and_foreign_ids() {
        assert!(matches!(decode("x", b"not json"), Err(StoreError::Decode { .. })));
        let blob = encode(&sample()).unwrap();
        assert!(matches!(decode("other", &blob), Err(StoreError::Decode { .. })));
    }
}
