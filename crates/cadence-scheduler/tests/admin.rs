mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cadence_core::{IntervalTrigger, JobPatch, Trigger, TriggerKind};
use cadence_events::{EventKind, EventMask, SchedulerEvent};
use cadence_store::{JobFilter, MemoryJobStore, Page};
use chrono::Duration;
use common::{at, Harness};

fn every(secs: i64, h: &Harness) -> Trigger {
    Trigger::Interval(IntervalTrigger::every(Duration::seconds(secs), h.scheduler.now()))
}

#[tokio::test]
async fn duplicate_id_conflicts_unless_replacing() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    h.scheduler.add_job(h.spec(every(5, &h), "count", "dup")).unwrap();

    let err = h
        .scheduler
        .add_job(h.spec(every(9, &h), "count", "dup"))
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let replaced = h
        .scheduler
        .add_job(h.spec(every(9, &h), "count", "dup").replace_existing(true))
        .unwrap();
    assert_eq!(h.scheduler.get_job("dup").unwrap(), replaced);
    assert_eq!(replaced.trigger.rule(), "9s");
    assert_eq!(h.count(EventKind::JobAdded), 2);
}

#[tokio::test]
async fn add_job_validates_its_targets() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    let err = h
        .scheduler
        .add_job(h.spec(every(5, &h), "count", "a").jobstore("nowhere"))
        .unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_JOBSTORE");

    let err = h
        .scheduler
        .add_job(h.spec(every(5, &h), "count", "a").max_instances(0))
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_JOB");

    let now = h.scheduler.now();
    let finished = Trigger::Interval(
        IntervalTrigger::every(Duration::seconds(5), now - Duration::hours(2))
            .ending_at(now - Duration::hours(1)),
    );
    let err = h.scheduler.add_job(h.spec(finished, "count", "a")).unwrap_err();
    assert_eq!(err.code(), "BAD_TRIGGER");
    assert_eq!(h.count(EventKind::JobAdded), 0);
}

#[tokio::test]
async fn added_job_event_carries_trigger_and_rule() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    let trigger = Trigger::parse("cron", "0 30 9 * * mon-fri", h.scheduler.now()).unwrap();
    h.scheduler.add_job(h.spec(trigger, "count", "standup")).unwrap();

    assert_eq!(
        h.events(),
        vec![SchedulerEvent::JobAdded {
            job_id: "standup".into(),
            jobstore: "default".into(),
            trigger: TriggerKind::Cron,
            rule: "0 30 9 * * mon-fri".into(),
        }]
    );
}

#[tokio::test]
async fn modify_keeps_pause_and_reschedule_restarts() {
    let t0 = at("2025-01-01T00:00:00Z");
    let h = Harness::new(t0);
    h.scheduler.add_job(h.spec(every(10, &h), "count", "m")).unwrap();

    let renamed = h
        .scheduler
        .modify_job(
            "m",
            JobPatch {
                name: Some("renamed".into()),
                max_instances: Some(3),
                ..JobPatch::default()
            },
        )
        .unwrap();
    assert_eq!(renamed.name, "renamed");
    assert_eq!(renamed.max_instances, 3);
    assert_eq!(renamed.next_run_time, Some(t0 + Duration::seconds(10)));

    h.set(t0 + Duration::seconds(3));
    let rescheduled = h.scheduler.reschedule_job("m", every(60, &h)).unwrap();
    assert_eq!(rescheduled.next_run_time, Some(t0 + Duration::seconds(63)));

    h.scheduler.pause_job("m").unwrap();
    let still_paused = h.scheduler.reschedule_job("m", every(30, &h)).unwrap();
    assert_eq!(still_paused.next_run_time, None);
    assert_eq!(still_paused.trigger.rule(), "30s");

    let err = h
        .scheduler
        .modify_job(
            "m",
            JobPatch {
                executor: Some("gpu".into()),
                ..JobPatch::default()
            },
        )
        .unwrap_err();
    assert_eq!(err.code(), "UNKNOWN_EXECUTOR");
    assert_eq!(h.count(EventKind::JobModified), 4);
}

#[tokio::test]
async fn missing_jobs_are_not_found() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    assert_eq!(h.scheduler.get_job("ghost").unwrap_err().code(), "NOT_FOUND");
    assert_eq!(h.scheduler.remove_job("ghost").unwrap_err().code(), "NOT_FOUND");
    assert_eq!(h.scheduler.pause_job("ghost").unwrap_err().code(), "NOT_FOUND");
    assert_eq!(h.scheduler.resume_job("ghost").unwrap_err().code(), "NOT_FOUND");
    assert_eq!(
        h.scheduler
            .modify_job("ghost", JobPatch::default())
            .unwrap_err()
            .code(),
        "NOT_FOUND"
    );
}

#[tokio::test]
async fn remove_and_remove_all() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    h.scheduler
        .add_jobstore("side", Arc::new(MemoryJobStore::new()))
        .unwrap();
    for id in ["a", "b"] {
        h.scheduler.add_job(h.spec(every(5, &h), "count", id)).unwrap();
    }
    h.scheduler
        .add_job(h.spec(every(5, &h), "count", "c").jobstore("side"))
        .unwrap();

    h.scheduler.remove_job("a").unwrap();
    assert!(h.scheduler.get_job("a").is_err());

    assert_eq!(h.scheduler.remove_all_jobs(Some("side")).unwrap(), 1);
    assert!(h.scheduler.get_job("b").is_ok());
    assert_eq!(h.scheduler.remove_all_jobs(None).unwrap(), 1);
    assert_eq!(h.scheduler.get_jobs(&JobFilter::default(), Page::all()).unwrap().0, 0);

    let cleared: Vec<_> = h
        .events()
        .into_iter()
        .filter(|e| e.kind() == EventKind::AllJobsRemoved)
        .collect();
    assert_eq!(
        cleared,
        vec![
            SchedulerEvent::AllJobsRemoved {
                jobstore: Some("side".into())
            },
            SchedulerEvent::AllJobsRemoved { jobstore: None },
        ]
    );
}

#[tokio::test]
async fn get_jobs_filters_and_pages() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    for (id, secs) in [("j1", 10), ("j2", 20), ("j3", 30), ("backup", 40)] {
        h.scheduler
            .add_job(h.spec(every(secs, &h), "count", id).name(format!("job-{id}")))
            .unwrap();
    }
    h.scheduler.pause_job("j1").unwrap();

    let (total, page) = h
        .scheduler
        .get_jobs(&JobFilter::default(), Page::new(1, 2))
        .unwrap();
    assert_eq!(total, 4);
    // runnable jobs first, by next run time
    let ids: Vec<_> = page.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, ["j3", "backup"]);

    let paused = JobFilter {
        paused: Some(true),
        ..JobFilter::default()
    };
    let (total, jobs) = h.scheduler.get_jobs(&paused, Page::all()).unwrap();
    assert_eq!(total, 1);
    assert_eq!(jobs[0].id, "j1");

    let (total, _) = h
        .scheduler
        .get_jobs(&JobFilter::named("job-backup"), Page::all())
        .unwrap();
    assert_eq!(total, 1);

    let elsewhere = JobFilter {
        jobstore: Some("nowhere".into()),
        ..JobFilter::default()
    };
    assert_eq!(
        h.scheduler.get_jobs(&elsewhere, Page::all()).unwrap_err().code(),
        "UNKNOWN_JOBSTORE"
    );
}

#[tokio::test]
async fn listeners_see_only_their_mask_and_can_leave() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    let removed = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&removed);
    h.scheduler.add_listener(
        "removals",
        EventMask::from(EventKind::JobRemoved),
        Arc::new(move |_event: &SchedulerEvent| {
            seen.fetch_add(1, Ordering::SeqCst);
        }),
    );

    h.scheduler.add_job(h.spec(every(5, &h), "count", "x")).unwrap();
    h.scheduler.remove_job("x").unwrap();
    assert_eq!(removed.load(Ordering::SeqCst), 1);

    assert!(h.scheduler.remove_listener("removals"));
    h.scheduler.add_job(h.spec(every(5, &h), "count", "y")).unwrap();
    h.scheduler.remove_job("y").unwrap();
    assert_eq!(removed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn duplicate_aliases_are_rejected_at_runtime() {
    let h = Harness::new(at("2025-01-01T00:00:00Z"));
    let err = h
        .scheduler
        .add_jobstore("default", Arc::new(MemoryJobStore::new()))
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
    let err = h
        .scheduler
        .add_executor("default", h.executor.clone())
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");
}
