use std::sync::Arc;
use std::time::{Duration, Instant};

use que_worker::migrate::install_queue;
use que_worker::{insert_job, JobSpec, LockerState, WorkerContext};
use serde_json::json;
use tokio::sync::{Mutex, OnceCell};

use crate::helpers::{wait_until, with_test_db, StaticLog};

mod helpers;

#[tokio::test]
async fn jobs_flow_from_every_configured_queue() {
    static RAN: StaticLog = StaticLog::new();

    with_test_db(|test_db| async move {
        install_queue(&test_db.test_pool, "que_jobs_reports")
            .await
            .expect("Failed to install queue table");

        test_db
            .enqueue("record", json!({ "tag": "default" }), JobSpec::default())
            .await;
        insert_job(
            &test_db.test_pool,
            "que_jobs_reports",
            "record",
            json!({ "tag": "reports" }),
            JobSpec::default(),
        )
        .await
        .expect("Failed to insert job");

        let locker = Arc::new(
            test_db
                .locker_options()
                .worker_count(2)
                .add_queue("que_jobs", Some(Duration::from_millis(50)))
                .add_queue("que_jobs_reports", Some(Duration::from_millis(25)))
                .define_job(
                    "record",
                    |_ctx: WorkerContext, args: serde_json::Value| async move {
                        RAN.push(args["tag"].as_str().unwrap_or("?").to_string())
                            .await;
                        Ok::<(), String>(())
                    },
                )
                .init()
                .await
                .expect("Failed to build locker"),
        );

        let locker_handle = tokio::spawn({
            let locker = locker.clone();
            async move { locker.run().await.expect("Locker run failed") }
        });

        wait_until("jobs from both queues to run", || async {
            RAN.len().await >= 2
        })
        .await;

        locker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), locker_handle)
            .await
            .expect("Locker did not shut down")
            .expect("Locker task panicked");

        let mut ran = RAN.snapshot().await;
        ran.sort();
        assert_eq!(ran, vec!["default", "reports"]);

        assert!(test_db.get_jobs().await.is_empty());
        assert!(test_db.get_jobs_in("que_jobs_reports").await.is_empty());
        assert_eq!(test_db.advisory_lock_count().await, 0);
    })
    .await;
}

#[tokio::test]
async fn each_queue_is_polled_at_its_own_interval() {
    static RUNS: OnceCell<Mutex<Vec<(String, Instant)>>> = OnceCell::const_new();

    async fn runs() -> &'static Mutex<Vec<(String, Instant)>> {
        RUNS.get_or_init(|| async { Mutex::new(Vec::new()) }).await
    }

    with_test_db(|test_db| async move {
        install_queue(&test_db.test_pool, "que_jobs_fast")
            .await
            .expect("Failed to install queue table");

        // The slow queue is polled every 2s, the fast one every 250ms.
        let locker = Arc::new(
            test_db
                .locker_options()
                .worker_count(1)
                .worker_priorities(vec![None])
                .add_queue("que_jobs", Some(Duration::from_secs(2)))
                .add_queue("que_jobs_fast", Some(Duration::from_millis(250)))
                .define_job(
                    "stamp",
                    |_ctx: WorkerContext, args: serde_json::Value| async move {
                        runs().await.lock().await.push((
                            args["tag"].as_str().unwrap_or("?").to_string(),
                            Instant::now(),
                        ));
                        Ok::<(), String>(())
                    },
                )
                .init()
                .await
                .expect("Failed to build locker"),
        );

        let locker_handle = tokio::spawn({
            let locker = locker.clone();
            async move { locker.run().await.expect("Locker run failed") }
        });

        // Let the startup polls of both (empty) queues pass, so each
        // queue's cadence clock is ticking before any job exists.
        let locker_2 = locker.clone();
        wait_until("the locker to start running", || {
            let locker = locker_2.clone();
            async move { locker.state().await == LockerState::Running }
        })
        .await;
        tokio::time::sleep(Duration::from_millis(300)).await;

        let inserted_at = Instant::now();
        test_db
            .enqueue("stamp", json!({ "tag": "slow" }), JobSpec::default())
            .await;
        insert_job(
            &test_db.test_pool,
            "que_jobs_fast",
            "stamp",
            json!({ "tag": "fast" }),
            JobSpec::default(),
        )
        .await
        .expect("Failed to insert job");

        wait_until("jobs from both queues to run", || async {
            runs().await.lock().await.len() >= 2
        })
        .await;

        locker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), locker_handle)
            .await
            .expect("Locker did not shut down")
            .expect("Locker task panicked");

        let mut fast_elapsed = None;
        let mut slow_elapsed = None;
        for (tag, at) in runs().await.lock().await.iter() {
            let elapsed = at.duration_since(inserted_at);
            match tag.as_str() {
                "fast" => fast_elapsed = Some(elapsed),
                "slow" => slow_elapsed = Some(elapsed),
                other => panic!("Unexpected tag {other}"),
            }
        }
        let fast_elapsed = fast_elapsed.expect("fast job never ran");
        let slow_elapsed = slow_elapsed.expect("slow job never ran");

        // The fast queue's next poll is at most 250ms away, so its job is
        // picked up well within a second; the slow queue stays quiet until
        // its 2s cadence comes around again. If both queues shared one
        // cadence the two latencies would be indistinguishable.
        assert!(
            fast_elapsed < Duration::from_millis(1000),
            "fast queue took {fast_elapsed:?}, expected under 1s"
        );
        assert!(
            slow_elapsed >= Duration::from_millis(1200),
            "slow queue took only {slow_elapsed:?}, expected its poll to \
             wait out the 2s interval"
        );
        assert!(
            slow_elapsed > fast_elapsed,
            "slow queue ({slow_elapsed:?}) should not beat the fast queue \
             ({fast_elapsed:?})"
        );
    })
    .await;
}

#[tokio::test]
async fn scheduled_jobs_wait_for_their_run_at() {
    static RAN: StaticLog = StaticLog::new();

    with_test_db(|test_db| async move {
        test_db
            .enqueue(
                "record",
                json!({ "tag": "later" }),
                JobSpec {
                    run_at: Some(chrono::Utc::now() + chrono::Duration::hours(1)),
                    ..Default::default()
                },
            )
            .await;
        test_db
            .enqueue("record", json!({ "tag": "now" }), JobSpec::default())
            .await;

        let locker = Arc::new(
            test_db
                .locker_options()
                .worker_count(1)
                .worker_priorities(vec![None])
                .define_job(
                    "record",
                    |_ctx: WorkerContext, args: serde_json::Value| async move {
                        RAN.push(args["tag"].as_str().unwrap_or("?").to_string())
                            .await;
                        Ok::<(), String>(())
                    },
                )
                .init()
                .await
                .expect("Failed to build locker"),
        );

        let locker_handle = tokio::spawn({
            let locker = locker.clone();
            async move { locker.run().await.expect("Locker run failed") }
        });

        wait_until("the due job to run", || async { RAN.len().await >= 1 }).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        locker.request_shutdown();
        tokio::time::timeout(Duration::from_secs(5), locker_handle)
            .await
            .expect("Locker did not shut down")
            .expect("Locker task panicked");

        assert_eq!(RAN.snapshot().await, vec!["now"]);

        let jobs = test_db.get_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].args()["tag"], "later");
        assert_eq!(test_db.advisory_lock_count().await, 0);
    })
    .await;
}
