//! Event loop and shutdown tests (S001-S009).
//!
//! Drives the manager through `run` with a channel detector: merged event
//! handling, fail-fast between detector and loop, bounded close.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;
use crate::detector::{ChannelDetector, ProcessDetector};
use crate::error::{InstrumentationError, Result};
use crate::tests::harness::TestHarness;
use crate::tests::mocks::{Hook, MockFactory, MockInstrumentation};
use crate::types::{Pid, ProcessEvent, ProgrammingLanguage, SdkConfig};
use crate::update::ConfigUpdate;

/// Detector that fails immediately.
struct BrokenDetector;

#[async_trait]
impl ProcessDetector for BrokenDetector {
    async fn run(
        &mut self,
        _events: mpsc::Sender<ProcessEvent>,
        _cancel: CancellationToken,
    ) -> Result<()> {
        Err(InstrumentationError::Detector("ring buffer unavailable".into()))
    }
}

/// S001: shutdown closes every tracked pid exactly once and empties the tables
#[tokio::test]
async fn s001_shutdown_closes_each_once() {
    let mut h = TestHarness::new();
    for pid in [1, 2, 3] {
        h.manager.handle_exec(&TestHarness::go_exec(pid, "api")).await.unwrap();
    }

    h.manager.shutdown().await;

    for pid in [1, 2, 3] {
        assert_eq!(h.factory.instance(Pid::new(pid)).unwrap().close_count(), 1);
    }
    assert!(h.manager.tracked_pids().is_empty());
    assert_eq!(h.manager.config_group_count(), 0);
    assert_eq!(h.manager.metrics().instrumented(), 0);
}

/// S002: shutdown deletes the status of every tracked pid and every failed attempt
#[tokio::test]
async fn s002_shutdown_deletes_all_status() {
    let failed = Pid::new(3);
    let factory =
        MockFactory::new().with_instrumentation(failed, MockInstrumentation::new().fail_load());
    let mut h = TestHarness::with_factory(factory);
    for pid in [1, 2, 3] {
        let _ = h.manager.handle_exec(&TestHarness::go_exec(pid, "api")).await;
    }
    assert_eq!(h.manager.pending_cleanup(), vec![failed]);

    h.manager.shutdown().await;

    for pid in [1, 2, 3] {
        let exits = h
            .reporter
            .reports_for(Pid::new(pid))
            .into_iter()
            .filter(|r| r.hook == Hook::Exit)
            .count();
        assert_eq!(exits, 1, "pid {pid}");
    }
    assert_eq!(h.reporter.count(Hook::Run), 0);
    assert!(h.manager.pending_cleanup().is_empty());
}

/// S003: a slow close is bounded by the close timeout
#[tokio::test]
async fn s003_close_bounded_by_timeout() {
    let pid = Pid::new(4);
    let factory =
        MockFactory::new().with_instrumentation(pid, MockInstrumentation::new().slow_close(5_000));
    let mut h = TestHarness::with_factory(factory);
    h.manager.handle_exec(&TestHarness::go_exec(4, "api")).await.unwrap();

    let started = tokio::time::Instant::now();
    h.manager.handle_exit(pid).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!h.manager.is_tracked(pid));
    assert_eq!(h.manager.metrics().close_failures(), 1);
    assert_eq!(h.reporter.count(Hook::Exit), 1);
}

/// S004: a failing close is logged and the pid is still untracked
#[tokio::test]
async fn s004_close_failure_still_untracks() {
    let pid = Pid::new(5);
    let factory =
        MockFactory::new().with_instrumentation(pid, MockInstrumentation::new().fail_close());
    let mut h = TestHarness::with_factory(factory);
    h.manager.handle_exec(&TestHarness::go_exec(5, "api")).await.unwrap();

    h.manager.handle_exit(pid).await;
    assert!(!h.manager.is_tracked(pid));
    assert_eq!(h.manager.metrics().close_failures(), 1);
}

/// S005: run processes events from the detector and shuts down on cancel
#[tokio::test]
async fn s005_run_loop_processes_events_until_cancelled() {
    let mut h = TestHarness::new();
    let (feed, detector) = ChannelDetector::channel(16);
    let cancel = CancellationToken::new();

    feed.send(TestHarness::go_exec(42, "api")).await.unwrap();
    feed.send(TestHarness::go_exec(43, "api")).await.unwrap();
    feed.send(ProcessEvent::exit(Pid::new(43))).await.unwrap();

    let factory = h.factory.clone();
    let reporter = h.reporter.clone();
    let stopper = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while reporter.count(Hook::Exit) < 1 && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        })
    };

    h.manager.run(detector, cancel).await.unwrap();
    stopper.await.unwrap();

    assert_eq!(factory.instance(Pid::new(42)).unwrap().close_count(), 1);
    assert_eq!(factory.instance(Pid::new(43)).unwrap().close_count(), 1);
    assert!(h.manager.tracked_pids().is_empty());
    assert_eq!(h.manager.metrics().exec_events(), 2);
    drop(feed);
}

/// S006: the loop stops and cleans up when the detector's feed ends
#[tokio::test]
async fn s006_feed_end_stops_loop() {
    let mut h = TestHarness::new();
    let (feed, detector) = ChannelDetector::channel(4);
    feed.send(TestHarness::go_exec(7, "api")).await.unwrap();
    drop(feed);

    tokio::time::timeout(Duration::from_secs(5), h.manager.run(detector, CancellationToken::new()))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(h.factory.instance(Pid::new(7)).unwrap().close_count(), 1);
    assert!(h.manager.tracked_pids().is_empty());
}

/// S007: a detector failure stops the loop and is returned
#[tokio::test]
async fn s007_detector_failure_is_fail_fast() {
    let mut h = TestHarness::new();
    let err = tokio::time::timeout(
        Duration::from_secs(5),
        h.manager.run(BrokenDetector, CancellationToken::new()),
    )
    .await
    .unwrap()
    .unwrap_err();
    assert!(matches!(err, InstrumentationError::Detector(_)));
}

/// S008: config updates sent through the channel are applied by the loop
#[tokio::test]
async fn s008_config_updates_through_channel() {
    let mut h = TestHarness::with_config(
        AgentConfig::new("node").with_close_timeout(Duration::from_millis(200)),
    );
    let (feed, detector) = ChannelDetector::channel(4);
    let cancel = CancellationToken::new();
    feed.send(TestHarness::go_exec(1, "api")).await.unwrap();

    let updates = h.updates.clone();
    let factory = h.factory.clone();
    let driver = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
            while factory.instance(Pid::new(1)).is_none() && tokio::time::Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            let update = ConfigUpdate::new(TestHarness::deployment("api"))
                .with_config(SdkConfig::for_language(ProgrammingLanguage::Go).with_option("k", "v"));
            updates.send(update).await.unwrap();
            while factory
                .instance(Pid::new(1))
                .is_some_and(|m| m.apply_count() == 0)
                && tokio::time::Instant::now() < deadline
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            cancel.cancel();
        })
    };

    h.manager.run(detector, cancel).await.unwrap();
    driver.await.unwrap();

    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 1);
    assert_eq!(h.manager.metrics().config_updates_applied(), 1);
    drop(feed);
}

/// S009: the loop cannot be started twice
#[tokio::test]
async fn s009_second_run_is_config_error() {
    let mut h = TestHarness::new();
    let (feed, detector) = ChannelDetector::channel(1);
    drop(feed);
    h.manager.run(detector, CancellationToken::new()).await.unwrap();

    let (_feed, detector) = ChannelDetector::channel(1);
    let err = h.manager.run(detector, CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, InstrumentationError::Config(_)));
}
