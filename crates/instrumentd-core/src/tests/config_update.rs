//! Config update tests (C001-C007).
//!
//! Delivery of language-scoped SDK configs to the members of a config
//! group, including partial failure.

use crate::error::InstrumentationError;
use crate::tests::harness::TestHarness;
use crate::tests::mocks::{MockFactory, MockInstrumentation};
use crate::types::{Pid, ProgrammingLanguage, SdkConfig};
use crate::update::ConfigUpdate;

fn go_config(key: &str, value: &str) -> SdkConfig {
    SdkConfig::for_language(ProgrammingLanguage::Go).with_option(key, value)
}

async fn harness_with(pids: &[u32], factory: MockFactory, deployment: &str) -> TestHarness {
    let mut h = TestHarness::with_factory(factory);
    for pid in pids {
        h.manager
            .handle_exec(&TestHarness::go_exec(*pid, deployment))
            .await
            .unwrap();
    }
    h
}

/// C001: an update reaches every member of the group exactly once
#[tokio::test]
async fn c001_update_reaches_each_member_once() {
    let mut h = harness_with(&[1, 2, 3], MockFactory::new(), "api").await;
    let update = ConfigUpdate::new(TestHarness::deployment("api"))
        .with_config(go_config("sampling", "0.5"));

    h.manager.handle_config_update(&update).await.unwrap();

    for pid in [1, 2, 3] {
        let mock = h.factory.instance(Pid::new(pid)).unwrap();
        assert_eq!(mock.apply_count(), 1);
        assert_eq!(
            mock.last_config().unwrap().options.get("sampling").map(String::as_str),
            Some("0.5")
        );
    }
    assert_eq!(h.manager.metrics().config_updates_applied(), 3);
}

/// C002: one failing member does not block the others; the error names it
#[tokio::test]
async fn c002_partial_failure_aggregated() {
    let factory = MockFactory::new()
        .with_instrumentation(Pid::new(2), MockInstrumentation::new().fail_apply());
    let mut h = harness_with(&[1, 2, 3], factory, "api").await;
    let update =
        ConfigUpdate::new(TestHarness::deployment("api")).with_config(go_config("k", "v"));

    let err = h.manager.handle_config_update(&update).await.unwrap_err();

    let InstrumentationError::ApplyConfig(failures) = err else {
        panic!("expected aggregated apply failure");
    };
    assert_eq!(failures.pids().collect::<Vec<_>>(), vec![Pid::new(2)]);
    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 1);
    assert_eq!(h.factory.instance(Pid::new(3)).unwrap().apply_count(), 1);
    assert_eq!(h.manager.metrics().config_apply_errors(), 1);
    assert_eq!(h.manager.metrics().config_updates_applied(), 2);
}

/// C003: an update for a group with no tracked pids is a no-op
#[tokio::test]
async fn c003_update_without_members_is_noop() {
    let mut h = harness_with(&[1], MockFactory::new(), "api").await;
    let update =
        ConfigUpdate::new(TestHarness::deployment("other")).with_config(go_config("k", "v"));

    h.manager.handle_config_update(&update).await.unwrap();
    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 0);
}

/// C004: entries for another language do not reach the Go group
#[tokio::test]
async fn c004_other_language_not_delivered() {
    let mut h = harness_with(&[1], MockFactory::new(), "api").await;
    let update = ConfigUpdate::new(TestHarness::deployment("api"))
        .with_config(SdkConfig::for_language(ProgrammingLanguage::Java));

    h.manager.handle_config_update(&update).await.unwrap();
    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 0);
}

/// C005: entries without a language are skipped
#[tokio::test]
async fn c005_config_without_language_skipped() {
    let mut h = harness_with(&[1], MockFactory::new(), "api").await;
    let update = ConfigUpdate::new(TestHarness::deployment("api")).with_config(SdkConfig::default());

    h.manager.handle_config_update(&update).await.unwrap();
    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 0);
}

/// C006: exited pids no longer receive updates
#[tokio::test]
async fn c006_exited_pid_not_updated() {
    let mut h = harness_with(&[1, 2], MockFactory::new(), "api").await;
    h.manager.handle_exit(Pid::new(1)).await;
    let update =
        ConfigUpdate::new(TestHarness::deployment("api")).with_config(go_config("k", "v"));

    h.manager.handle_config_update(&update).await.unwrap();
    assert_eq!(h.factory.instance(Pid::new(1)).unwrap().apply_count(), 0);
    assert_eq!(h.factory.instance(Pid::new(2)).unwrap().apply_count(), 1);
}

/// C007: multiple failures are all surfaced
#[tokio::test]
async fn c007_all_failures_surfaced() {
    let factory = MockFactory::new()
        .with_instrumentation(Pid::new(1), MockInstrumentation::new().fail_apply())
        .with_instrumentation(Pid::new(3), MockInstrumentation::new().fail_apply());
    let mut h = harness_with(&[1, 2, 3], factory, "api").await;
    let update =
        ConfigUpdate::new(TestHarness::deployment("api")).with_config(go_config("k", "v"));

    let err = h.manager.handle_config_update(&update).await.unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("2 instrumentation(s)"));
    assert!(msg.contains("pid 1"));
    assert!(msg.contains("pid 3"));
}
