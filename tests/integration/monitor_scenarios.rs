//! End-to-end check scenarios driven through the public monitor API with
//! scripted collaborators and a manual clock.

use crate::helpers::{Harness, fields, harness, harness_with_store, login_epic};
use reqwatch::MonitorConfig;
use reqwatch::MonitorError;
use reqwatch::config::MonitorConfigPatch;
use reqwatch::monitor::state::ExtractionKind;
use reqwatch::monitor::{
    ChangedField, CheckReport, CheckStatus, CheckTrigger, ItemPhase, ItemStore,
    MonitoredItemState,
};
use reqwatch::persist::MonitorDocument;
use reqwatch::tracker::FetchError;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn cycle(h: &Harness) -> Vec<CheckReport> {
    h.monitor
        .run_cycle(CheckTrigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap()
}

async fn check(h: &Harness, id: &str) -> CheckReport {
    h.monitor
        .check_item(id, CheckTrigger::Scheduled, &CancellationToken::new())
        .await
        .unwrap()
}

fn state(h: &Harness, id: &str) -> MonitoredItemState {
    h.monitor.item_state(id).unwrap().unwrap()
}

fn approx(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|v| (v - expected).abs() < 1e-9)
}

/// Harness with item "42" already extracted on first sight.
async fn extracted_login(config: MonitorConfig) -> Harness {
    let h = harness(config);
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();
    let report = check(&h, "42").await;
    assert_eq!(report.status, CheckStatus::Extracted);
    h
}

// ── Walkthrough ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_sight_extracts_without_counting_against_the_cap() {
    let h = harness(MonitorConfig::default());
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();

    let reports = cycle(&h).await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, CheckStatus::Extracted);
    assert!(approx(reports[0].significance, 1.0));
    let decision = reports[0].decision.as_ref().unwrap();
    assert_eq!(decision.kind, Some(ExtractionKind::FirstSight));

    let state = state(&h, "42");
    assert!(state.stories_extracted);
    assert_eq!(state.change_extraction_count, 0);
    assert_eq!(state.extracted_story_ids, vec!["42-S1".to_string()]);
    assert_eq!(state.phase(), ItemPhase::Stable);
    let sync = state.last_sync_result.unwrap();
    assert!(sync.success);
    assert_eq!(sync.kind, ExtractionKind::FirstSight);
    assert_eq!(h.workflow.call_count("42"), 1);
}

#[tokio::test]
async fn state_only_change_below_threshold_does_not_extract() {
    let h = extracted_login(MonitorConfig {
        change_significance_threshold: 0.4,
        ..Default::default()
    })
    .await;
    h.clock.advance(chrono::Duration::hours(13));

    let mut moved = login_epic();
    moved.state = "In Progress".into();
    h.tracker.set("42", moved);
    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Checked);
    assert!(approx(report.significance, 0.25));
    assert_eq!(
        report.changed_fields.iter().copied().collect::<Vec<_>>(),
        vec![ChangedField::State]
    );
    let state = state(&h, "42");
    assert_eq!(state.phase(), ItemPhase::Stable);
    assert_eq!(
        state.last_decision.unwrap().phase,
        ItemPhase::ChangedBelowThreshold
    );
    assert_eq!(state.last_snapshot.unwrap().state, "In Progress");
    assert_eq!(h.workflow.call_count("42"), 1);
}

#[tokio::test]
async fn significant_change_after_cooldown_extracts_and_counts() {
    let h = extracted_login(MonitorConfig {
        change_significance_threshold: 0.4,
        ..Default::default()
    })
    .await;
    h.clock.advance(chrono::Duration::hours(13));

    h.tracker.set(
        "42",
        fields(
            "User login with SSO",
            "Users sign in through the corporate identity provider; passwords are gone.",
            "Open",
        ),
    );
    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Extracted);
    assert!(report.significance.unwrap() >= 0.65);
    assert!(report.changed_fields.contains(&ChangedField::Title));
    assert!(report.changed_fields.contains(&ChangedField::Description));
    let state = state(&h, "42");
    assert_eq!(state.change_extraction_count, 1);
    assert_eq!(state.significant_changes, 1);
    assert_eq!(
        state.last_sync_result.unwrap().kind,
        ExtractionKind::ChangeTriggered
    );
    assert_eq!(h.workflow.call_count("42"), 2);
}

#[tokio::test]
async fn force_check_bypasses_cooldown_with_manual_override() {
    let h = extracted_login(MonitorConfig {
        change_significance_threshold: 0.4,
        ..Default::default()
    })
    .await;
    h.clock.advance(chrono::Duration::hours(13));
    h.tracker.set(
        "42",
        fields("User login v2", "Rewritten flow with passkeys only.", "Open"),
    );
    assert_eq!(check(&h, "42").await.status, CheckStatus::Extracted);

    h.clock.advance(chrono::Duration::minutes(5));
    h.tracker.set(
        "42",
        fields("User login v3", "Passkeys plus a recovery code fallback.", "Open"),
    );
    let reports = h.monitor.force_check(Some("42")).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, CheckStatus::Extracted);
    let decision = reports[0].decision.as_ref().unwrap();
    assert_eq!(decision.kind, Some(ExtractionKind::ManualOverride));
    assert_eq!(decision.reason, "manual override");

    let state = state(&h, "42");
    assert_eq!(state.change_extraction_count, 1);
    assert_eq!(state.manual_override_extractions, 1);
    assert_eq!(h.workflow.call_count("42"), 3);
}

#[tokio::test]
async fn exhausted_retries_record_errors_and_keep_the_snapshot() {
    let h = harness(MonitorConfig::default());
    h.tracker.set("99", login_epic());
    h.monitor.add_item("99").unwrap();
    check(&h, "99").await;
    let before = state(&h, "99").last_snapshot;

    h.tracker.set("99", fields("Changed", "Changed", "Done"));
    h.tracker
        .fail_times("99", 3, FetchError::Transient("503 service unavailable".into()));
    let report = check(&h, "99").await;

    assert_eq!(report.status, CheckStatus::FetchFailed);
    assert_eq!(report.attempts, 3);
    let state = state(&h, "99");
    assert_eq!(state.consecutive_errors, 3);
    assert!(state.last_error.unwrap().contains("503"));
    assert_eq!(state.last_snapshot, before);
    assert_eq!(h.workflow.call_count("99"), 1);
    assert_eq!(
        h.sleeper.recorded(),
        vec![Duration::from_secs(5), Duration::from_secs(10)]
    );
}

#[tokio::test]
async fn out_of_range_threshold_is_rejected_and_config_kept() {
    let h = harness(MonitorConfig::default());

    let err = h
        .monitor
        .update_config(&MonitorConfigPatch {
            change_significance_threshold: Some(1.5),
            ..Default::default()
        })
        .unwrap_err();

    assert!(matches!(err, MonitorError::ConfigValidation(_)));
    let config = h.monitor.config().unwrap();
    assert!((config.change_significance_threshold - 0.3).abs() < f64::EPSILON);
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn unchanged_content_scores_zero() {
    let h = extracted_login(MonitorConfig::default()).await;
    h.clock.advance(chrono::Duration::hours(1));

    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Checked);
    assert!(approx(report.significance, 0.0));
    assert_eq!(report.decision.unwrap().reason, "no changes detected");
}

#[tokio::test]
async fn change_extractions_stop_at_the_cap() {
    let h = extracted_login(MonitorConfig {
        max_changes_per_item: 2,
        extraction_cooldown_hours: 0.0,
        ..Default::default()
    })
    .await;

    let mut statuses = Vec::new();
    for round in 1..=4 {
        h.clock.advance(chrono::Duration::minutes(1));
        let mut edited = login_epic();
        edited.title = format!("User login rev {round}");
        h.tracker.set("42", edited);
        statuses.push(check(&h, "42").await.status);
        assert!(state(&h, "42").change_extraction_count <= 2);
    }

    assert_eq!(
        statuses,
        vec![
            CheckStatus::Extracted,
            CheckStatus::Extracted,
            CheckStatus::Checked,
            CheckStatus::Checked,
        ]
    );
    let state = state(&h, "42");
    assert_eq!(state.change_extraction_count, 2);
    assert_eq!(state.last_decision.unwrap().phase, ItemPhase::CapExceeded);
}

#[tokio::test]
async fn cooldown_blocks_until_the_window_has_passed() {
    let h = extracted_login(MonitorConfig::default()).await;

    h.clock.advance(chrono::Duration::hours(1));
    let mut edited = login_epic();
    edited.title = "User login (draft 2)".into();
    h.tracker.set("42", edited);
    let blocked = check(&h, "42").await;
    assert_eq!(blocked.status, CheckStatus::Checked);
    assert_eq!(
        state(&h, "42").last_decision.unwrap().phase,
        ItemPhase::CooldownBlocked
    );

    h.clock.advance(chrono::Duration::hours(11) + chrono::Duration::minutes(1));
    let mut edited = login_epic();
    edited.title = "User login (draft 3)".into();
    h.tracker.set("42", edited);
    let allowed = check(&h, "42").await;
    assert_eq!(allowed.status, CheckStatus::Extracted);
    assert_eq!(state(&h, "42").change_extraction_count, 1);
}

#[tokio::test]
async fn failing_item_does_not_affect_others_in_the_cycle() {
    let h = harness(MonitorConfig::default());
    h.tracker
        .fail_always("1", FetchError::Transient("connection reset".into()));
    h.tracker.set("2", login_epic());
    h.monitor.add_item("1").unwrap();
    h.monitor.add_item("2").unwrap();

    let reports = cycle(&h).await;

    assert_eq!(reports[0].id, "1");
    assert_eq!(reports[0].status, CheckStatus::FetchFailed);
    assert_eq!(reports[1].id, "2");
    assert_eq!(reports[1].status, CheckStatus::Extracted);
    assert!(state(&h, "1").last_snapshot.is_none());
    assert!(state(&h, "2").last_snapshot.is_some());
    assert_eq!(state(&h, "2").consecutive_errors, 0);
}

#[tokio::test]
async fn adding_twice_keeps_one_item() {
    let h = harness(MonitorConfig::default());
    assert!(h.monitor.add_item("42").unwrap());
    assert!(!h.monitor.add_item("42").unwrap());

    let status = h.monitor.status().unwrap();
    assert_eq!(status.items.len(), 1);
    assert_eq!(status.statistics.total_items, 1);
}

// ── Failure handling and overrides ───────────────────────────────────────────

#[tokio::test]
async fn failed_extraction_leaves_change_pending_until_cooldown_ends() {
    let h = extracted_login(MonitorConfig::default()).await;
    h.clock.advance(chrono::Duration::hours(13));
    h.workflow.set_failing("llm quota exceeded");

    let mut edited = login_epic();
    edited.title = "User login with MFA".into();
    h.tracker.set("42", edited);
    let failed = check(&h, "42").await;

    assert_eq!(failed.status, CheckStatus::ExtractionFailed);
    assert_eq!(failed.error.as_deref(), Some("llm quota exceeded"));
    let after_failure = state(&h, "42");
    assert!(after_failure.pending_change);
    assert_eq!(after_failure.phase(), ItemPhase::ChangedEligible);
    assert_eq!(after_failure.failed_extractions, 1);
    assert_eq!(after_failure.change_extraction_count, 0);
    assert_eq!(after_failure.last_snapshot.unwrap().title, "User login");
    assert!(!after_failure.last_sync_result.unwrap().success);

    // Retries of the failing workflow are throttled by cooldown.
    h.workflow.set_succeeding();
    h.clock.advance(chrono::Duration::hours(1));
    let throttled = check(&h, "42").await;
    assert_eq!(throttled.status, CheckStatus::Checked);
    assert!(state(&h, "42").pending_change);

    h.clock.advance(chrono::Duration::hours(12));
    let retried = check(&h, "42").await;
    assert_eq!(retried.status, CheckStatus::Extracted);

    let state = state(&h, "42");
    assert!(!state.pending_change);
    assert_eq!(state.change_extraction_count, 1);
    assert_eq!(state.significant_changes, 1);
    assert_eq!(state.last_snapshot.unwrap().title, "User login with MFA");
}

#[tokio::test]
async fn workflow_transport_failure_is_reported() {
    let h = harness(MonitorConfig::default());
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();
    h.workflow.set_unavailable("connection refused");

    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::ExtractionFailed);
    assert!(report.error.unwrap().contains("connection refused"));
    let state = state(&h, "42");
    assert!(!state.stories_extracted);
    assert_eq!(state.phase(), ItemPhase::New);
}

#[tokio::test]
async fn scheduled_checks_defer_when_auto_sync_is_off() {
    let h = harness(MonitorConfig {
        auto_sync: false,
        ..Default::default()
    });
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();

    let deferred = check(&h, "42").await;
    assert_eq!(deferred.status, CheckStatus::Checked);
    assert!(deferred.decision.unwrap().deferred);
    assert_eq!(h.workflow.call_count("42"), 0);
    assert_eq!(state(&h, "42").phase(), ItemPhase::New);

    let forced = h.monitor.force_check(Some("42")).await.unwrap();
    assert_eq!(forced[0].status, CheckStatus::Extracted);
    assert_eq!(h.workflow.call_count("42"), 1);
}

#[tokio::test]
async fn new_items_are_left_alone_when_auto_extract_is_off() {
    let h = harness(MonitorConfig {
        auto_extract_new_epics: false,
        ..Default::default()
    });
    h.tracker.set("42", login_epic());
    h.monitor.add_item("42").unwrap();

    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Checked);
    assert_eq!(h.workflow.call_count("42"), 0);
    assert!(!state(&h, "42").stories_extracted);
}

#[tokio::test]
async fn reextract_runs_regardless_of_changes() {
    let h = extracted_login(MonitorConfig::default()).await;
    h.clock.advance(chrono::Duration::minutes(10));

    let report = h.monitor.force_reextract("42").await.unwrap();

    assert_eq!(report.status, CheckStatus::Extracted);
    assert_eq!(
        report.decision.unwrap().kind,
        Some(ExtractionKind::ManualOverride)
    );
    let state = state(&h, "42");
    assert_eq!(state.manual_override_extractions, 1);
    assert_eq!(state.change_extraction_count, 0);
    assert_eq!(state.extracted_story_ids.len(), 2);

    let changes = h.monitor.item_changes("42").unwrap();
    assert_eq!(changes.change_extraction_count, 0);
    assert_eq!(changes.max_changes_per_item, 5);
}

#[tokio::test]
async fn reset_makes_the_next_check_a_first_sight() {
    let h = extracted_login(MonitorConfig::default()).await;

    assert!(h.monitor.reset_item("42").unwrap());
    assert_eq!(state(&h, "42").phase(), ItemPhase::New);

    let report = check(&h, "42").await;
    assert_eq!(report.status, CheckStatus::Extracted);
    assert_eq!(
        report.decision.unwrap().kind,
        Some(ExtractionKind::FirstSight)
    );
    assert!(!h.monitor.reset_item("missing").unwrap());
}

#[tokio::test]
async fn processed_ids_from_a_document_suppress_duplicate_extraction() {
    let document = MonitorDocument {
        item_ids: vec!["42".into()],
        processed_ids: vec!["42".into()],
        ..Default::default()
    };
    let h = harness_with_store(ItemStore::from_document(document));
    h.tracker.set("42", login_epic());

    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Checked);
    assert_eq!(report.decision.unwrap().reason, "already processed");
    assert_eq!(h.workflow.call_count("42"), 0);
    assert_eq!(state(&h, "42").phase(), ItemPhase::Stable);
}

#[tokio::test]
async fn skip_duplicate_check_extracts_processed_items_again() {
    let document = MonitorDocument {
        config: MonitorConfig {
            skip_duplicate_check: true,
            ..Default::default()
        },
        item_ids: vec!["42".into()],
        processed_ids: vec!["42".into()],
        ..Default::default()
    };
    let h = harness_with_store(ItemStore::from_document(document));
    h.tracker.set("42", login_epic());

    let report = check(&h, "42").await;

    assert_eq!(report.status, CheckStatus::Extracted);
    assert_eq!(h.workflow.call_count("42"), 1);
}

#[tokio::test]
async fn status_aggregates_across_items() {
    let h = harness(MonitorConfig::default());
    h.tracker.set("1", login_epic());
    h.tracker
        .fail_always("2", FetchError::Permanent("item 2 not found".into()));
    h.monitor.add_item("1").unwrap();
    h.monitor.add_item("2").unwrap();
    h.monitor.add_item("3").unwrap();
    h.tracker.set("3", fields("Export", "CSV export of reports.", "Open"));

    cycle(&h).await;

    let status = h.monitor.status().unwrap();
    let stats = status.statistics;
    assert_eq!(stats.total_items, 3);
    assert_eq!(stats.items_with_snapshots, 2);
    assert_eq!(stats.items_with_stories, 2);
    assert_eq!(stats.error_items, 1);
    assert_eq!(stats.total_extracted_stories, 2);
    assert_eq!(state(&h, "2").consecutive_errors, 1);
}
