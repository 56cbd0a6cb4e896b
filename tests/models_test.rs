//! Behavior tests for the core data model: identity records, subscriptions,
//! and leaderboard configuration.

use chrono::{Duration, Utc};
use podium::models::*;

#[test]
fn tenant_ids_are_unique() {
    let a = Tenant::new("Acme".to_string(), "ops@acme.example".to_string());
    let b = Tenant::new("Acme".to_string(), "ops2@acme.example".to_string());
    assert_ne!(a.id, b.id);
}

#[test]
fn api_key_lifecycle_revocation() {
    let mut key = ApiKey::new(
        "project-1".to_string(),
        "backend".to_string(),
        "$2b$12$storagehash".to_string(),
        "deadbeefdeadbeef".to_string(),
    );

    assert!(key.is_usable());
    assert!(key.last_used_at.is_none());

    key.revoked_at = Some(Utc::now());
    assert!(!key.is_usable());
}

#[test]
fn api_key_serialization_never_leaks_hashes() {
    let key = ApiKey::new(
        "project-1".to_string(),
        "backend".to_string(),
        "$2b$12$storagehash".to_string(),
        "deadbeefdeadbeef".to_string(),
    );

    let json = serde_json::to_value(&key).unwrap();
    assert!(json.get("keyHash").is_none());
    assert!(json.get("lookupHash").is_none());
    assert_eq!(json["projectId"], "project-1");
}

#[test]
fn subscription_starts_active_without_pending_cancel() {
    let now = Utc::now();
    let sub = Subscription::new(
        "tenant-1".to_string(),
        PlanType::Enterprise,
        now,
        now + Duration::days(30),
    );

    assert!(sub.is_active());
    assert!(!sub.cancel_at_period_end);
    assert_eq!(sub.plan_type, PlanType::Enterprise);
}

#[test]
fn subscription_status_text_round_trips() {
    for status in [
        SubscriptionStatus::Active,
        SubscriptionStatus::Cancelled,
        SubscriptionStatus::PastDue,
    ] {
        assert_eq!(SubscriptionStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(SubscriptionStatus::parse("paused"), None);
}

#[test]
fn leaderboard_defaults() {
    let lb = Leaderboard::new(
        "project-1".to_string(),
        "weekly-arena".to_string(),
        SortOrder::Desc,
        UpdateMode::Best,
    );

    assert!(lb.is_active);
    assert!(lb.ttl_days.is_none());
    assert!(lb.reset_schedule.is_none());
    assert_eq!(lb.metadata, serde_json::json!({}));
}

#[test]
fn season_window_is_ordered_by_construction_caller() {
    let start = Utc::now();
    let end = start + Duration::days(90);
    let season = Season::new("lb-1".to_string(), "season-3".to_string(), start, end);

    assert!(season.start_date < season.end_date);
    assert!(!season.is_active);
}

#[test]
fn score_event_preserves_submission_shape() {
    let event = ScoreEvent::new(
        "tenant-1".to_string(),
        "project-1".to_string(),
        "lb-1".to_string(),
        "alice".to_string(),
        87.5,
        true,
    );

    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["leaderboardId"], "lb-1");
    assert_eq!(json["score"], 87.5);
    assert_eq!(json["increment"], true);
}
