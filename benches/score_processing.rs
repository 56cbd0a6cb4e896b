use criterion::{black_box, criterion_group, criterion_main, Criterion};
use podium::events::ScoreUpdated;
use podium::models::{SortOrder, UpdateMode};
use podium::scoring::apply;

fn benchmark_event_serialization(c: &mut Criterion) {
    let event = ScoreUpdated {
        event_id: "test-event-id".to_string(),
        tenant_id: "test-tenant".to_string(),
        project_id: "test-project".to_string(),
        leaderboard_id: "test-leaderboard".to_string(),
        user_id: "alice".to_string(),
        score: 1250.5,
        increment: false,
        timestamp: chrono::Utc::now(),
    };

    c.bench_function("score_event_serialization", |b| {
        b.iter(|| {
            let serialized = serde_json::to_string(black_box(&event)).unwrap();
            black_box(serialized);
        })
    });
}

fn benchmark_write_decision(c: &mut Criterion) {
    c.bench_function("best_mode_decision", |b| {
        b.iter(|| {
            let decision = apply(
                black_box(UpdateMode::Best),
                black_box(SortOrder::Desc),
                black_box(Some(1000.0)),
                black_box(1250.5),
            );
            black_box(decision);
        })
    });
}

criterion_group!(benches, benchmark_event_serialization, benchmark_write_decision);
criterion_main!(benches);
