use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ginko_api::events::extract_document_ids;
use ginko_api::{Event, EventCategory, Impact};

fn sample_event() -> Event {
    let mut event = Event::new(
        "user-1".to_string(),
        Some("org-1".to_string()),
        "project-1".to_string(),
        "graph-1".to_string(),
        Some("main".to_string()),
        EventCategory::Fix,
        "fixed a race condition in TASK-42, references ADR-3".to_string(),
        Impact::Medium,
    );
    event.tags = vec!["agent-a".to_string()];
    event.files = vec!["src/lib.rs".to_string()];
    event
}

fn benchmark_event_serialization(c: &mut Criterion) {
    let event = sample_event();

    c.bench_function("event_serialization", |b| {
        b.iter(|| {
            let serialized = serde_json::to_string(black_box(&event)).unwrap();
            black_box(serialized);
        })
    });
}

fn benchmark_event_deserialization(c: &mut Criterion) {
    let event = sample_event();
    let serialized = serde_json::to_string(&event).unwrap();

    c.bench_function("event_deserialization", |b| {
        b.iter(|| {
            let deserialized: Event = serde_json::from_str(black_box(&serialized)).unwrap();
            black_box(deserialized);
        })
    });
}

fn benchmark_document_id_extraction(c: &mut Criterion) {
    let event = sample_event();

    c.bench_function("extract_document_ids", |b| {
        b.iter(|| {
            let ids = extract_document_ids(black_box(&event.description));
            black_box(ids);
        })
    });
}

criterion_group!(
    benches,
    benchmark_event_serialization,
    benchmark_event_deserialization,
    benchmark_document_id_extraction
);
criterion_main!(benches);
