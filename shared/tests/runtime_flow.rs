mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use shared::capabilities::{HttpError, MemoryKvStore, UnsupportedGeolocation};
use shared::model::{ChatMessage, LocationData, PlaceInfo, QuizQuestion};
use shared::Event;
use tokio::time::Instant;

fn paris_services() -> Arc<RoutedTransport> {
    RoutedTransport::new(|call, request| match call {
        Call::Search if request.url().as_str().contains("q=Paris") => {
            search_hit(48.8566, 2.3522, "Paris, Ile-de-France, France")
        }
        Call::Search => respond(200, &json!([])),
        Call::Reverse => reverse_hit("Eiffel Tower", "Eiffel Tower, Paris"),
        Call::Info => gemini_text("# Paris\nCapital of France."),
        Call::Quiz => quiz_about("Paris"),
        Call::Chat => gemini_text("Try the Louvre."),
    })
}

#[tokio::test(start_paused = true)]
async fn search_replaces_location_info_and_quiz() {
    let kv = Arc::new(MemoryKvStore::new());
    let transport = paris_services();
    let (mut runtime, handle) = start(
        transport.clone(),
        kv.clone(),
        Arc::new(UnsupportedGeolocation),
    );

    runtime.process(Event::SearchSubmitted {
        query: "Paris".into(),
    });
    assert!(handle.view().is_loading);
    runtime.settle().await;

    let view = handle.view();
    let location = view.location.as_ref().unwrap();
    assert_eq!(location.title, "Paris");
    assert!(!view.is_loading);
    assert!(view.error.is_none());
    assert!(view.can_open_quiz);
    assert_eq!(transport.count(Call::Info), 1);
    assert_eq!(transport.count(Call::Quiz), 1);

    let stored = kv.snapshot().await;
    let saved: LocationData = serde_json::from_str(&stored["s_location"]).unwrap();
    assert_eq!(saved.subject_name(), "Paris");
    assert_eq!(saved.lat, location.lat);
    let info: PlaceInfo = serde_json::from_str(&stored["s_info"]).unwrap();
    assert!(info.text.contains("Paris"));
    let quiz: Vec<QuizQuestion> = serde_json::from_str(&stored["s_quiz"]).unwrap();
    assert_eq!(quiz.len(), 5);
    assert!(quiz.iter().all(|q| q.question.starts_with("Paris")));
}

#[tokio::test(start_paused = true)]
async fn insight_failure_keeps_previous_insights() {
    let transport = RoutedTransport::new(|call, request| match call {
        Call::Search if request.url().as_str().contains("q=Rome") => {
            search_hit(41.9028, 12.4964, "Rome, Lazio, Italy")
        }
        Call::Search => search_hit(48.8566, 2.3522, "Paris, France"),
        Call::Info if mentions(request, "Rome") => respond(500, &json!({"error": "overloaded"})),
        Call::Info => gemini_text("Capital of France."),
        Call::Quiz if mentions(request, "Rome") => quiz_about("Rome"),
        Call::Quiz => quiz_about("Paris"),
        _ => respond(404, &json!({})),
    });
    let kv = Arc::new(MemoryKvStore::new());
    let (mut runtime, handle) = start(transport, kv.clone(), Arc::new(UnsupportedGeolocation));

    runtime.process(Event::SearchSubmitted {
        query: "Paris".into(),
    });
    runtime.settle().await;
    let before = kv.snapshot().await;

    runtime.process(Event::SearchSubmitted {
        query: "Rome".into(),
    });
    runtime.settle().await;

    assert_eq!(handle.view().location.unwrap().title, "Rome");
    assert!(handle.view().can_open_quiz);
    let after = kv.snapshot().await;
    assert_ne!(after["s_location"], before["s_location"]);
    assert_eq!(after["s_info"], before["s_info"]);
    assert_eq!(after["s_quiz"], before["s_quiz"]);

    let error = handle.view().error.unwrap();
    assert_eq!(error.message, shared::INSIGHTS_FAILED);
    assert_eq!(error.code, "INSIGHTS_UNAVAILABLE");
    assert!(!handle.view().is_loading);
}

#[tokio::test(start_paused = true)]
async fn chat_placeholder_is_replaced_by_reply() {
    let (mut runtime, _handle) = start(
        paris_services(),
        Arc::new(MemoryKvStore::new()),
        Arc::new(UnsupportedGeolocation),
    );

    runtime.process(Event::SendChatMessage {
        text: "Where should I eat?".into(),
    });
    let chat = chat_messages(&mut runtime);
    assert_eq!(chat.len(), 2);
    assert_eq!(chat[0], ChatMessage::user("Where should I eat?"));
    assert!(chat[1].is_thinking);

    runtime.settle().await;
    let chat = chat_messages(&mut runtime);
    assert_eq!(chat.len(), 2);
    assert_eq!(chat[1], ChatMessage::model("Try the Louvre."));
}

#[tokio::test(start_paused = true)]
async fn same_coordinates_resolve_to_same_location() {
    let kv = Arc::new(MemoryKvStore::new());
    let (mut runtime, _handle) = start(
        paris_services(),
        kv.clone(),
        Arc::new(UnsupportedGeolocation),
    );

    let mut stored = Vec::new();
    let mut resolved = Vec::new();
    for _ in 0..2 {
        runtime.process(Event::PickCoordinates {
            lat: 48.8584,
            lon: 2.2945,
        });
        runtime.settle().await;
        resolved.push(runtime.view().location.unwrap());
        stored.push(kv.snapshot().await["s_location"].clone());
    }

    assert_eq!(resolved[0], resolved[1]);
    assert_eq!(resolved[0].title, "Eiffel Tower");
    assert_eq!(stored[0], stored[1]);
    assert_eq!(kv.len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn malformed_saved_location_detects_exactly_once() {
    let kv = Arc::new(MemoryKvStore::with_entries([
        ("s_location", "{\"lat\": \"north\""),
        ("s_info", "{\"text\": \"old\"}"),
    ]));
    let gps = CountingGeolocation::new(48.8584, 2.2945);
    let (mut runtime, handle) = start(paris_services(), kv, gps.clone());

    runtime.process(Event::AppStarted);
    runtime.settle().await;

    assert_eq!(gps.calls(), 1);
    assert!(handle.view().error.is_none());
    assert_eq!(handle.view().location.unwrap().title, "Eiffel Tower");
}

#[tokio::test(start_paused = true)]
async fn rate_limited_search_recovers_after_backoff() {
    let seen = AtomicUsize::new(0);
    let transport = RoutedTransport::new(move |call, _request| match call {
        Call::Search if seen.fetch_add(1, Ordering::SeqCst) < 2 => {
            respond(429, &json!({"error": "slow down"}))
        }
        Call::Search => search_hit(48.8566, 2.3522, "Paris, France"),
        Call::Info => gemini_text("Capital of France."),
        Call::Quiz => quiz_about("Paris"),
        _ => respond(404, &json!({})),
    });
    let (mut runtime, handle) = start(
        transport.clone(),
        Arc::new(MemoryKvStore::new()),
        Arc::new(UnsupportedGeolocation),
    );

    let started = Instant::now();
    runtime.process(Event::SearchSubmitted {
        query: "Paris".into(),
    });
    runtime.settle().await;
    let elapsed = started.elapsed();

    assert_eq!(transport.count(Call::Search), 3);
    assert!(
        elapsed >= Duration::from_millis(3000) && elapsed < Duration::from_millis(3050),
        "waited {elapsed:?}"
    );
    assert!(handle.view().error.is_none());
    assert_eq!(handle.view().location.unwrap().title, "Paris");
}

#[tokio::test(start_paused = true)]
async fn offline_search_exhausts_retries_and_offers_retry() {
    let transport = RoutedTransport::new(|_call, request| {
        Err(HttpError::Connection {
            host: request.url().host().to_string(),
            message: "network unreachable".into(),
        })
    });
    let (mut runtime, handle) = start(
        transport.clone(),
        Arc::new(MemoryKvStore::new()),
        Arc::new(UnsupportedGeolocation),
    );

    runtime.process(Event::SearchSubmitted {
        query: "Paris".into(),
    });
    runtime.settle().await;

    assert_eq!(transport.count(Call::Search), 3);
    let error = handle.view().error.unwrap();
    assert_eq!(error.message, shared::SEARCH_FAILED);
    assert_eq!(error.code, "NETWORK_ERROR");
    assert!(error.can_retry);

    runtime.process(Event::RetryLastAttempt);
    runtime.settle().await;
    assert_eq!(transport.count(Call::Search), 6);
}
