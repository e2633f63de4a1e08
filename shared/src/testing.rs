//! Helpers for driving the app through [`AppTester`]: install test
//! services, sort the effects an update requested, resolve them with canned
//! outputs and apply whatever events come back.

use std::sync::Arc;

use crux_core::capability::Operation;
use crux_core::testing::AppTester;
use crux_core::Request;
use serde_json::{json, Value};

use crate::app::App;
use crate::capabilities::{
    Effect, GeolocationOperation, HttpHeaders, HttpOperation, HttpResponse, KvOperation,
};
use crate::config::{AppConfig, Services};
use crate::event::Event;
use crate::model::Model;

pub const TEST_API_KEY: &str = "test-key";

pub fn test_config() -> AppConfig {
    AppConfig::default().with_api_key(TEST_API_KEY)
}

pub fn test_services() -> Arc<Services> {
    Arc::new(
        test_config()
            .into_services()
            .expect("test config is valid"),
    )
}

/// A fresh model with the test services installed.
pub fn configure(app: &AppTester<App, Effect>) -> Model {
    let mut model = Model::default();
    app.update(Event::Configure(test_services()), &mut model);
    model
}

/// Effects of one step, sorted by kind.
#[derive(Default)]
pub struct Effects {
    pub render: usize,
    pub http: Vec<Request<HttpOperation>>,
    pub kv: Vec<Request<KvOperation>>,
    pub geolocation: Vec<Request<GeolocationOperation>>,
}

impl Effects {
    pub fn split(effects: Vec<Effect>) -> Self {
        let mut split = Self::default();
        for effect in effects {
            match effect {
                Effect::Render(_) => split.render += 1,
                Effect::Http(r) => split.http.push(r),
                Effect::KeyValue(r) => split.kv.push(r),
                Effect::Geolocation(r) => split.geolocation.push(r),
            }
        }
        split
    }
}

/// Runs `event` and sorts the effects it requested.
pub fn send(app: &AppTester<App, Effect>, event: Event, model: &mut Model) -> Effects {
    Effects::split(app.update(event, model).effects)
}

/// Completes `request` with `output`, then applies the events the
/// capability produced.
pub fn resolve<Op: Operation>(
    app: &AppTester<App, Effect>,
    request: &mut Request<Op>,
    output: Op::Output,
    model: &mut Model,
) -> Effects {
    let update = app.resolve(request, output).expect("request resolves");
    let mut effects = update.effects;
    for event in update.events {
        effects.extend(app.update(event, model).effects);
    }
    Effects::split(effects)
}

pub fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse::new(
        status,
        HttpHeaders::new(),
        serde_json::to_vec(body).unwrap_or_default(),
        "test-request".to_string(),
    )
}

/// A `generateContent` reply carrying `text`.
pub fn gemini_text(text: &str) -> HttpResponse {
    json_response(
        200,
        &json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}),
    )
}

/// A search-grounded `generateContent` reply.
pub fn gemini_grounded(text: &str, sources: &[(&str, &str)]) -> HttpResponse {
    let chunks: Vec<Value> = sources
        .iter()
        .map(|(title, uri)| json!({"web": {"title": title, "uri": uri}}))
        .collect();
    json_response(
        200,
        &json!({"candidates": [{
            "content": {"parts": [{"text": text}]},
            "groundingMetadata": {"groundingChunks": chunks}
        }]}),
    )
}

pub fn gemini_quiz(questions: &Value) -> HttpResponse {
    gemini_text(&questions.to_string())
}

pub fn nominatim_reverse(name: &str, place_type: &str, display_name: &str) -> HttpResponse {
    json_response(
        200,
        &json!({"name": name, "type": place_type, "display_name": display_name}),
    )
}

pub fn nominatim_search(lat: f64, lon: f64, display_name: &str, place_type: &str) -> HttpResponse {
    json_response(
        200,
        &json!([{
            "lat": lat.to_string(),
            "lon": lon.to_string(),
            "display_name": display_name,
            "type": place_type
        }]),
    )
}

/// A five question quiz about `subject`.
pub fn sample_quiz(subject: &str) -> Value {
    let questions: Vec<Value> = (1..=5)
        .map(|n| {
            json!({
                "question": format!("{subject} fact #{n} is true?"),
                "options": ["True", "False"],
                "answer": "True",
                "explanation": format!("It is fact #{n} about {subject}."),
                "type": "true-false"
            })
        })
        .collect();
    Value::Array(questions)
}
