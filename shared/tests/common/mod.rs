#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use shared::capabilities::{
    GeolocationProvider, GeolocationResult, HttpHeaders, HttpRequest, HttpResponse, HttpResult,
    HttpTransport, KeyValueStore, MemoryKvStore, Position,
};
use shared::model::{ChatMessage, Screen};
use shared::view::ScreenView;
use shared::{AppConfig, Collaborators, Event, Runtime, RuntimeHandle};

/// Which backend call a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Reverse,
    Search,
    Info,
    Quiz,
    Chat,
}

impl Call {
    pub fn classify(request: &HttpRequest) -> Self {
        let url = request.url().as_str();
        if url.contains("/reverse?") {
            return Call::Reverse;
        }
        if url.contains("/search?") {
            return Call::Search;
        }
        let body = body_json(request);
        if body["generationConfig"].get("responseSchema").is_some() {
            Call::Quiz
        } else if body.get("tools").is_some() {
            Call::Info
        } else {
            Call::Chat
        }
    }
}

pub fn body_json(request: &HttpRequest) -> Value {
    request
        .body()
        .and_then(|b| serde_json::from_slice(b).ok())
        .unwrap_or(Value::Null)
}

pub fn body_text(request: &HttpRequest) -> String {
    request
        .body()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_default()
}

type Route = dyn Fn(Call, &HttpRequest) -> HttpResult + Send + Sync;

/// Answers every request through one routing function and records it.
pub struct RoutedTransport {
    route: Box<Route>,
    log: Mutex<Vec<Call>>,
}

impl RoutedTransport {
    pub fn new<F>(route: F) -> Arc<Self>
    where
        F: Fn(Call, &HttpRequest) -> HttpResult + Send + Sync + 'static,
    {
        Arc::new(Self {
            route: Box::new(route),
            log: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self, call: Call) -> usize {
        self.log.lock().unwrap().iter().filter(|c| **c == call).count()
    }
}

#[async_trait::async_trait]
impl HttpTransport for RoutedTransport {
    async fn send(&self, request: &HttpRequest) -> HttpResult {
        let call = Call::classify(request);
        self.log.lock().unwrap().push(call);
        (self.route)(call, request)
    }
}

/// Reports a fixed position and counts how often it was asked.
pub struct CountingGeolocation {
    position: Position,
    calls: AtomicUsize,
}

impl CountingGeolocation {
    pub fn new(lat: f64, lon: f64) -> Arc<Self> {
        Arc::new(Self {
            position: Position::new(lat, lon),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl GeolocationProvider for CountingGeolocation {
    async fn current_position(&self, _high_accuracy: bool) -> GeolocationResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.position)
    }
}

pub fn respond(status: u16, body: &Value) -> HttpResult {
    Ok(HttpResponse::new(
        status,
        HttpHeaders::new(),
        serde_json::to_vec(body).unwrap(),
        "test".into(),
    ))
}

pub fn gemini_text(text: &str) -> HttpResult {
    respond(
        200,
        &json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}),
    )
}

pub fn quiz_about(subject: &str) -> HttpResult {
    let questions: Vec<Value> = (1..=5)
        .map(|n| {
            json!({
                "question": format!("{subject} question {n}?"),
                "options": ["Yes", "No", "Maybe"],
                "answer": "Yes",
                "explanation": format!("Because of {subject}."),
                "type": "multiple-choice"
            })
        })
        .collect();
    gemini_text(&Value::Array(questions).to_string())
}

pub fn search_hit(lat: f64, lon: f64, display_name: &str) -> HttpResult {
    respond(
        200,
        &json!([{
            "lat": lat.to_string(),
            "lon": lon.to_string(),
            "display_name": display_name,
            "type": "city"
        }]),
    )
}

pub fn reverse_hit(name: &str, display_name: &str) -> HttpResult {
    respond(
        200,
        &json!({"name": name, "type": "attraction", "display_name": display_name}),
    )
}

/// Whether the request body mentions `needle`, e.g. the place a prompt is about.
pub fn mentions(request: &HttpRequest, needle: &str) -> bool {
    body_text(request).contains(needle)
}

pub fn start(
    transport: Arc<RoutedTransport>,
    kv: Arc<MemoryKvStore>,
    geolocation: Arc<dyn GeolocationProvider>,
) -> (Runtime, RuntimeHandle) {
    let kv: Arc<dyn KeyValueStore> = kv;
    Runtime::new(
        AppConfig::default().with_api_key("integration-key"),
        Collaborators {
            http: transport,
            kv,
            geolocation,
        },
    )
    .unwrap()
}

/// The chat transcript, read through the chat screen.
pub fn chat_messages(runtime: &mut Runtime) -> Vec<ChatMessage> {
    runtime.process(Event::Navigate(Screen::Chat));
    let messages = match runtime.view().screen {
        ScreenView::Chat { messages, .. } => messages,
        other => panic!("expected the chat screen, got {other:?}"),
    };
    runtime.process(Event::Navigate(Screen::Home));
    messages
}
