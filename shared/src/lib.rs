#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]

pub mod capabilities;
pub mod chat;
pub mod config;
pub mod event;
pub mod fetch;
pub mod gemini;
pub mod geocoding;
pub mod insight;
pub mod model;
pub mod quiz;
pub mod runtime;
pub mod view;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::capabilities::{GeolocationError, HttpError, KvError};
use crate::gemini::AiError;
use crate::geocoding::GeocodeError;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::{AppConfig, Services};
pub use event::Event;
pub use model::Model;
pub use runtime::{Collaborators, Runtime, RuntimeHandle};
pub use view::ViewModel;

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 1000;

pub const LOCATION_LOOKUP_FAILED: &str = "Could not detect your location details. The service might be temporarily unavailable. Please try again or search manually.";
pub const LOCATION_ACCESS_DENIED: &str = "Location access denied or unavailable. Please enable GPS or search for your location manually.";
pub const GEOLOCATION_UNSUPPORTED: &str = "Geolocation is not supported on this device.";
pub const NO_SEARCH_RESULTS: &str =
    "No places found for that search query. Try being more specific.";
pub const SEARCH_FAILED: &str =
    "Search failed due to a connection issue. Please check your internet and try again.";
pub const INSIGHTS_FAILED: &str =
    "Connected to location, but failed to load AI insights. You can still use the assistant.";
pub const NOT_CONFIGURED: &str = "The app has not been set up yet.";
pub const STORAGE_FAILED: &str =
    "Couldn't save this place on your device. It will be looked up again next time.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Network,
    RateLimited,
    HttpStatus,
    NoResults,
    PermissionDenied,
    Unsupported,
    PartialInsight,
    Chat,
    Validation,
    Storage,
    Deserialization,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Network => "NETWORK_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::HttpStatus => "HTTP_STATUS",
            Self::NoResults => "NO_RESULTS",
            Self::PermissionDenied => "LOCATION_PERMISSION_DENIED",
            Self::Unsupported => "GEOLOCATION_UNSUPPORTED",
            Self::PartialInsight => "INSIGHTS_UNAVAILABLE",
            Self::Chat => "CHAT_ERROR",
            Self::Validation => "VALIDATION_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::Deserialization => "DESERIALIZATION_ERROR",
        }
    }

    /// Whether offering the Retry action makes sense for this failure.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::Unsupported | Self::Validation | Self::Chat)
    }

    #[must_use]
    pub fn from_http(error: &HttpError) -> Self {
        match error {
            e if e.is_rate_limited() => Self::RateLimited,
            e if e.is_transport() => Self::Network,
            HttpError::HttpStatus { .. } => Self::HttpStatus,
            HttpError::InvalidResponse { .. } | HttpError::Serialization { .. } => {
                Self::Deserialization
            }
            _ => Self::Validation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub internal_message: Option<String>,
    pub context: HashMap<String, String>,
}

impl AppError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            internal_message: None,
            context: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal_message = Some(internal.into());
        self
    }

    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.kind.code()
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// A reverse lookup that produced no usable place.
    #[must_use]
    pub fn location_lookup_failed(error: &GeocodeError) -> Self {
        let kind = match error {
            GeocodeError::Http(e) => ErrorKind::from_http(e),
            GeocodeError::NoResults => ErrorKind::NoResults,
            GeocodeError::Malformed(_) => ErrorKind::Deserialization,
        };
        Self::new(kind, LOCATION_LOOKUP_FAILED).with_internal(error.to_string())
    }

    #[must_use]
    pub fn search_failed(error: &GeocodeError) -> Self {
        match error {
            GeocodeError::NoResults => Self::new(ErrorKind::NoResults, NO_SEARCH_RESULTS),
            GeocodeError::Http(e) => {
                Self::new(ErrorKind::from_http(e), SEARCH_FAILED).with_internal(e.to_string())
            }
            GeocodeError::Malformed(reason) => {
                Self::new(ErrorKind::Deserialization, SEARCH_FAILED).with_internal(reason.clone())
            }
        }
    }

    #[must_use]
    pub fn insights_failed(error: &AiError) -> Self {
        let mut app_error =
            Self::new(ErrorKind::PartialInsight, INSIGHTS_FAILED).with_internal(error.to_string());
        if let AiError::Http(HttpError::HttpStatus { status, .. }) = error {
            app_error = app_error.with_context("http_status", status.to_string());
        }
        app_error
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code(), self.message)?;
        if let Some(internal) = &self.internal_message {
            write!(f, " (internal: {internal})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<GeolocationError> for AppError {
    fn from(e: GeolocationError) -> Self {
        match e {
            GeolocationError::Unsupported => {
                AppError::new(ErrorKind::Unsupported, GEOLOCATION_UNSUPPORTED)
            }
            other => AppError::new(ErrorKind::PermissionDenied, LOCATION_ACCESS_DENIED)
                .with_internal(other.to_string()),
        }
    }
}

impl From<KvError> for AppError {
    fn from(e: KvError) -> Self {
        AppError::new(ErrorKind::Storage, STORAGE_FAILED).with_internal(e.to_string())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CoordinateError {
    #[error("Latitude {0} is out of valid range [-90, 90]")]
    LatitudeOutOfRange(f64),
    #[error("Longitude {0} is out of valid range [-180, 180]")]
    LongitudeOutOfRange(f64),
    #[error("Coordinate value is not finite (NaN or Infinity)")]
    NonFinite,
}

impl From<CoordinateError> for AppError {
    fn from(e: CoordinateError) -> Self {
        AppError::new(ErrorKind::Validation, e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedCoordinate {
    lat: f64,
    lon: f64,
}

impl ValidatedCoordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, CoordinateError> {
        if !lat.is_finite() || !lon.is_finite() {
            return Err(CoordinateError::NonFinite);
        }
        if !(-90.0..=90.0).contains(&lat) {
            return Err(CoordinateError::LatitudeOutOfRange(lat));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(CoordinateError::LongitudeOutOfRange(lon));
        }
        Ok(Self { lat, lon })
    }

    #[must_use]
    pub const fn lat(self) -> f64 {
        self.lat
    }

    #[must_use]
    pub const fn lon(self) -> f64 {
        self.lon
    }
}

pub mod app {
    use serde::Serialize;
    use tracing::{debug, info, warn};

    use super::{AppError, ErrorKind, ValidatedCoordinate, NOT_CONFIGURED};
    use crate::capabilities::{
        decode_stored, Capabilities, HttpError, HttpResult, KvOutput, KvResult, StoreKey,
    };
    use crate::chat::{self, CHAT_FAILURE_TEXT};
    use crate::config::Services;
    use crate::event::Event;
    use crate::gemini::{self, AiError, ChatTurn};
    use crate::geocoding::{self, GeocodeError};
    use crate::insight::InsightProgress;
    use crate::model::{LocationData, Model, PlaceInfo, QuizQuestion, RetryTarget, Screen};
    use crate::view::ViewModel;

    /// A non-2xx response is a failure even when the host hands it over as
    /// a response.
    fn successful(result: HttpResult) -> HttpResult {
        match result {
            Ok(response) if !response.is_success() => Err(HttpError::from_response(&response)),
            other => other,
        }
    }

    enum InsightPart {
        Info(PlaceInfo),
        Quiz(Vec<QuizQuestion>),
    }

    /// The core is stateless; the geocoder and Gemini clients arrive with
    /// [`Event::Configure`] and live in the [`Model`].
    #[derive(Debug, Default)]
    pub struct App;

    impl App {
        fn detect_location(model: &mut Model, caps: &Capabilities) {
            let generation = model.begin_resolution(RetryTarget::DeviceGps);
            caps.geolocation
                .current_position(move |result| Event::PositionReceived { generation, result });
        }

        fn resolve_from_coordinates(
            services: &Services,
            lat: f64,
            lon: f64,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            if let Err(e) = ValidatedCoordinate::new(lat, lon) {
                warn!(lat, lon, error = %e, "rejecting coordinates");
                model.is_loading = false;
                model.set_error(
                    AppError::from(e)
                        .with_context("lat", lat.to_string())
                        .with_context("lon", lon.to_string()),
                );
                return;
            }

            let generation = model.begin_resolution(RetryTarget::Coordinates { lat, lon });
            match services.geocoder.reverse_request(lat, lon) {
                Ok(request) => caps.http.send(request, move |result| Event::ReverseGeocoded {
                    generation,
                    lat,
                    lon,
                    result: Box::new(result),
                }),
                Err(e) => {
                    model.is_loading = false;
                    model.set_error(AppError::location_lookup_failed(&e.into()));
                }
            }
        }

        fn resolve_from_query(
            services: &Services,
            query: &str,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let query = query.trim();
            if query.is_empty() {
                debug!("ignoring blank search");
                return;
            }

            let generation = model.begin_resolution(RetryTarget::Query {
                text: query.to_string(),
            });
            match services.geocoder.search_request(query) {
                Ok(request) => caps.http.send(request, move |result| Event::SearchResolved {
                    generation,
                    result: Box::new(result),
                }),
                Err(e) => {
                    model.is_loading = false;
                    model.set_error(AppError::search_failed(&e.into()));
                }
            }
        }

        fn dispatch_retry(
            services: &Services,
            target: RetryTarget,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            info!(?target, "retrying last attempt");
            match target {
                RetryTarget::Coordinates { lat, lon } => {
                    Self::resolve_from_coordinates(services, lat, lon, model, caps);
                }
                RetryTarget::Query { text } => {
                    Self::resolve_from_query(services, &text, model, caps);
                }
                RetryTarget::DeviceGps => Self::detect_location(model, caps),
            }
        }

        fn adopt_location(
            services: &Services,
            location: LocationData,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            info!(
                name = location.subject_name(),
                kind = location.subject_kind(),
                "location resolved"
            );
            Self::persist(StoreKey::Location, &location, model, caps);
            Self::fetch_insights(services, &location, model, caps);
            model.location = Some(location);
        }

        fn fetch_insights(
            services: &Services,
            location: &LocationData,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let generation = model.begin_insight();
            model.is_loading = true;

            let ai = &services.ai;
            let (name, kind) = (location.subject_name(), location.subject_kind());
            let requests = ai
                .place_info_request(name, kind)
                .and_then(|info| Ok((info, ai.quiz_request(name, kind)?)));

            match requests {
                Ok((info_request, quiz_request)) => {
                    caps.http.send(info_request, move |result| Event::InfoFetched {
                        generation,
                        result: Box::new(result),
                    });
                    caps.http.send(quiz_request, move |result| Event::QuizFetched {
                        generation,
                        result: Box::new(result),
                    });
                }
                Err(e) => Self::fail_insights(&e, model),
            }
        }

        fn accept_insight_part(
            generation: u64,
            part: Result<InsightPart, AiError>,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            let Some(pending) = model
                .pending_insight
                .as_mut()
                .filter(|p| p.generation() == generation)
            else {
                debug!(generation, "discarding superseded insight response");
                return;
            };

            let progress = match part {
                Ok(InsightPart::Info(info)) => pending.accept_info(info),
                Ok(InsightPart::Quiz(quiz)) => pending.accept_quiz(quiz),
                Err(e) => {
                    Self::fail_insights(&e, model);
                    return;
                }
            };

            if let InsightProgress::Complete { info, quiz } = progress {
                info!(questions = quiz.len(), sources = info.sources.len(), "insights loaded");
                model.pending_insight = None;
                model.is_loading = false;
                Self::persist(StoreKey::PlaceInfo, &info, model, caps);
                Self::persist(StoreKey::Quiz, &quiz, model, caps);
                model.info = info;
                model.quiz = quiz;
                model.quiz_session.reset();
            }
        }

        fn fail_insights(error: &AiError, model: &mut Model) {
            warn!(error = %error, "insight fetch failed");
            model.pending_insight = None;
            model.is_loading = false;
            model.set_error(AppError::insights_failed(error));
        }

        fn persist<T: Serialize>(key: StoreKey, value: &T, model: &mut Model, caps: &Capabilities) {
            let written = caps.kv.set_json(key, value, move |result| Event::Persisted {
                key,
                result: Box::new(result),
            });
            if let Err(e) = written {
                warn!(key = key.as_str(), error = %e, "could not encode value for storage");
                model.set_error(AppError::from(e));
            }
        }

        fn restore_snapshot(result: KvResult, model: &mut Model, caps: &Capabilities) {
            let values = match result {
                Ok(KvOutput::Multi(values)) => values,
                Ok(other) => {
                    warn!(?other, "unexpected storage output while restoring");
                    Vec::new()
                }
                Err(e) => {
                    warn!(error = %e, "could not read saved state");
                    Vec::new()
                }
            };
            let raw = |key: StoreKey| {
                StoreKey::ALL
                    .iter()
                    .position(|k| *k == key)
                    .and_then(|i| values.get(i))
                    .and_then(|v| v.as_deref())
            };

            let location = decode_stored::<LocationData>(StoreKey::Location, raw(StoreKey::Location))
                .filter(LocationData::has_valid_coordinates);
            let Some(location) = location else {
                info!("no saved location, detecting");
                Self::detect_location(model, caps);
                return;
            };

            info!(name = location.subject_name(), "restored saved location");
            model.location = Some(location);

            let (saved_info, saved_quiz) = (raw(StoreKey::PlaceInfo), raw(StoreKey::Quiz));
            let info = decode_stored::<PlaceInfo>(StoreKey::PlaceInfo, saved_info);
            let quiz = decode_stored::<Vec<QuizQuestion>>(StoreKey::Quiz, saved_quiz);
            let unreadable = (saved_info.is_some() && info.is_none())
                || (saved_quiz.is_some() && quiz.is_none());
            if let Some(info) = info {
                model.info = info;
            }
            if let Some(quiz) = quiz {
                model.quiz = crate::quiz::sanitize(quiz);
            }
            if unreadable {
                warn!("saved insights are unreadable, detecting again");
                Self::detect_location(model, caps);
            }
        }

        fn navigate(target: Screen, model: &mut Model) {
            match (model.screen, target) {
                (from, to) if from == to => {}
                (Screen::Home, Screen::Quiz) if !model.can_open_quiz() => {
                    warn!("quiz is not available yet");
                }
                (Screen::Home, Screen::Quiz) => {
                    model.quiz_session.reset();
                    model.screen = Screen::Quiz;
                }
                (Screen::Home, leaf) => model.screen = leaf,
                (_, Screen::Home) => model.screen = Screen::Home,
                (from, to) => warn!(%from, %to, "screens are only reachable from home"),
            }
        }

        fn send_chat(services: &Services, text: &str, model: &mut Model, caps: &Capabilities) {
            let message = text.trim();
            if message.is_empty() {
                debug!("ignoring blank chat message");
                return;
            }

            let turn = model.chat.begin_turn(message);
            let history = model.chat.history_before(turn);
            let context = chat::chat_context(model.location.as_ref());
            let request = services.ai.chat_request(&ChatTurn {
                message,
                context: &context,
                history: &history,
                deep_reasoning: model.deep_reasoning,
            });

            let index = turn.reply_index;
            match request {
                Ok(request) => caps.http.send(request, move |result| Event::ChatReplied {
                    index,
                    result: Box::new(result),
                }),
                Err(e) => {
                    warn!(error = %e, "could not build chat request");
                    model.chat.resolve_turn(index, CHAT_FAILURE_TEXT);
                }
            }
        }

        fn handle(services: &Services, event: Event, model: &mut Model, caps: &Capabilities) {
            match event {
                // Installed by `update` before the services are looked up.
                Event::Configure(_) => {}

                Event::AppStarted => {
                    let keys = StoreKey::ALL.iter().map(StoreKey::key).collect();
                    let read = caps
                        .kv
                        .get_multi(keys, |result| Event::SnapshotLoaded(Box::new(result)));
                    if let Err(e) = read {
                        warn!(error = %e, "could not request saved state");
                        Self::detect_location(model, caps);
                    }
                }

                Event::SnapshotLoaded(result) => Self::restore_snapshot(*result, model, caps),

                Event::DetectLocation => Self::detect_location(model, caps),

                Event::PositionReceived { generation, result } => {
                    if !model.is_current_resolution(generation) {
                        debug!(generation, "discarding superseded position");
                        return;
                    }
                    match result {
                        Ok(position) => Self::resolve_from_coordinates(
                            services,
                            position.lat,
                            position.lon,
                            model,
                            caps,
                        ),
                        Err(e) => {
                            warn!(error = %e, "device position unavailable");
                            model.is_loading = false;
                            model.set_error(AppError::from(e));
                        }
                    }
                }

                Event::PickCoordinates { lat, lon } => {
                    Self::resolve_from_coordinates(services, lat, lon, model, caps);
                }

                Event::SearchSubmitted { query } => {
                    Self::resolve_from_query(services, &query, model, caps);
                }

                Event::ReverseGeocoded {
                    generation,
                    lat,
                    lon,
                    result,
                } => {
                    if !model.is_current_resolution(generation) {
                        debug!(generation, "discarding superseded reverse lookup");
                        return;
                    }
                    let place = successful(*result)
                        .map_err(GeocodeError::from)
                        .and_then(|response| geocoding::parse_reverse(lat, lon, &response));
                    match place {
                        Ok(location) => Self::adopt_location(services, location, model, caps),
                        Err(e) => {
                            warn!(error = %e, "reverse lookup failed");
                            model.is_loading = false;
                            model.set_error(AppError::location_lookup_failed(&e));
                        }
                    }
                }

                Event::SearchResolved { generation, result } => {
                    if !model.is_current_resolution(generation) {
                        debug!(generation, "discarding superseded search");
                        return;
                    }
                    let place = successful(*result)
                        .map_err(GeocodeError::from)
                        .and_then(|response| geocoding::parse_search(&response));
                    match place {
                        Ok(location) => Self::adopt_location(services, location, model, caps),
                        Err(e) => {
                            warn!(error = %e, "search failed");
                            model.is_loading = false;
                            model.set_error(AppError::search_failed(&e));
                        }
                    }
                }

                Event::RetryLastAttempt => match model.last_attempt.take() {
                    Some(target) => {
                        model.clear_error();
                        Self::dispatch_retry(services, target, model, caps);
                    }
                    None => debug!("nothing to retry"),
                },

                Event::DismissError => model.dismiss_error(),

                Event::InfoFetched { generation, result } => {
                    let part = successful(*result)
                        .map_err(AiError::from)
                        .and_then(|response| gemini::parse_place_info(&response))
                        .map(InsightPart::Info);
                    Self::accept_insight_part(generation, part, model, caps);
                }

                Event::QuizFetched { generation, result } => {
                    let part = successful(*result)
                        .map_err(AiError::from)
                        .and_then(|response| gemini::parse_quiz(&response))
                        .map(InsightPart::Quiz);
                    Self::accept_insight_part(generation, part, model, caps);
                }

                Event::Persisted { key, result } => match *result {
                    Ok(_) => debug!(key = key.as_str(), "saved"),
                    Err(e) => {
                        warn!(key = key.as_str(), error = %e, "could not save");
                        model.set_error(AppError::from(e));
                    }
                },

                Event::Navigate(target) => Self::navigate(target, model),

                Event::AnswerSelected { option } => {
                    match model.quiz_session.answer(&model.quiz, option) {
                        Ok(outcome) => debug!(option, correct = outcome.correct, "answer recorded"),
                        Err(e) => debug!(option, error = %e, "answer ignored"),
                    }
                }

                Event::NextQuestion => {
                    if let Err(e) = model.quiz_session.next(&model.quiz) {
                        debug!(error = %e, "cannot advance quiz");
                    }
                }

                Event::RestartQuiz => model.quiz_session.reset(),

                Event::SendChatMessage { text } => Self::send_chat(services, &text, model, caps),

                Event::SetDeepReasoning(enabled) => model.deep_reasoning = enabled,

                Event::ChatReplied { index, result } => {
                    let reply = successful(*result)
                        .map_err(AiError::from)
                        .and_then(|response| gemini::parse_chat_reply(&response))
                        .unwrap_or_else(|e| {
                            warn!(error = %e, "chat request failed");
                            CHAT_FAILURE_TEXT.to_string()
                        });
                    if !model.chat.resolve_turn(index, reply) {
                        warn!(index, "no pending chat message to replace");
                    }
                }
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            if event.is_user_initiated() {
                info!(event = event_name, "user action");
            } else {
                debug!(event = event_name, "event");
            }

            if let Event::Configure(services) = &event {
                info!("services configured");
                model.services = Some(services.clone());
            }

            match model.services.clone() {
                Some(services) => Self::handle(&services, event, model, caps),
                None => {
                    warn!(event = event_name, "event arrived before configuration");
                    model.set_error(AppError::new(ErrorKind::Validation, NOT_CONFIGURED));
                }
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            ViewModel::from_model(model)
        }
    }
}
