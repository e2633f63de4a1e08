//! Side effects as data.
//!
//! `update` never performs I/O. It asks a capability for something, which
//! hands the shell an [`Effect`] holding the operation. Whoever hosts the
//! core (the [`crate::runtime::Runtime`], a test, a mobile shell) executes
//! the operation and resolves the request, and the capability turns the
//! output back into an [`Event`].

mod geolocation;
mod http;
mod kv;

pub use crux_core::render::Render;

use crate::app::App;
use crate::event::Event;

pub use self::geolocation::{
    FixedGeolocation, Geolocation, GeolocationError, GeolocationOperation, GeolocationProvider,
    GeolocationResult, Position, UnsupportedGeolocation, GEOLOCATION_TIMEOUT_MS,
};
pub use self::http::{
    Http, HttpError, HttpHeaders, HttpMethod, HttpOperation, HttpOutput, HttpRequest,
    HttpResponse, HttpResult, HttpTransport, RetryPolicy, ValidatedUrl, MAX_TIMEOUT_MS,
    STATUS_TOO_MANY_REQUESTS,
};
pub use self::kv::{
    decode_stored, KeyValue, KeyValueStore, KvError, KvKey, KvOperation, KvOutput, KvResult,
    MemoryKvStore, StoreKey,
};

#[derive(crux_core::macros::Effect)]
#[effect(app = "App")]
pub struct Capabilities {
    pub http: Http<Event>,
    pub kv: KeyValue<Event>,
    pub render: Render<Event>,
    pub geolocation: Geolocation<Event>,
}

impl Effect {
    pub fn name(&self) -> &'static str {
        match self {
            Effect::Http(_) => "http",
            Effect::KeyValue(_) => "key_value",
            Effect::Render(_) => "render",
            Effect::Geolocation(_) => "geolocation",
        }
    }
}
