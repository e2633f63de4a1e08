use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const GEOLOCATION_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub accuracy_m: Option<f64>,
}

impl Position {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            accuracy_m: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeolocationOperation {
    CurrentPosition { timeout_ms: u64, high_accuracy: bool },
}

impl Operation for GeolocationOperation {
    type Output = GeolocationResult;
}

#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum GeolocationError {
    #[error("location permission denied")]
    PermissionDenied,

    #[error("position unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("no position fix within {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("geolocation is not supported on this device")]
    Unsupported,
}

pub type GeolocationResult = Result<Position, GeolocationError>;

#[async_trait::async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self, high_accuracy: bool) -> GeolocationResult;
}

/// A device without any positioning hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedGeolocation;

#[async_trait::async_trait]
impl GeolocationProvider for UnsupportedGeolocation {
    async fn current_position(&self, _high_accuracy: bool) -> GeolocationResult {
        Err(GeolocationError::Unsupported)
    }
}

/// Always reports the same fix.
#[derive(Debug, Clone, Copy)]
pub struct FixedGeolocation(pub Position);

#[async_trait::async_trait]
impl GeolocationProvider for FixedGeolocation {
    async fn current_position(&self, _high_accuracy: bool) -> GeolocationResult {
        Ok(self.0)
    }
}

#[derive(Clone)]
pub struct Geolocation<Ev> {
    context: CapabilityContext<GeolocationOperation, Ev>,
}

impl<Ev> Capability<Ev> for Geolocation<Ev> {
    type Operation = GeolocationOperation;
    type MappedSelf<MappedEv> = Geolocation<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Geolocation::new(self.context.map_event(f))
    }
}

impl<Ev> Geolocation<Ev>
where
    Ev: 'static,
{
    pub fn new(context: CapabilityContext<GeolocationOperation, Ev>) -> Self {
        Self { context }
    }

    /// Asks for a high accuracy fix, giving up after
    /// [`GEOLOCATION_TIMEOUT_MS`].
    pub fn current_position<F>(&self, callback: F)
    where
        F: FnOnce(GeolocationResult) -> Ev + Send + 'static,
    {
        let context = self.context.clone();
        self.context.spawn(async move {
            let result = context
                .request_from_shell(GeolocationOperation::CurrentPosition {
                    timeout_ms: GEOLOCATION_TIMEOUT_MS,
                    high_accuracy: true,
                })
                .await;
            context.update_app(callback(result));
        });
    }
}
