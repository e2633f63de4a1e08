//! Single-owner event loop around the crux [`Core`].
//!
//! The [`Runtime`] owns the core and executes the effects it asks for. HTTP
//! and geolocation requests run as their own tasks, so the two insight
//! requests are in flight together. Storage requests run one at a time in
//! the order they were asked for, so a later write never lands before an
//! earlier one. Completed requests are resolved back into the core, and
//! views are published on a `watch` channel whenever the core asks for a
//! render.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crux_core::{Core, Request};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::app::App;
use crate::capabilities::{
    Capabilities, Effect, GeolocationError, GeolocationOperation, GeolocationProvider,
    GeolocationResult, HttpOperation, HttpResult, HttpTransport, KeyValueStore, KvOperation,
    KvResult,
};
use crate::config::{AppConfig, ConfigError};
use crate::event::Event;
use crate::fetch::ResilientFetch;
use crate::view::ViewModel;

/// The outside world the core talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub http: Arc<dyn HttpTransport>,
    pub kv: Arc<dyn KeyValueStore>,
    pub geolocation: Arc<dyn GeolocationProvider>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("runtime has shut down")]
    Closed,
}

/// A finished effect, waiting to be handed back to the core.
enum Resolution {
    Http(Request<HttpOperation>, HttpResult),
    KeyValue(Request<KvOperation>, KvResult),
    Geolocation(Request<GeolocationOperation>, GeolocationResult),
}

enum Step {
    Event(Event),
    Resolved(Resolution),
}

pub struct Runtime {
    core: Core<Effect, App>,
    fetch: ResilientFetch,
    kv: Arc<dyn KeyValueStore>,
    geolocation: Arc<dyn GeolocationProvider>,
    tasks: JoinSet<Resolution>,
    // At most one storage request runs at a time; the rest wait here.
    storage: JoinSet<Resolution>,
    storage_queue: VecDeque<Request<KvOperation>>,
    inbox: mpsc::UnboundedReceiver<Event>,
    views: watch::Sender<ViewModel>,
}

/// Cloneable front door to a running [`Runtime`].
#[derive(Clone)]
pub struct RuntimeHandle {
    events: mpsc::UnboundedSender<Event>,
    views: watch::Receiver<ViewModel>,
}

impl RuntimeHandle {
    pub fn send(&self, event: Event) -> Result<(), RuntimeError> {
        self.events.send(event).map_err(|_| RuntimeError::Closed)
    }

    /// The most recently published view.
    pub fn view(&self) -> ViewModel {
        self.views.borrow().clone()
    }

    /// Waits for the next published view.
    pub async fn changed(&mut self) -> Result<ViewModel, RuntimeError> {
        self.views
            .changed()
            .await
            .map_err(|_| RuntimeError::Closed)?;
        Ok(self.views.borrow_and_update().clone())
    }
}

impl Runtime {
    /// Validates `config` and starts a core configured with it.
    pub fn new(
        config: AppConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, RuntimeHandle), ConfigError> {
        let services = Arc::new(config.into_services()?);
        let core = Core::<Effect, App>::new::<Capabilities>();
        let (events, inbox) = mpsc::unbounded_channel();
        let (views, mut view_rx) = watch::channel(core.view());

        let mut runtime = Self {
            core,
            fetch: ResilientFetch::new(collaborators.http),
            kv: collaborators.kv,
            geolocation: collaborators.geolocation,
            tasks: JoinSet::new(),
            storage: JoinSet::new(),
            storage_queue: VecDeque::new(),
            inbox,
            views,
        };
        runtime.process(Event::Configure(services));
        // The configured view is the starting point, not a change.
        let _ = view_rx.borrow_and_update();

        let handle = RuntimeHandle {
            events,
            views: view_rx,
        };
        Ok((runtime, handle))
    }

    pub fn view(&self) -> ViewModel {
        self.core.view()
    }

    /// Number of effects still executing or queued.
    pub fn in_flight(&self) -> usize {
        self.tasks.len() + self.storage.len() + self.storage_queue.len()
    }

    /// Applies one event and starts the effects it produced. Must be called
    /// from inside a Tokio runtime.
    pub fn process(&mut self, event: Event) {
        let effects = self.core.process_event(event);
        self.dispatch(effects);
    }

    fn resolve(&mut self, resolution: Resolution) {
        let effects = match resolution {
            Resolution::Http(mut request, result) => self.core.resolve(&mut request, result),
            Resolution::KeyValue(mut request, result) => self.core.resolve(&mut request, result),
            Resolution::Geolocation(mut request, result) => {
                self.core.resolve(&mut request, result)
            }
        };
        self.dispatch(effects);
    }

    fn dispatch(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            debug!(effect = effect.name(), "dispatching effect");
            match effect {
                Effect::Render(_) => {
                    self.views.send_replace(self.core.view());
                }
                Effect::Http(request) => {
                    let fetch = self.fetch.clone();
                    let HttpOperation::Execute(http_request) = request.operation.clone();
                    self.tasks.spawn(async move {
                        let result = fetch.execute(http_request).await;
                        Resolution::Http(request, result)
                    });
                }
                Effect::KeyValue(request) => self.storage_queue.push_back(request),
                Effect::Geolocation(request) => {
                    let provider = Arc::clone(&self.geolocation);
                    let GeolocationOperation::CurrentPosition {
                        timeout_ms,
                        high_accuracy,
                    } = request.operation;
                    self.tasks.spawn(async move {
                        let position = tokio::time::timeout(
                            Duration::from_millis(timeout_ms),
                            provider.current_position(high_accuracy),
                        )
                        .await
                        .unwrap_or(Err(GeolocationError::Timeout { timeout_ms }));
                        Resolution::Geolocation(request, position)
                    });
                }
            }
        }
        self.start_storage();
    }

    /// Starts the oldest queued storage request unless one is running.
    fn start_storage(&mut self) {
        if !self.storage.is_empty() {
            return;
        }
        let Some(request) = self.storage_queue.pop_front() else {
            return;
        };
        let kv = Arc::clone(&self.kv);
        let operation = request.operation.clone();
        self.storage.spawn(async move {
            let result = kv.execute(operation).await;
            Resolution::KeyValue(request, result)
        });
    }

    fn finish(&mut self, joined: Result<Resolution, JoinError>) {
        match joined {
            Ok(resolution) => self.resolve(resolution),
            Err(e) => {
                error!(error = %e, "effect task failed");
                self.start_storage();
            }
        }
    }

    /// Processes completed effects, and anything they trigger, until
    /// nothing is in flight. Events sent through a handle meanwhile are
    /// applied too.
    pub async fn settle(&mut self) {
        loop {
            while let Ok(event) = self.inbox.try_recv() {
                self.process(event);
            }
            let joined = tokio::select! {
                Some(joined) = self.tasks.join_next() => joined,
                Some(joined) = self.storage.join_next() => joined,
                else => break,
            };
            self.finish(joined);
        }
    }

    /// Serves handle events until every handle is dropped and all effects
    /// have finished.
    pub async fn run(mut self) {
        info!("runtime started");
        let mut inbox_open = true;

        loop {
            let step = tokio::select! {
                received = self.inbox.recv(), if inbox_open => match received {
                    Some(event) => Ok(Step::Event(event)),
                    None => {
                        debug!("all handles dropped");
                        inbox_open = false;
                        continue;
                    }
                },
                Some(joined) = self.tasks.join_next() => joined.map(Step::Resolved),
                Some(joined) = self.storage.join_next() => joined.map(Step::Resolved),
                else => break,
            };
            match step {
                Ok(Step::Event(event)) => self.process(event),
                Ok(Step::Resolved(resolution)) => self.resolve(resolution),
                Err(e) => self.finish(Err(e)),
            }
        }

        info!("runtime stopped");
    }
}
