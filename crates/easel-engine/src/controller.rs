use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use easel_contracts::capabilities::CapabilitySpec;
use easel_contracts::chat::ConversationHistory;
use easel_contracts::events::EventWriter;
use easel_contracts::failure::{FailureDetail, ValidationError};
use easel_contracts::input::{validate_input, RequestInput};
use easel_contracts::policy::{ContentPolicy, DenylistPolicy};
use easel_contracts::state::RequestState;
use serde_json::{json, Value};

use crate::artifact::ResultArtifact;
use crate::classify::classify_response;
use crate::config::EngineConfig;
use crate::payload::build_request;
use crate::transport::{HttpTransport, InferenceTransport, OutboundRequest};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// Another dispatch holds the controller; nothing was sent.
    #[error("a request is already in flight")]
    Busy,
    /// Input was rejected locally; state is unchanged.
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    /// Missing credential, transport or upstream failure; state is `Failed`.
    #[error("{0}")]
    Failed(FailureDetail),
}

impl DispatchError {
    pub fn failure(&self) -> Option<&FailureDetail> {
        match self {
            DispatchError::Failed(detail) => Some(detail),
            DispatchError::Busy | DispatchError::Invalid(_) => None,
        }
    }
}

/// What a caller needs to render the controller at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSnapshot {
    pub state: RequestState,
    pub artifact: Option<ResultArtifact>,
    pub error: Option<FailureDetail>,
    pub history: ConversationHistory,
    pub can_dispatch: bool,
}

#[derive(Debug, Default)]
struct ControllerInner {
    state: RequestState,
    artifact: Option<ResultArtifact>,
    error: Option<FailureDetail>,
    history: ConversationHistory,
    attempts: u64,
}

/// Request accepted by `begin`, waiting for its network call.
struct PreparedRequest {
    attempt: u64,
    request: OutboundRequest,
}

/// Holds the single-flight flag; releases it on drop unless kept.
struct FlightSlot<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> FlightSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, armed: true })
    }

    /// Adopts a flag already set by a kept slot.
    fn adopt(flag: &'a AtomicBool) -> Self {
        Self { flag, armed: true }
    }

    fn keep(mut self) {
        self.armed = false;
    }
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}

/// Validates, sends and classifies one inference call at a time for a
/// single capability.
///
/// The controller owns the request state. Callers read it through
/// [`InferenceController::state`] and [`InferenceController::snapshot`] and
/// drive it with [`InferenceController::dispatch`] or
/// [`InferenceController::dispatch_in_background`]. A second dispatch while
/// one is in flight is rejected with [`DispatchError::Busy`] before anything
/// else happens.
pub struct InferenceController<T: InferenceTransport = HttpTransport> {
    capability: CapabilitySpec,
    config: EngineConfig,
    policy: Box<dyn ContentPolicy>,
    transport: T,
    events: Option<EventWriter>,
    in_flight: AtomicBool,
    inner: Mutex<ControllerInner>,
}

impl InferenceController<HttpTransport> {
    pub fn http(capability: CapabilitySpec, config: EngineConfig) -> anyhow::Result<Self> {
        Ok(Self::new(capability, config, HttpTransport::new()?))
    }
}

impl<T: InferenceTransport> InferenceController<T> {
    /// A controller built without a credential starts out `Failed` with the
    /// missing-credential detail as its current error.
    pub fn new(capability: CapabilitySpec, config: EngineConfig, transport: T) -> Self {
        let mut inner = ControllerInner::default();
        if !config.has_credential() {
            log::warn!(
                "no API credential configured; '{}' requests are disabled",
                capability.name
            );
            inner.state = RequestState::Failed;
            inner.error = Some(FailureDetail::missing_credential());
        }
        Self {
            capability,
            config,
            policy: Box::new(DenylistPolicy::default()),
            transport,
            events: None,
            in_flight: AtomicBool::new(false),
            inner: Mutex::new(inner),
        }
    }

    pub fn with_policy<P: ContentPolicy + 'static>(mut self, policy: P) -> Self {
        self.policy = Box::new(policy);
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn capability(&self) -> &CapabilitySpec {
        &self.capability
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn state(&self) -> RequestState {
        self.lock().state
    }

    pub fn current_artifact(&self) -> Option<ResultArtifact> {
        self.lock().artifact.clone()
    }

    pub fn current_error(&self) -> Option<FailureDetail> {
        self.lock().error.clone()
    }

    pub fn history(&self) -> ConversationHistory {
        self.lock().history.clone()
    }

    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.lock();
        ControllerSnapshot {
            state: inner.state,
            artifact: inner.artifact.clone(),
            error: inner.error.clone(),
            history: inner.history.clone(),
            can_dispatch: self.dispatch_allowed(inner.state),
        }
    }

    /// True while the credential is missing; no dispatch can succeed.
    pub fn is_blocked(&self) -> bool {
        !self.config.has_credential()
    }

    /// Whether a caller should offer the dispatch action right now.
    pub fn can_dispatch(&self) -> bool {
        self.dispatch_allowed(self.state())
    }

    /// Checks `input` against this capability's rules without touching state.
    pub fn validate(&self, input: &RequestInput) -> Result<(), ValidationError> {
        validate_input(self.capability.kind, input, self.policy.as_ref())
    }

    /// Runs one full attempt on the calling thread.
    pub fn dispatch(&self, input: RequestInput) -> Result<ResultArtifact, DispatchError> {
        let prepared = self.begin(input)?;
        self.complete(prepared)
    }

    /// Performs every local check on the calling thread, then issues the
    /// network call on a worker thread. Rejections and local failures are
    /// returned immediately; the handle yields the attempt's outcome.
    pub fn dispatch_in_background(
        self: &Arc<Self>,
        input: RequestInput,
    ) -> Result<JoinHandle<Result<ResultArtifact, DispatchError>>, DispatchError>
    where
        T: 'static,
    {
        let prepared = self.begin(input)?;
        let controller = Arc::clone(self);
        Ok(thread::spawn(move || controller.complete(prepared)))
    }

    fn begin(&self, input: RequestInput) -> Result<PreparedRequest, DispatchError> {
        let Some(slot) = FlightSlot::acquire(&self.in_flight) else {
            log::debug!("dispatch rejected: '{}' is in flight", self.capability.name);
            self.emit("request_rejected", json!({ "reason": "busy" }));
            return Err(DispatchError::Busy);
        };

        let previous = {
            let mut inner = self.lock();
            std::mem::replace(&mut inner.state, RequestState::Validating)
        };
        if let Err(err) = self.validate(&input) {
            log::debug!("validation failed: {}", err.reason.as_str());
            {
                let mut inner = self.lock();
                inner.state = previous;
                // The missing credential stays the current error while blocked.
                if !self.is_blocked() {
                    inner.error = Some(FailureDetail::validation(&err));
                }
            }
            self.emit(
                "request_rejected",
                json!({ "reason": err.reason.as_str() }),
            );
            return Err(DispatchError::Invalid(err));
        }

        let Some(token) = self.config.credential.token() else {
            let detail = FailureDetail::missing_credential();
            {
                let mut inner = self.lock();
                inner.state = RequestState::Failed;
                inner.error = Some(detail.clone());
            }
            log::warn!("{}", detail.message);
            self.emit("request_failed", json!({ "kind": detail.kind.as_str() }));
            return Err(DispatchError::Failed(detail));
        };

        let prepared = {
            let mut inner = self.lock();
            let mut history = inner.history.clone();
            if let RequestInput::Message(text) = &input {
                history.push_user(text.clone());
            }
            let request =
                match build_request(&self.capability, &self.config, token, &input, &history) {
                    Ok(request) => request,
                    Err(err) => {
                        inner.state = previous;
                        inner.error = Some(FailureDetail::validation(&err));
                        return Err(DispatchError::Invalid(err));
                    }
                };
            inner.history = history;
            inner.state = RequestState::InFlight;
            inner.artifact = None;
            inner.error = None;
            inner.attempts += 1;
            PreparedRequest {
                attempt: inner.attempts,
                request,
            }
        };

        log::info!(
            "dispatching '{}' attempt {} to {}",
            self.capability.name,
            prepared.attempt,
            prepared.request.url
        );
        self.emit(
            "request_started",
            json!({
                "attempt": prepared.attempt,
                "capability": self.capability.name,
                "kind": self.capability.kind.as_str(),
                "model": self.capability.model,
                "body": prepared.request.body.kind(),
            }),
        );
        slot.keep();
        Ok(prepared)
    }

    fn complete(&self, prepared: PreparedRequest) -> Result<ResultArtifact, DispatchError> {
        let _slot = FlightSlot::adopt(&self.in_flight);
        let started = Instant::now();

        let sent = panic::catch_unwind(AssertUnwindSafe(|| {
            self.transport.send(&prepared.request)
        }));
        let outcome = match sent {
            Ok(Ok(response)) => {
                let status = response.status;
                log::debug!("'{}' answered with status {status}", self.capability.name);
                classify_response(self.capability.response_shape(), response)
            }
            Ok(Err(err)) => Err(FailureDetail::transport(err.message)),
            Err(payload) => {
                let reason = panic_reason(payload.as_ref());
                log::error!("'{}' transport panicked: {reason}", self.capability.name);
                Err(FailureDetail::transport(format!("transport panicked: {reason}")))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(artifact) => {
                {
                    let mut inner = self.lock();
                    if let ResultArtifact::Message(text) = &artifact {
                        inner.history.push_assistant(text.clone());
                    }
                    inner.state = RequestState::Succeeded;
                    inner.artifact = Some(artifact.clone());
                    inner.error = None;
                }
                log::info!(
                    "'{}' attempt {} succeeded in {duration_ms}ms",
                    self.capability.name,
                    prepared.attempt
                );
                self.emit(
                    "request_succeeded",
                    json!({
                        "attempt": prepared.attempt,
                        "duration_ms": duration_ms,
                        "artifact": artifact_summary(&artifact),
                    }),
                );
                Ok(artifact)
            }
            Err(detail) => {
                {
                    let mut inner = self.lock();
                    inner.state = RequestState::Failed;
                    inner.error = Some(detail.clone());
                }
                log::warn!(
                    "'{}' attempt {} failed: {}",
                    self.capability.name,
                    prepared.attempt,
                    detail.message
                );
                self.emit(
                    "request_failed",
                    json!({
                        "attempt": prepared.attempt,
                        "duration_ms": duration_ms,
                        "kind": detail.kind.as_str(),
                        "status_code": detail.status_code,
                        "message": detail.message,
                    }),
                );
                Err(DispatchError::Failed(detail))
            }
        }
    }

    fn dispatch_allowed(&self, state: RequestState) -> bool {
        self.config.has_credential()
            && !self.in_flight.load(Ordering::Acquire)
            && state.accepts_dispatch()
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit_value(event_type, payload) {
            log::warn!("failed to record {event_type} event: {err:#}");
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: InferenceTransport> std::fmt::Debug for InferenceController<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceController")
            .field("capability", &self.capability)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn artifact_summary(artifact: &ResultArtifact) -> Value {
    match artifact {
        ResultArtifact::Image(image) => json!({
            "type": "image",
            "id": image.id.to_string(),
            "mime_type": image.mime_type,
            "width": image.width,
            "height": image.height,
            "bytes": image.len(),
            "sha256": image.sha256,
        }),
        ResultArtifact::Message(text) => json!({
            "type": "message",
            "chars": text.chars().count(),
        }),
    }
}
