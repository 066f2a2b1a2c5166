//! Request controller for hosted image-generation, upscaling and chat models.
//!
//! [`InferenceController`] gates one call at a time for a capability, shapes
//! the payload, sends it through an [`InferenceTransport`] and classifies the
//! reply into a [`ResultArtifact`] or a
//! [`FailureDetail`](easel_contracts::failure::FailureDetail).

pub mod artifact;
pub mod classify;
pub mod config;
pub mod controller;
pub mod payload;
pub mod transport;

pub use artifact::{ImageArtifact, ResultArtifact};
pub use config::{ApiToken, Credential, EngineConfig};
pub use controller::{ControllerSnapshot, DispatchError, InferenceController};
pub use transport::{
    HttpTransport, InferenceTransport, OutboundRequest, RequestBody, TransportError,
    TransportResponse,
};
