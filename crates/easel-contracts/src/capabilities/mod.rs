mod registry;

pub use registry::{CapabilityKind, CapabilityRegistry, CapabilitySpec, ResponseShape};
