//! Application layer - Services composed from ports.

pub mod authenticator;
pub mod catalog;
pub mod gate;
pub mod limiter;
pub mod pipeline;
pub mod task_registry;

pub use authenticator::RequestAuthenticator;
pub use catalog::ClipCatalog;
pub use gate::AdmissionGate;
pub use limiter::SlidingWindowLimiter;
pub use pipeline::IngestionPipeline;
pub use task_registry::TaskRegistry;
