//! The model dispatcher, JSON envelope parser, correction services,
//! connector-chain refiner, update applier, and map update orchestrator:
//! the layer that sits above `cartography-core` and `cartography-store`.

pub mod applier;
pub mod chain;
pub mod correction;
pub mod dispatcher;
pub mod envelope;
pub mod orchestrator;

pub use dispatcher::{DispatchOutcome, Dispatcher, RateLimiter};
pub use orchestrator::MapUpdateOrchestrator;
