//! # Cartography Core
//!
//! Data model, hierarchy rules, pathfinding, and the model-backend trait
//! shared by every other crate in the workspace.

pub mod debug;
pub mod errors;
pub mod hierarchy;
pub mod pathfind;
pub mod traits;
pub mod types;

pub use errors::{CartographyError, CartographyResult};
pub use traits::{GenerationRequest, GenerationResponse, ModelBackend, ModelCapabilities};
pub use types::{MapEdge, MapNode, MapUpdate};

/// Prelude module for convenient imports across the workspace.
pub mod prelude {
    pub use crate::debug::*;
    pub use crate::errors::*;
    pub use crate::hierarchy;
    pub use crate::pathfind;
    pub use crate::traits::*;
    pub use crate::types::*;
    pub use async_trait::async_trait;
}
