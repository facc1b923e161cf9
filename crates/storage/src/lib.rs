//! Durable state for the reflection pipeline: the resolution history
//! (file-backed, with an optional vector index for semantic recall),
//! the resolution document validator, and the processing-state store.

pub mod resolutions;
pub mod state;
pub mod validator;
pub mod vectors;

pub use resolutions::{
    ConnectorResolution, ConversationReference, Operation, Priority, Resolution,
    ResolutionAction, ResolutionStore,
};
pub use state::StateStore;
pub use validator::ResolutionValidator;
pub use vectors::{VectorMatch, VectorStore};
