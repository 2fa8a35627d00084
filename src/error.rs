use std::sync::Arc;

/// Represents a result type for loading toggle state.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a state payload into the engine.
///
/// Evaluation itself never fails: unknown toggles, absent context fields and unparseable operands
/// all resolve to a safe default. Only [`Engine::load_state`](crate::Engine::load_state) reports
/// errors, and a failed load always leaves the previously installed snapshot active.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// The payload is not syntactically valid JSON.
    #[error("state payload is not valid JSON: {0}")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    InvalidJson(Arc<serde_json::Error>),

    /// The payload is JSON but not a features document or toggle array, or a definition is
    /// missing a required field.
    #[error("invalid toggle definitions: {0}")]
    InvalidDefinition(Arc<serde_json::Error>),

    /// Two toggles in the same payload share a name.
    #[error("duplicate toggle name `{0}`")]
    DuplicateToggle(String),

    /// Variant weights of a toggle (or of one of its strategies) exceed the per-mille budget.
    #[error("variant weights of toggle `{toggle}` sum to {total}, exceeding 1000")]
    VariantWeightsExceeded {
        /// Name of the offending toggle.
        toggle: String,
        /// Sum of declared weights.
        total: u64,
    },
}

impl Error {
    /// Stable machine-readable error kind, suitable for a wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidJson(_) => "InvalidJson",
            Error::InvalidDefinition(_) => "InvalidDefinition",
            Error::DuplicateToggle(_) => "DuplicateToggle",
            Error::VariantWeightsExceeded { .. } => "VariantWeightsExceeded",
        }
    }
}
