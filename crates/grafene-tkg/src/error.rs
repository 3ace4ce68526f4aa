use thiserror::Error;

/// Errors that can occur in grafene-tkg.
#[derive(Error, Debug)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// Snapshot or batching error.
    #[error("graph error: {0}")]
    Graph(#[from] grafene_temporal::Error),
    /// Layer construction or forward error.
    #[error("layer error: {0}")]
    Nn(#[from] grafene_nn::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration rejected by `validate`.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Checkpoint has no hyperparameter record.
    #[error("checkpoint is missing its hyperparameter record")]
    MissingHyperparameters,
    /// Checkpoint state is absent or does not fit the model.
    #[error("invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
    /// A component returned a tensor of the wrong shape.
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A window row has no present snapshot.
    #[error("timestep {step} has no active sequence")]
    EmptyTimestep { step: usize },
    /// A sequence's triplets contain no positive fact.
    #[error("sequence {sequence} has no positive fact")]
    NoPositiveFacts { sequence: usize },
    /// Snapshot references ids outside the model's tables.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    /// Batch had no usable query time.
    #[error("batch has no query time with history")]
    EmptyBatch,
}

/// Result type alias for grafene-tkg.
pub type Result<T> = std::result::Result<T, Error>;
