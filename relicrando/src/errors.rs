use relicrando_game::ModelError;
use thiserror::Error;

/// A worker detected an internal contradiction while exploring.
/// Fatal for the current seed; carries enough context to reproduce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("search contradiction at location \"{location}\": {message}")]
pub struct SearchError {
    pub location: String,
    pub message: String,
}

/// Malformed proof DAG encountered during minimization or rendering.
/// Always a programming-invariant violation, never expected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed proof: {0}")]
pub struct ProofError(pub String);

#[derive(Debug, Error)]
pub enum RandoError {
    #[error(transparent)]
    Model(#[from] ModelError),
    /// No worker found a valid assignment within the attempt budget.
    /// Recoverable: the caller may retry with a new seed.
    #[error("search exhausted after {attempts} attempts")]
    SearchExhausted { attempts: u64 },
    #[error(transparent)]
    Search(#[from] SearchError),
    #[error(transparent)]
    Proof(#[from] ProofError),
}
