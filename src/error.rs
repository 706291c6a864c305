use thiserror::Error;

/// Fatal error taxonomy for the engine.
///
/// Every component exposes a single fail-fast result contract; the driver
/// surfaces these verbatim. Physical-boundary events (tau stop, temperature
/// stop, blow-out floor) are NOT errors: they transition a cell into a
/// stopped state and are reported through [`crate::core::state::StopReason`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing required field, unrecognised enum value, contradictory flags.
    #[error("configuration error: {0}")]
    Config(String),

    /// Table file missing, malformed, or axes out of order.
    #[error("table error: {0}")]
    Table(String),

    /// Negative density input, non-positive temperature, empty grid.
    #[error("domain error: {0}")]
    Domain(String),

    /// Non-finite state, non-finite mass-budget error, or bisection
    /// failing to converge within the configured number of halvings.
    #[error("numerical error: {0}")]
    Numerical(String),

    /// Artifact I/O failure (series, checkpoint, summary).
    #[error("i/o error: {0}")]
    Io(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
