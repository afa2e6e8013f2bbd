// =============================================================================
// Error taxonomy
// =============================================================================
//
// Mirrors the five failure classes the engine distinguishes: transient
// source failures and oracle failures degrade to cached/default data and
// never abort a cycle; persistence failures and invariant breaches are
// surfaced to the caller. Port trait methods return `Result<T, EngineError>`;
// pure computations (indicators, scoring) cannot fail and return plain
// values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A data-source port call failed (network, timeout, bad status).
    /// Callers fall back to cached data or typed defaults; never propagated
    /// past the call site that produced it.
    #[error("transient source failure: {0}")]
    Transient(String),

    /// The decision oracle timed out or returned non-JSON. Converted to a
    /// `hold` decision with this message as the reasoning.
    #[error("oracle failure: {0}")]
    OracleFailure(String),

    /// The persistence port rejected a read or write. Aborts the trade
    /// path for the tick that produced it (a position must never be
    /// updated without a corresponding trade record).
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// An oracle or input value failed validation (unknown token,
    /// non-positive price). Logged as `skipped`; no state change.
    #[error("validation failure: {0}")]
    Validation(String),

    /// An internal invariant was violated (e.g. negative size after a
    /// close). Logged as `error`; the agent cycle short-circuits but the
    /// agent itself is not stopped.
    #[error("invariant breach: {0}")]
    InvariantBreach(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
