//! tact-engine: the algorithmic core of TACT.
//!
//! Layered bottom-up:
//!
//! - `bd`: constant-rate birth-death probabilities and the Stadler
//!   log-likelihood, evaluated in log-space with guarded critical limits.
//! - `optim`: the numerical optimizers the rate estimator needs: a
//!   bounded scalar minimizer (golden section + parabolic interpolation),
//!   a derivative-free simplex for the constrained two-parameter fit, and
//!   a simulated-annealing fallback.
//! - `rates`: per-clade Yule and birth-death maximum-likelihood fits with
//!   admission control and analytic short-circuits.
//! - `sampler`: inverse-CDF sampling of missing speciation times from the
//!   conditioned birth-death process.
//! - `placement`: graft mechanics on the backbone (eligible-edge
//!   selection, clade construction, leaf sprays) under monophyly locks.
//! - `driver`: the two-phase pipeline (parallel rate precomputation, then
//!   sequential taxon placement) with deterministic per-taxon RNG
//!   substreams and end-of-run invariant checks.

pub mod bd;
pub mod driver;
pub mod optim;
pub mod placement;
pub mod rates;
pub mod sampler;

use thiserror::Error;

pub use driver::{run, Event, RateRow, RunConfig, RunOutcome, Severity};

/// Errors raised by the engine. `RateFitFailed` is recoverable (callers
/// walk up the taxonomy); `Internal` and `MonophylyBroken` indicate an
/// invariant violation and map to exit code 2.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rate fit failed: {0}")]
    RateFitFailed(String),

    #[error("monophyly broken for {0}; this is a bug")]
    MonophylyBroken(String),

    #[error("run cancelled")]
    Cancelled,

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error(transparent)]
    Phylo(#[from] tact_phylo::PhyloError),
}
