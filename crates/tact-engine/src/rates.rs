//! Per-clade maximum-likelihood rate fits.
//!
//! The estimator layers three strategies:
//!
//! 1. analytic Magallon-Sanderson estimates for singletons and cherries,
//! 2. a bounded scalar fit for the Yule (pure-birth) model,
//! 3. a constrained simplex for the full birth-death-sampling model, with
//!    a simulated-annealing rerun whenever the simplex result is
//!    non-finite, boundary-pinned or fails to beat the Yule fit.
//!
//! Every public function returns finite rates or `RateFitFailed`; callers
//! recover by walking one level up the taxonomy.

use rand::rngs::StdRng;

use crate::bd::lik_constant;
use crate::optim::{anneal2, minimize_scalar_bounded, nelder_mead2};
use crate::EngineError;

/// Lower bound on the birth rate (and the birth-death gap).
pub const MIN_RATE: f64 = 1e-9;

/// Upper bound on the birth rate.
pub const MAX_BIRTH: f64 = 100.0;

/// Analytic estimate for a clade represented by a single sampled tip:
/// `ln(1/sampling)` over the stem age.
pub fn fit_singleton(n_total: usize, stem_age: f64) -> Result<(f64, f64), EngineError> {
    if stem_age <= 0.0 {
        return Err(EngineError::RateFitFailed(format!(
            "singleton stem age must be positive, got {stem_age}"
        )));
    }
    Ok(((n_total as f64).ln().max(MIN_RATE) / stem_age, 0.0))
}

/// Analytic Yule estimate for a cherry (two sampled tips): `ln(n)` over
/// the crown age. No optimization is attempted; with a single branching
/// time the likelihood surface has nothing more to say.
pub fn fit_cherry(n_total: usize, crown_age: f64) -> Result<(f64, f64), EngineError> {
    if crown_age <= 0.0 {
        return Err(EngineError::RateFitFailed(format!(
            "cherry crown age must be positive, got {crown_age}"
        )));
    }
    Ok(((n_total as f64).ln().max(MIN_RATE) / crown_age, 0.0))
}

/// Maximum-likelihood Yule fit: maximize the sampling-conditioned
/// likelihood with `death = 0` over `birth ∈ [MIN_RATE, MAX_BIRTH]`.
pub fn fit_yule(ages: &[f64], sampling: f64) -> Result<(f64, f64), EngineError> {
    if ages.is_empty() {
        return Err(EngineError::RateFitFailed(
            "no branching times to fit".to_owned(),
        ));
    }
    let fit = minimize_scalar_bounded(
        |b| lik_constant(b, 0.0, sampling, ages),
        (MIN_RATE, MAX_BIRTH),
        1e-5,
        500,
    );
    if fit.fun.is_finite() && fit.x.is_finite() {
        Ok((fit.x, 0.0))
    } else {
        Err(EngineError::RateFitFailed(format!(
            "Yule optimization did not produce a finite fit (sampling = {sampling})"
        )))
    }
}

/// Maximum-likelihood birth-death fit with sampling, subject to
/// `birth > death ≥ 0` and `birth ∈ (0, MAX_BIRTH]`.
///
/// Starts the simplex from the Yule fit with `death` perturbed to half
/// the birth rate. When the simplex stalls (non-finite value, boundary
/// pin, or no improvement over the Yule fit) the same feasible set is
/// reannealed and the better of the two results wins; species-rich and
/// species-poor clades frequently give flat likelihoods where the local
/// search alone sits down in the wrong place.
pub fn fit_birth_death(
    ages: &[f64],
    sampling: f64,
    rng: &mut StdRng,
) -> Result<(f64, f64), EngineError> {
    let (yule_birth, _) = fit_yule(ages, sampling)?;
    let f_yule = lik_constant(yule_birth, 0.0, sampling, ages);

    let bounds = [(MIN_RATE, MAX_BIRTH), (0.0, MAX_BIRTH)];
    let objective = |x: [f64; 2]| -> f64 {
        let (birth, death) = (x[0], x[1]);
        if birth - death < MIN_RATE {
            return f64::INFINITY;
        }
        lik_constant(birth, death, sampling, ages)
    };

    let x0 = [yule_birth, 0.5 * yule_birth];
    let primary = nelder_mead2(objective, x0, bounds, 2000);

    let needs_fallback =
        !primary.fun.is_finite() || primary.on_boundary || primary.fun > f_yule;
    let best = if needs_fallback {
        let fallback = anneal2(objective, x0, bounds, rng, 4000);
        if fallback.fun < primary.fun {
            fallback
        } else {
            primary
        }
    } else {
        primary
    };

    // The Yule point is itself feasible; never return anything worse.
    if f_yule.is_finite() && f_yule <= best.fun {
        return Ok((yule_birth, 0.0));
    }
    if best.fun.is_finite() {
        Ok((best.x[0], best.x[1]))
    } else {
        Err(EngineError::RateFitFailed(format!(
            "birth-death optimization did not produce a finite fit (sampling = {sampling})"
        )))
    }
}

/// Dispatch on the model choice. `yule` forces zero extinction.
pub fn fit(
    ages: &[f64],
    sampling: f64,
    yule: bool,
    rng: &mut StdRng,
) -> Result<(f64, f64), EngineError> {
    if yule {
        fit_yule(ages, sampling)
    } else {
        fit_birth_death(ages, sampling, rng)
    }
}
