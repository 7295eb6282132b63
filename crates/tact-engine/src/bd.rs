//! Constant-rate birth-death probabilities and likelihoods.
//!
//! Formulas follow Stadler (2009, J. Theor. Biol. 261:58-66) and Stadler
//! (2010, J. Theor. Biol. 267:396-404, remark 3.2); `intp1` is the c₂
//! term of equation A.2 in Cusimano et al. (2012, Syst. Biol.
//! 61:785-792). Everything is evaluated in log-space where overflow is
//! possible, and the `birth → death` critical limit is taken analytically
//! rather than risked numerically.

/// Parameters closer together than this use the critical-limit forms.
const CRITICAL_EPS: f64 = 1e-10;

/// Convert turnover and relative extinction to birth and death rates.
pub fn get_bd(r: f64, a: f64) -> (f64, f64) {
    (r / (1.0 - a), a * r / (1.0 - a))
}

/// Convert birth and death rates to turnover and relative extinction.
pub fn get_ra(b: f64, d: f64) -> (f64, f64) {
    (b - d, d / b)
}

/// Probability that an individual alive at time `t` before present leaves
/// no sampled descendants, with sampling fraction `rho`.
pub fn p0(t: f64, l: f64, m: f64, rho: f64) -> f64 {
    if (l - m).abs() < CRITICAL_EPS {
        1.0 - rho / (1.0 + rho * l * t)
    } else {
        1.0 - rho * (l - m) / (rho * l + (l * (1.0 - rho) - m) * (-(l - m) * t).exp())
    }
}

/// Log of the probability that an individual alive at time `t` before
/// present has exactly one sampled extant descendant.
///
/// The denominator `ρλ + (λ(1-ρ) - μ)·e^{-(λ-μ)t}` is bounded below by
/// `min(λ-μ, ρλ) > 0` whenever `λ > μ ≥ 0` and `ρ ∈ (0, 1]`, so the
/// logarithm is well defined throughout the feasible region.
pub fn ln_p1(t: f64, l: f64, m: f64, rho: f64) -> f64 {
    if (l - m).abs() < CRITICAL_EPS {
        rho.ln() - 2.0 * (1.0 + rho * l * t).ln()
    } else {
        let delta = l - m;
        let inner = rho * l + (l * (1.0 - rho) - m) * (-delta * t).exp();
        rho.ln() + 2.0 * delta.abs().ln() - delta * t - 2.0 * inner.ln()
    }
}

/// Portion of the CDF used for inverse-transform sampling of missing
/// speciation times under a constant-rate birth-death process.
pub fn intp1(t: f64, l: f64, m: f64) -> f64 {
    if (l - m).abs() < CRITICAL_EPS {
        t / (1.0 + l * t)
    } else {
        let delta = l - m;
        (1.0 - (-delta * t).exp()) / (l - m * (-delta * t).exp())
    }
}

/// Negative log-likelihood of a constant-rate birth-death process,
/// conditioned on survival and on observing the root, for the given
/// branching times and sampling fraction. Returns `+∞` for infeasible
/// parameters or any non-finite intermediate, so optimizers treat such
/// points as simply bad rather than crashing.
pub fn lik_constant(birth: f64, death: f64, rho: f64, times: &[f64]) -> f64 {
    if times.is_empty()
        || !(rho > 0.0 && rho <= 1.0)
        || birth <= 0.0
        || death < 0.0
        || birth < death
    {
        return f64::INFINITY;
    }
    let mut t: Vec<f64> = times.to_vec();
    t.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

    // root = survival = 1 throughout TACT.
    let mut lik = 2.0 * ln_p1(t[0], birth, death, rho);
    for &tt in &t[1..] {
        lik += birth.ln() + ln_p1(tt, birth, death, rho);
    }
    lik -= 2.0 * (1.0 - p0(t[0], birth, death, rho)).ln();

    if lik.is_finite() {
        -lik
    } else {
        f64::INFINITY
    }
}

/// Probability that a random sample of `k` taxa from a clade of `n` total
/// taxa includes the crown node, under a Yule process (Sanderson 1996,
/// Syst. Biol. 45:168-173).
///
/// `n = k = 1` returns 0.0; not strictly meaningful, but it makes
/// singleton taxa fall through to stem attachment, which is what we want.
pub fn crown_capture_probability(n: usize, k: usize) -> f64 {
    debug_assert!(n >= k, "n must be >= k (n={n}, k={k})");
    if n == 1 && k == 1 {
        return 0.0;
    }
    1.0 - 2.0 * (n - k) as f64 / ((n - 1) as f64 * (k + 1) as f64)
}
