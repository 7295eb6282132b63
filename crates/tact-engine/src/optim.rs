//! Derivative-free optimizers for the rate estimator.
//!
//! Three pieces, mirroring the numerics TACT needs and nothing more:
//!
//! - [`minimize_scalar_bounded`]: Brent-style bounded scalar minimization
//!   (golden section with parabolic interpolation), a port of the classic
//!   Fortran `fmin` as found in scipy's bounded scalar solver.
//! - [`nelder_mead2`]: a two-parameter Nelder-Mead simplex. Constraints
//!   are handled by the objective returning `+∞` outside the feasible
//!   set, so the simplex simply never settles there.
//! - [`anneal2`]: seeded simulated annealing over a box, used when the
//!   simplex stalls on the flat or multimodal likelihoods that
//!   species-poor and species-rich clades produce.

use rand::rngs::StdRng;
use rand::Rng;

#[derive(Debug, Clone, Copy)]
pub struct ScalarFit {
    pub x: f64,
    pub fun: f64,
    pub converged: bool,
}

/// Bounded scalar minimization by golden-section search with parabolic
/// interpolation. `xatol` is the absolute solution tolerance.
pub fn minimize_scalar_bounded<F>(
    func: F,
    bounds: (f64, f64),
    xatol: f64,
    maxfun: usize,
) -> ScalarFit
where
    F: Fn(f64) -> f64,
{
    let (x1, x2) = bounds;
    debug_assert!(x1 <= x2, "lower bound exceeds upper bound");

    let sqrt_eps = (2.2e-16f64).sqrt();
    let golden_mean = 0.5 * (3.0 - 5.0f64.sqrt());
    let (mut a, mut b) = (x1, x2);
    let mut fulc = a + golden_mean * (b - a);
    let (mut nfc, mut xf) = (fulc, fulc);
    let mut rat = 0.0f64;
    let mut e = 0.0f64;
    let mut x = xf;
    let mut fx = func(x);
    let mut num = 1usize;
    let mut fu = f64::INFINITY;

    let mut ffulc = fx;
    let mut fnfc = fx;
    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
    let mut tol2 = 2.0 * tol1;

    let mut flag_maxfun = false;
    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        let mut golden = true;
        // Try a parabolic fit through the three best points.
        if e.abs() > tol1 {
            golden = false;
            let r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            let r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    let si = if xm - xf >= 0.0 { 1.0 } else { -1.0 };
                    rat = tol1 * si;
                }
            } else {
                golden = true;
            }
        }

        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden_mean * e;
        }

        let si = if rat >= 0.0 { 1.0 } else { -1.0 };
        x = xf + si * rat.abs().max(tol1);
        fu = func(x);
        num += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
        tol2 = 2.0 * tol1;

        if num >= maxfun {
            flag_maxfun = true;
            break;
        }
    }

    let nan_seen = xf.is_nan() || fx.is_nan() || fu.is_nan();
    ScalarFit {
        x: xf,
        fun: fx,
        converged: !flag_maxfun && !nan_seen,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PointFit {
    pub x: [f64; 2],
    pub fun: f64,
    pub converged: bool,
    pub on_boundary: bool,
}

fn near_boundary(x: [f64; 2], bounds: [(f64, f64); 2]) -> bool {
    x.iter().zip(bounds.iter()).any(|(&v, &(lo, hi))| {
        let span = (hi - lo).max(f64::MIN_POSITIVE);
        (v - lo).abs() <= 1e-6 * span || (hi - v).abs() <= 1e-6 * span
    })
}

/// Two-parameter Nelder-Mead with box bounds. The objective is expected
/// to return `+∞` outside its feasible set (this is how the linear
/// `birth > death` constraint is enforced); points are additionally
/// clamped to the box so the simplex cannot wander off.
pub fn nelder_mead2<F>(
    func: F,
    x0: [f64; 2],
    bounds: [(f64, f64); 2],
    maxiter: usize,
) -> PointFit
where
    F: Fn([f64; 2]) -> f64,
{
    const ALPHA: f64 = 1.0; // reflection
    const GAMMA: f64 = 2.0; // expansion
    const RHO: f64 = 0.5; // contraction
    const SIGMA: f64 = 0.5; // shrink
    const FTOL: f64 = 1e-10;
    const XTOL: f64 = 1e-10;

    let clamp = |x: [f64; 2]| -> [f64; 2] {
        [
            x[0].clamp(bounds[0].0, bounds[0].1),
            x[1].clamp(bounds[1].0, bounds[1].1),
        ]
    };
    let eval = |x: [f64; 2]| -> f64 {
        let v = func(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    // Initial simplex: x0 plus a 5% step in each coordinate.
    let mut simplex: Vec<([f64; 2], f64)> = Vec::with_capacity(3);
    let start = clamp(x0);
    simplex.push((start, eval(start)));
    for dim in 0..2 {
        let mut p = start;
        let span = bounds[dim].1 - bounds[dim].0;
        let step = if p[dim] != 0.0 {
            0.05 * p[dim].abs()
        } else {
            0.01 * span.max(1e-4)
        };
        p[dim] += step;
        let p = clamp(p);
        simplex.push((p, eval(p)));
    }

    let mut iters = 0usize;
    let converged = loop {
        simplex.sort_by(|l, r| l.1.partial_cmp(&r.1).unwrap_or(std::cmp::Ordering::Equal));
        let best = simplex[0];
        let worst = simplex[2];

        let f_spread = (worst.1 - best.1).abs();
        let x_spread = simplex[1..]
            .iter()
            .map(|(p, _)| (p[0] - best.0[0]).abs().max((p[1] - best.0[1]).abs()))
            .fold(0.0f64, f64::max);
        if best.1.is_finite() && f_spread < FTOL && x_spread < XTOL {
            break true;
        }
        if iters >= maxiter {
            break false;
        }
        iters += 1;

        let centroid = [
            0.5 * (simplex[0].0[0] + simplex[1].0[0]),
            0.5 * (simplex[0].0[1] + simplex[1].0[1]),
        ];
        let reflect = clamp([
            centroid[0] + ALPHA * (centroid[0] - worst.0[0]),
            centroid[1] + ALPHA * (centroid[1] - worst.0[1]),
        ]);
        let f_reflect = eval(reflect);

        if f_reflect < simplex[0].1 {
            let expand = clamp([
                centroid[0] + GAMMA * (reflect[0] - centroid[0]),
                centroid[1] + GAMMA * (reflect[1] - centroid[1]),
            ]);
            let f_expand = eval(expand);
            simplex[2] = if f_expand < f_reflect {
                (expand, f_expand)
            } else {
                (reflect, f_reflect)
            };
            continue;
        }
        if f_reflect < simplex[1].1 {
            simplex[2] = (reflect, f_reflect);
            continue;
        }

        let contract = clamp([
            centroid[0] + RHO * (worst.0[0] - centroid[0]),
            centroid[1] + RHO * (worst.0[1] - centroid[1]),
        ]);
        let f_contract = eval(contract);
        if f_contract < worst.1 {
            simplex[2] = (contract, f_contract);
            continue;
        }

        // Shrink toward the best vertex.
        for i in 1..3 {
            let p = clamp([
                simplex[0].0[0] + SIGMA * (simplex[i].0[0] - simplex[0].0[0]),
                simplex[0].0[1] + SIGMA * (simplex[i].0[1] - simplex[0].0[1]),
            ]);
            simplex[i] = (p, eval(p));
        }
    };

    simplex.sort_by(|l, r| l.1.partial_cmp(&r.1).unwrap_or(std::cmp::Ordering::Equal));
    let (x, fun) = simplex[0];
    PointFit {
        x,
        fun,
        converged: converged && fun.is_finite(),
        on_boundary: near_boundary(x, bounds),
    }
}

/// Simulated annealing over a box with geometric cooling. Deterministic
/// under the caller's RNG; used as the fallback when the simplex returns
/// a non-finite, boundary-pinned or non-improving fit.
pub fn anneal2<F>(
    func: F,
    x0: [f64; 2],
    bounds: [(f64, f64); 2],
    rng: &mut StdRng,
    iters: usize,
) -> PointFit
where
    F: Fn([f64; 2]) -> f64,
{
    let spans = [bounds[0].1 - bounds[0].0, bounds[1].1 - bounds[1].0];
    let clamp = |x: [f64; 2]| -> [f64; 2] {
        [
            x[0].clamp(bounds[0].0, bounds[0].1),
            x[1].clamp(bounds[1].0, bounds[1].1),
        ]
    };
    let eval = |x: [f64; 2]| -> f64 {
        let v = func(x);
        if v.is_nan() {
            f64::INFINITY
        } else {
            v
        }
    };

    let mut cur = clamp(x0);
    let mut f_cur = eval(cur);
    let mut best = cur;
    let mut f_best = f_cur;

    // If the start is infeasible, scatter until we find footing.
    let mut tries = 0;
    while !f_cur.is_finite() && tries < 100 {
        cur = [
            bounds[0].0 + rng.gen::<f64>() * spans[0],
            bounds[1].0 + rng.gen::<f64>() * spans[1],
        ];
        f_cur = eval(cur);
        if f_cur < f_best {
            best = cur;
            f_best = f_cur;
        }
        tries += 1;
    }

    let t0 = 1.0f64;
    let cooling = 0.995f64;
    let mut temp = t0;
    for _ in 0..iters {
        let cand = clamp([
            cur[0] + (rng.gen::<f64>() - 0.5) * spans[0] * temp,
            cur[1] + (rng.gen::<f64>() - 0.5) * spans[1] * temp,
        ]);
        let f_cand = eval(cand);
        let accept = if f_cand <= f_cur {
            true
        } else if f_cand.is_finite() && f_cur.is_finite() {
            // Metropolis step scaled by the current objective magnitude.
            let scale = f_cur.abs().max(1.0);
            rng.gen::<f64>() < (-(f_cand - f_cur) / (temp * scale)).exp()
        } else {
            false
        };
        if accept {
            cur = cand;
            f_cur = f_cand;
            if f_cur < f_best {
                best = cur;
                f_best = f_cur;
            }
        }
        temp *= cooling;
    }

    PointFit {
        x: best,
        fun: f_best,
        converged: f_best.is_finite(),
        on_boundary: near_boundary(best, bounds),
    }
}
