//! Inverse-CDF sampling of missing speciation times.
//!
//! Adapted from the `corsim` simulation of Cusimano et al. (2012, Syst.
//! Biol. 61:785-792): each missing event first picks which inter-event
//! interval it falls into (weighted by lineage rank times the CDF mass of
//! the interval), then inverts the conditional waiting-time CDF inside
//! that interval. Pure-birth and critical (`birth = death`) processes use
//! the closed-form inversions.

use rand::rngs::StdRng;
use rand::Rng;

use crate::bd::intp1;
use crate::EngineError;

const CRITICAL_EPS: f64 = 1e-10;

/// Result of a draw. `collapsed` flags the degenerate window where the
/// two bounds coincide within precision; the caller is expected to warn
/// about the near-zero branches this will produce.
#[derive(Debug, Clone)]
pub struct Draw {
    /// New event ages, sorted oldest first.
    pub times: Vec<f64>,
    pub collapsed: bool,
}

/// Draw `missing` new event ages in `[tyoung, told]`, conditioned on the
/// existing `ages` of the clade. `told` defaults to the oldest existing
/// age. Deterministic under the caller's RNG.
pub fn draw_times(
    ages: &[f64],
    birth: f64,
    death: f64,
    missing: usize,
    told: Option<f64>,
    tyoung: f64,
    precision: f64,
    rng: &mut StdRng,
) -> Result<Draw, EngineError> {
    let oldest = ages.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let told = match told {
        Some(t) => t,
        None if oldest.is_finite() => oldest,
        None => {
            return Err(EngineError::Internal(
                "draw_times needs either existing ages or an explicit upper bound".to_owned(),
            ))
        }
    };
    if oldest.is_finite() && oldest > told && (oldest - told) > f64::EPSILON {
        return Err(EngineError::Internal(
            "zero or negative branch lengths detected in backbone phylogeny".to_owned(),
        ));
    }
    if missing == 0 {
        return Ok(Draw {
            times: Vec::new(),
            collapsed: false,
        });
    }
    if told - tyoung <= precision {
        return Ok(Draw {
            times: vec![told; missing],
            collapsed: true,
        });
    }

    // Interval grid: upper bound, existing ages inside the window
    // (descending), lower bound. Index doubles as the lineage rank.
    let mut grid: Vec<f64> = vec![told];
    let mut inside: Vec<f64> = ages
        .iter()
        .copied()
        .filter(|&x| x <= told && x >= tyoung)
        .collect();
    inside.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    grid.extend(inside);
    grid.push(tyoung);

    let mut new_times = Vec::with_capacity(missing);
    for _ in 0..missing {
        let addrank = if grid.len() > 2 {
            pick_interval(&grid, birth, death, rng)
        } else {
            0
        };

        let r: f64 = rng.gen();
        let c = intp1(grid[addrank], birth, death) - intp1(grid[addrank + 1], birth, death);
        let offset = if c != 0.0 {
            intp1(grid[addrank + 1], birth, death) / c
        } else {
            0.0
        };
        let y = (r + offset) * c;

        let x = if (birth - death).abs() < CRITICAL_EPS {
            y / (1.0 - y * birth)
        } else {
            (1.0 / (death - birth)) * ((1.0 - y * birth) / (1.0 - y * death)).ln()
        };
        // Floating-point slack can push the inversion a hair outside the
        // window; the admissible-interval property is load-bearing.
        let x = if x.is_finite() {
            x.clamp(tyoung, told)
        } else {
            tyoung
        };
        new_times.push(x);
    }

    new_times.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    Ok(Draw {
        times: new_times,
        collapsed: false,
    })
}

/// Rank-weighted interval selection: interval `i` (between grid[i] and
/// grid[i+1]) carries weight `(i+1) · (intp1(grid[i]) − intp1(grid[i+1]))`.
fn pick_interval(grid: &[f64], birth: f64, death: f64, rng: &mut StdRng) -> usize {
    let mut weights = Vec::with_capacity(grid.len() - 1);
    for i in 1..grid.len() {
        let w = i as f64 * (intp1(grid[i - 1], birth, death) - intp1(grid[i], birth, death));
        weights.push(w);
    }
    let total: f64 = weights.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return 0;
    }
    let r: f64 = rng.gen();
    let mut cum = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cum += w / total;
        if cum > r {
            return i;
        }
    }
    0
}
