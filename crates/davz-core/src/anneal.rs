// crates/davz-core/src/anneal.rs

//! Annealing engine: thermalization, the initial-temperature estimate, and
//! the merge / split / purge moves applied between cooling steps.
//!
//! Every move leaves the prototypes z-ordered and the track windows valid;
//! merge and purge remove at most one prototype per call so the caller can
//! re-equilibrate between structural changes.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

use tracing::debug;

use crate::params::Params;
use crate::track::TrackSet;
use crate::update::{eik, local_exp, update};
use crate::vertex::VertexSet;

/// Minimum separation for an accepted split.
const SPLIT_EPSILON: f64 = 1e-3;

/// Fixed-point iterate `update` at constant `beta` until the largest
/// prototype move drops below the tolerance, or the iteration cap is hit.
///
/// Windows are refreshed up front, and again whenever the movement
/// accumulated since the last refresh could have carried a prototype past a
/// window edge.
pub(crate) fn thermalize(
    p: &Params,
    beta: f64,
    tks: &mut TrackSet,
    v: &mut VertexSet,
    delta_max0: f64,
    rho0: f64,
) -> u32 {
    let delta_max = match p.convergence_mode {
        1 => p.delta_low_t / beta.max(1.0).sqrt(),
        _ => delta_max0,
    };

    tks.set_vtx_range(beta, v, p);
    let mut delta_sum_range = 0.0; // lower bound on accumulated movement
    let mut z0 = v.zvtx.clone();

    let mut niter = 0;
    while niter < p.max_iterations {
        niter += 1;
        let delta = update(beta, tks, v, rho0, p.dz_cut_off, false);
        delta_sum_range += delta;

        if delta_sum_range > p.zrange_min
            && v.zvtx
                .iter()
                .zip(&z0)
                .any(|(z, z_prev)| (z - z_prev).abs() > p.zrange_min)
        {
            tks.set_vtx_range(beta, v, p);
            delta_sum_range = 0.0;
            z0.clone_from(&v.zvtx);
        }

        if delta < delta_max {
            break;
        }
    }

    debug!(niter, t = 1.0 / beta, nv = v.len(), "thermalize");
    niter
}

/// First inverse temperature of the schedule, from a single-prototype fit
/// at infinite temperature.
///
/// Every prototype present is refit to the global weighted mean; callers
/// only invoke this with one prototype, and the multi-vertex generality is
/// never exercised.
pub(crate) fn beta0(p: &Params, tks: &TrackSet, v: &mut VertexSet) -> f64 {
    let mut t0 = 0.0_f64; // max critical temperature at beta = 0

    for k in 0..v.len() {
        // weighted fit at T = infinity
        let mut sumwz = 0.0;
        let mut sumw = 0.0;
        for i in 0..tks.len() {
            let w = tks.tkwt[i] * tks.dz2[i];
            sumwz += w * tks.zpca[i];
            sumw += w;
        }
        v.zvtx[k] = sumwz / sumw;

        let mut a = 0.0;
        let mut b = 0.0;
        for i in 0..tks.len() {
            let dx = tks.zpca[i] - v.zvtx[k];
            let w = tks.tkwt[i] * tks.dz2[i];
            a += w * dx * dx * tks.dz2[i];
            b += w;
        }
        t0 = t0.max(2.0 * a / b);
    }

    if t0 > 1.0 / p.beta_max {
        // start the cooldown one step above the first critical temperature
        #[allow(clippy::cast_possible_truncation)]
        let cooling_steps =
            1 - ((t0 * p.beta_max).ln() / p.cooling_factor.ln()).floor() as i32;
        p.beta_max * p.cooling_factor.powi(cooling_steps)
    } else {
        // at least one annealing step
        p.beta_max * p.cooling_factor
    }
}

/// Merge the closest adjacent pair whose combined prototype would already
/// be below its own critical temperature at the current `beta`.
///
/// At most one merge per call; returns whether one happened.
pub(crate) fn merge(p: &Params, v: &mut VertexSet, tks: &mut TrackSet, beta: f64) -> bool {
    let nv = v.len();
    if nv < 2 {
        return false;
    }

    // closest pairs first
    let mut critical: Vec<(f64, usize)> = Vec::new();
    for k in 0..nv - 1 {
        let dz = (v.zvtx[k + 1] - v.zvtx[k]).abs();
        if dz < p.zmerge {
            critical.push((dz, k));
        }
    }
    if critical.is_empty() {
        return false;
    }
    critical.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

    for &(_, k) in &critical {
        let rho = v.rho[k] + v.rho[k + 1];
        let dz = v.zvtx[k + 1] - v.zvtx[k];
        let swe = v.swe[k] + v.swe[k + 1] - v.rho[k] * v.rho[k + 1] / rho * dz * dz;
        let tc = 2.0 * swe / (v.sw[k] + v.sw[k + 1]);

        if tc * beta < 1.0 {
            debug!(z_lo = v.zvtx[k], z_hi = v.zvtx[k + 1], tc, "merging prototypes");
            v.zvtx[k] = if rho > 0.0 {
                (v.rho[k] * v.zvtx[k] + v.rho[k + 1] * v.zvtx[k + 1]) / rho
            } else {
                0.5 * (v.zvtx[k] + v.zvtx[k + 1])
            };
            v.rho[k] = rho;
            v.sw[k] += v.sw[k + 1];
            v.swe[k] = swe;
            v.remove_item(k + 1, tks);
            tks.set_vtx_range(beta, v, p);
            return true;
        }
    }

    false
}

/// Split prototypes whose critical temperature exceeds the current one,
/// hottest first. An `update` with Tc bookkeeping must directly precede
/// this call (same `beta`, no structural changes in between).
///
/// Returns whether at least one prototype was split.
pub(crate) fn split(
    p: &Params,
    beta: f64,
    tks: &mut TrackSet,
    v: &mut VertexSet,
    threshold: f64,
) -> bool {
    let mut nv = v.len();
    let nt = tks.len();

    let mut critical: Vec<(f64, usize)> = Vec::new();
    for k in 0..nv {
        let tc = 2.0 * v.swe[k] / v.sw[k];
        if beta * tc > threshold {
            critical.push((tc, k));
        }
    }
    if critical.is_empty() {
        return false;
    }
    critical.sort_by(|a, b| b.0.total_cmp(&a.0).then(b.1.cmp(&a.1)));

    let mut any = false;
    for ic in 0..critical.len() {
        let k = critical[ic].1;

        // responsibility-weighted estimates of the two subclusters
        let mut p1 = 0.0;
        let mut z1 = 0.0;
        let mut w1 = 0.0;
        let mut p2 = 0.0;
        let mut z2 = 0.0;
        let mut w2 = 0.0;
        for i in 0..nt {
            if tks.z_sum[i] > 1e-100 {
                // winner-takes-all far out, logistic nearby
                let arg = (tks.zpca[i] - v.zvtx[k]) * (beta * tks.dz2[i]).sqrt();
                let (tl, tr) = if arg.abs() < 20.0 {
                    let t = local_exp(-arg);
                    (t / (t + 1.0), 1.0 / (t + 1.0))
                } else if tks.zpca[i] < v.zvtx[k] {
                    (1.0, 0.0)
                } else {
                    (0.0, 1.0)
                };

                let pik = v.rho[k] * tks.tkwt[i]
                    * local_exp(-beta * eik(tks.zpca[i], v.zvtx[k], tks.dz2[i]))
                    / tks.z_sum[i];
                let w = pik * tks.dz2[i];
                p1 += pik * tl;
                z1 += w * tl * tks.zpca[i];
                w1 += w * tl;
                p2 += pik * tr;
                z2 += w * tr * tks.zpca[i];
                w2 += w * tr;
            }
        }

        let mut z1 = if w1 > 0.0 {
            z1 / w1
        } else {
            v.zvtx[k] - SPLIT_EPSILON
        };
        let mut z2 = if w2 > 0.0 {
            z2 / w2
        } else {
            v.zvtx[k] + SPLIT_EPSILON
        };

        // not enough room: lean the halves on the neighbors
        if k > 0 {
            let bound = 0.6 * v.zvtx[k] + 0.4 * v.zvtx[k - 1];
            if z1 < bound {
                z1 = bound;
            }
        }
        if k + 1 < nv {
            let bound = 0.6 * v.zvtx[k] + 0.4 * v.zvtx[k + 1];
            if z2 > bound {
                z2 = bound;
            }
        }

        // only split when the halves are significantly separated
        if z2 - z1 > SPLIT_EPSILON {
            any = true;
            let pk1 = p1 * v.rho[k] / (p1 + p2);
            let pk2 = p2 * v.rho[k] / (p1 + p2);
            v.zvtx[k] = z2;
            v.rho[k] = pk2;
            v.insert_item(k, z1, pk1, tks);
            nv += 1;

            // re-aim the pending candidates past the insertion point
            for jc in ic..critical.len() {
                if critical[jc].1 >= k {
                    critical[jc].1 += 1;
                }
            }
        } else {
            debug!(z = v.zvtx[k], "split rejected, too small");
        }
    }

    any
}

/// Remove the prototype with fewer than two unique tracks and the smallest
/// posterior support, if any. At most one removal per call.
pub(crate) fn purge(
    p: &Params,
    v: &mut VertexSet,
    tks: &mut TrackSet,
    rho0: f64,
    beta: f64,
) -> bool {
    const EPS: f64 = 1e-100;
    let nv = v.len();
    let nt = tks.len();

    if nv < 2 {
        return false;
    }

    #[allow(clippy::cast_precision_loss)]
    let mut sumpmin = nt as f64;
    let mut k0 = nv;

    let inverse_zsums: Vec<f64> = tks
        .z_sum
        .iter()
        .map(|&z| if z > EPS { 1.0 / z } else { 0.0 })
        .collect();
    let rhoconst = rho0 * local_exp(-beta * p.dz_cut_off * p.dz_cut_off);

    let mut arg_cache = vec![0.0_f64; nt];
    let mut eik_cache = vec![0.0_f64; nt];

    for k in 0..nv {
        let pmax = v.rho[k] / (v.rho[k] + rhoconst);
        let pcut = p.uniquetrkweight * pmax;

        for i in 0..nt {
            let res = tks.zpca[i] - v.zvtx[k];
            arg_cache[i] = -beta * tks.dz2[i] * (res * res);
        }
        for i in 0..nt {
            eik_cache[i] = local_exp(arg_cache[i]);
        }

        let mut n_unique = 0_u32;
        let mut sump = 0.0;
        for i in 0..nt {
            let pik = v.rho[k] * eik_cache[i] * inverse_zsums[i];
            sump += pik;
            n_unique += u32::from(pik > pcut && tks.tkwt[i] > 0.0);
        }

        if n_unique < 2 && sump < sumpmin {
            sumpmin = sump;
            k0 = k;
        }
    }

    if k0 == nv {
        return false;
    }

    debug!(z = v.zvtx[k0], sump = sumpmin, "purging prototype");
    v.remove_item(k0, tks);
    tks.set_vtx_range(beta, v, p);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ClustererConfig;
    use crate::track::{BeamSpot, TrackRecord};

    fn params() -> Params {
        ClustererConfig::default().resolve()
    }

    fn filled(zs: &[f64], p: &Params) -> TrackSet {
        let records: Vec<_> = zs.iter().map(|&z| TrackRecord::at(z, 0.05)).collect();
        TrackSet::fill(&records, &BeamSpot::default(), p)
    }

    #[test]
    fn beta0_starts_above_the_first_critical_temperature() {
        let p = params();
        let tks = filled(&[-1.0, -1.0, 1.0, 1.0], &p);
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);

        let beta = beta0(&p, &tks, &mut v);
        // fit lands on the mean
        assert!(v.zvtx[0].abs() < 1e-9);
        // T0 = 2 * dz2 * <dx²> ≈ 788; the start temperature must exceed it
        assert!(beta > 0.0);
        assert!(1.0 / beta > 2.0 * tks.dz2[0]);
        assert!(beta < p.beta_max);
    }

    #[test]
    fn beta0_without_structure_keeps_one_cooling_step() {
        let p = params();
        // a single track has zero spread, so T0 = 0
        let tks = filled(&[0.5], &p);
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);
        let beta = beta0(&p, &tks, &mut v);
        assert!((beta - p.beta_max * p.cooling_factor).abs() < 1e-12);
    }

    #[test]
    fn thermalize_is_bounded_and_converges() {
        let p = params();
        let mut tks = filled(&[-0.2, -0.1, 0.0, 0.1, 0.2], &p);
        let mut v = VertexSet::default();
        v.add_item(0.9, 1.0); // start far from the data
        tks.clear_vtx_range(v.len());

        let niter = thermalize(&p, 0.3, &mut tks, &mut v, p.delta_high_t, 0.0);
        assert!(niter <= p.max_iterations);
        assert!(v.zvtx[0].abs() < 0.05, "z = {}", v.zvtx[0]);
    }

    #[test]
    fn merge_collapses_a_coincident_pair() {
        let p = params();
        let mut tks = filled(&[-0.001, 0.0, 0.0, 0.001], &p);
        let mut v = VertexSet::default();
        v.add_item(-0.002, 0.5);
        v.add_item(0.002, 0.5);
        tks.clear_vtx_range(v.len());
        update(0.5, &mut tks, &mut v, 0.0, p.dz_cut_off, true);

        assert!(merge(&p, &mut v, &mut tks, 0.5));
        assert_eq!(v.len(), 1);
        assert!(v.zvtx[0].abs() < 0.002);
        assert!((v.rho[0] - 1.0).abs() < 1e-9);
        // a second call finds nothing to do
        assert!(!merge(&p, &mut v, &mut tks, 0.5));
    }

    #[test]
    fn merge_respects_the_distance_gate() {
        let p = params();
        let mut tks = filled(&[-0.5, 0.5], &p);
        let mut v = VertexSet::default();
        v.add_item(-0.5, 0.5);
        v.add_item(0.5, 0.5);
        tks.clear_vtx_range(v.len());
        update(0.5, &mut tks, &mut v, 0.0, p.dz_cut_off, true);

        // Δz = 1.0 ≫ zmerge
        assert!(!merge(&p, &mut v, &mut tks, 0.5));
        assert_eq!(v.len(), 2);
    }

    #[test]
    fn split_separates_a_double_peak() {
        let p = params();
        let zs: Vec<f64> = (0..10)
            .map(|i| if i < 5 { -0.5 } else { 0.5 })
            .collect();
        let mut tks = filled(&zs, &p);
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);
        tks.clear_vtx_range(v.len());

        // equilibrate at a temperature below the critical one
        let beta = 0.5;
        update(beta, &mut tks, &mut v, 0.0, p.dz_cut_off, true);
        assert!(split(&p, beta, &mut tks, &mut v, 1.0));

        assert_eq!(v.len(), 2);
        assert!(v.zvtx[0] < v.zvtx[1]);
        // masses are preserved by the split
        let total: f64 = v.rho.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn split_leaves_a_cold_vertex_alone() {
        let p = params();
        let mut tks = filled(&[-0.01, 0.0, 0.01], &p);
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);
        tks.clear_vtx_range(v.len());

        let beta = 0.5;
        update(beta, &mut tks, &mut v, 0.0, p.dz_cut_off, true);
        assert!(!split(&p, beta, &mut tks, &mut v, 1.0));
        assert_eq!(v.len(), 1);
    }

    #[test]
    fn purge_drops_the_unsupported_prototype() {
        let p = params();
        // two real clusters plus a prototype nobody supports
        let mut tks = filled(&[-1.0, -1.0, -1.0, 1.0, 1.0, 1.0], &p);
        let mut v = VertexSet::default();
        v.add_item(-1.0, 0.45);
        v.add_item(0.0, 0.1);
        v.add_item(1.0, 0.45);
        tks.clear_vtx_range(v.len());

        let beta = p.beta_purge;
        let rho0 = 1.0 / 6.0;
        update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, false);

        assert!(purge(&p, &mut v, &mut tks, rho0, beta));
        assert_eq!(v.len(), 2);
        assert!((v.zvtx[0] + 1.0).abs() < 0.1);
        assert!((v.zvtx[1] - 1.0).abs() < 0.1);
        // the survivors are both well supported
        assert!(!purge(&p, &mut v, &mut tks, rho0, beta));
    }
}
