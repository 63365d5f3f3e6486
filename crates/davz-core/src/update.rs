// crates/davz-core/src/update.rs

//! The expectation/maximization pass shared by the annealing loop and the
//! critical-temperature bookkeeping.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

use crate::track::TrackSet;
use crate::vertex::VertexSet;

/// Exponential used by every kernel. `f64::exp` today; this is the single
/// seam where a faster approximation would slot in.
#[inline]
pub(crate) fn local_exp(x: f64) -> f64 {
    x.exp()
}

/// Fill `out[kmin..kmax]` with `exp(arg[kmin..kmax])`.
#[inline]
pub(crate) fn local_exp_range(arg: &[f64], out: &mut [f64], kmin: usize, kmax: usize) {
    for k in kmin..kmax {
        out[k] = local_exp(arg[k]);
    }
}

/// Assignment energy of a track `(z, dz2)` against a vertex at `zv`.
#[inline]
pub(crate) fn eik(z: f64, zv: f64, dz2: f64) -> f64 {
    (z - zv) * (z - zv) * dz2
}

/// One E/M pass at inverse temperature `beta`.
///
/// Recomputes every track's partition sum over its active window (seeded
/// with the uniform noise term when `rho0 > 0`), then moves each prototype
/// to its responsibility-weighted mean and renormalizes the masses. With
/// `compute_tc` the heat-capacity numerator `swe` is maintained as well,
/// feeding the split/merge critical-temperature estimates.
///
/// Returns the largest prototype displacement of the pass.
pub(crate) fn update(
    beta: f64,
    tks: &mut TrackSet,
    v: &mut VertexSet,
    rho0: f64,
    dz_cut_off: f64,
    compute_tc: bool,
) -> f64 {
    let nt = tks.len();
    let nv = v.len();

    // noise term, shared by every track
    let z_init = if rho0 > 0.0 {
        rho0 * local_exp(-beta * dz_cut_off * dz_cut_off)
    } else {
        0.0
    };

    for k in 0..nv {
        v.se[k] = 0.0;
        v.sw[k] = 0.0;
        v.swz[k] = 0.0;
        if compute_tc {
            v.swe[k] = 0.0;
        }
    }

    let mut sumtkwt = 0.0;
    let obeta = -1.0 / beta;

    for i in 0..nt {
        let kmin = tks.kmin[i] as usize;
        let kmax = tks.kmax[i] as usize;

        let track_z = tks.zpca[i];
        let botrack_dz2 = -beta * tks.dz2[i];

        // auto-vectorized
        for k in kmin..kmax {
            let res = track_z - v.zvtx[k];
            v.exp_arg[k] = botrack_dz2 * (res * res);
        }
        local_exp_range(&v.exp_arg, &mut v.exp, kmin, kmax);

        let mut z_sum = z_init;
        for k in kmin..kmax {
            z_sum += v.rho[k] * v.exp[k];
        }
        if !z_sum.is_finite() {
            z_sum = 0.0;
        }
        tks.z_sum[i] = z_sum;
        sumtkwt += tks.tkwt[i];

        if z_sum > 1e-100 {
            let tkwt_over_z = tks.tkwt[i] / z_sum;
            let w_scale = tkwt_over_z * tks.dz2[i];

            // auto-vectorized
            for k in kmin..kmax {
                v.se[k] += v.exp[k] * tkwt_over_z;
                let w = v.rho[k] * v.exp[k] * w_scale;
                v.sw[k] += w;
                v.swz[k] += w * track_z;
                if compute_tc {
                    v.swe[k] += w * v.exp_arg[k] * obeta;
                }
            }
        }
    }

    // M-step: move prototypes, renormalize masses
    let mut delta = 0.0_f64;
    for k in 0..nv {
        if v.sw[k] > 0.0 {
            let znew = v.swz[k] / v.sw[k];
            delta = delta.max((v.zvtx[k] - znew).abs());
            v.zvtx[k] = znew;
        }
    }
    if sumtkwt > 0.0 {
        let osumtkwt = 1.0 / sumtkwt;
        for k in 0..nv {
            v.rho[k] *= v.se[k] * osumtkwt;
        }
    }

    delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ClustererConfig;
    use crate::track::{BeamSpot, TrackRecord, TrackSet};

    fn simple_state(zs: &[f64]) -> (TrackSet, VertexSet) {
        let p = ClustererConfig::default().resolve();
        let records: Vec<_> = zs.iter().map(|&z| TrackRecord::at(z, 0.05)).collect();
        let mut tks = TrackSet::fill(&records, &BeamSpot::default(), &p);
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);
        tks.clear_vtx_range(v.len());
        (tks, v)
    }

    #[test]
    fn single_vertex_converges_to_weighted_mean() {
        let zs = [-0.3, -0.1, 0.2, 0.6];
        let (mut tks, mut v) = simple_state(&zs);

        let mut delta = f64::INFINITY;
        let mut iters = 0;
        while delta > 1e-12 && iters < 200 {
            delta = update(0.2, &mut tks, &mut v, 0.0, 0.0, false);
            iters += 1;
        }

        // equal weights: plain mean
        let mean: f64 = tks.zpca.iter().sum::<f64>() / tks.zpca.len() as f64;
        assert!((v.zvtx[0] - mean).abs() < 1e-9, "z = {}", v.zvtx[0]);
    }

    #[test]
    fn masses_stay_normalized_without_noise() {
        let zs = [-1.0, -0.9, 0.9, 1.0];
        let (mut tks, mut v) = simple_state(&zs);
        // hand the mass to two prototypes
        v.zvtx[0] = -1.0;
        v.rho[0] = 0.5;
        v.add_item(1.0, 0.5);
        tks.clear_vtx_range(v.len());

        for _ in 0..5 {
            update(0.5, &mut tks, &mut v, 0.0, 0.0, true);
            let total: f64 = v.rho.iter().sum();
            assert!((total - 1.0).abs() < 1e-9, "Σρ = {total}");
        }
    }

    #[test]
    fn swe_is_nonnegative_and_tracks_spread() {
        let zs = [-0.5, 0.5];
        let (mut tks, mut v) = simple_state(&zs);
        update(1.0, &mut tks, &mut v, 0.0, 0.0, true);
        assert!(v.swe[0] >= 0.0);
        // both tracks sit well away from the prototype
        assert!(v.swe[0] > 0.0);
    }

    #[test]
    fn windowed_update_matches_full_update() {
        let p = ClustererConfig::default().resolve();
        let records: Vec<_> = (0..30)
            .map(|i| TrackRecord::at(-1.0 + 0.07 * f64::from(i), 0.05))
            .collect();
        let mut tks_full = TrackSet::fill(&records, &BeamSpot::default(), &p);
        let mut v_full = VertexSet::default();
        v_full.add_item(-1.0, 0.5);
        v_full.add_item(1.0, 0.5);
        tks_full.clear_vtx_range(v_full.len());

        let mut tks_win = tks_full.clone();
        let mut v_win = v_full.clone();

        let beta = 2.0;
        // windows sized per the selection rule must not change the result
        tks_win.set_vtx_range(beta, &v_win, &p);
        let d_full = update(beta, &mut tks_full, &mut v_full, 0.0, 0.0, false);
        let d_win = update(beta, &mut tks_win, &mut v_win, 0.0, 0.0, false);

        assert!((d_full - d_win).abs() < 1e-9);
        for k in 0..v_full.len() {
            assert!((v_full.zvtx[k] - v_win.zvtx[k]).abs() < 1e-9);
            assert!((v_full.rho[k] - v_win.rho[k]).abs() < 1e-9);
        }
    }

    #[test]
    fn noise_term_bleeds_mass_out_of_the_prototypes() {
        let zs = [-0.1, 0.0, 0.1];
        let (mut tks, mut v) = simple_state(&zs);
        update(0.5, &mut tks, &mut v, 1.0 / 3.0, 0.5, false);
        let total: f64 = v.rho.iter().sum();
        assert!(total < 1.0);
        assert!(total > 0.0);
    }
}
