// crates/davz-core/src/clusterizer.rs

//! Top-level facade: run the cooling schedule and hand out clusters.
//!
//! `vertices` drives the whole anneal — initial temperature estimate,
//! cooling with merge/split moves, outlier-background ramp-up, purge, final
//! hardening — and ends with a hard assignment of tracks to the surviving
//! prototypes. `clusterize` additionally collapses output vertices closer
//! than twice the intrinsic vertex size into track groups.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::unwrap_used,
    clippy::expect_used
)]

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::anneal::{beta0, merge, purge, split, thermalize};
use crate::dump::dump;
use crate::params::{ClustererConfig, Params};
use crate::track::{BeamSpot, TrackRecord, TrackSet};
use crate::update::{eik, local_exp, update};
use crate::vertex::VertexSet;

/// Placeholder z variance attached to every emitted vertex; the clusterer
/// does not estimate position errors.
const PLACEHOLDER_ZZ_COV: f64 = 0.01;

/// One clustered vertex candidate: a z position plus the indices of the
/// input records assigned to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexCandidate {
    /// Cluster position along the beam axis.
    pub z: f64,
    /// Fixed placeholder variance of `z`.
    pub zz_cov: f64,
    /// Indices into the caller's record slice.
    pub tracks: Vec<usize>,
}

/// Deterministic-annealing clusterer in z.
///
/// A `DaClusterizer` is cheap to build and stateless between calls: each
/// [`Self::vertices`] invocation is a pure function of its inputs and the
/// configuration, so one instance may be shared freely across threads.
#[derive(Debug, Clone)]
pub struct DaClusterizer {
    p: Params,
}

impl DaClusterizer {
    /// Build a clusterer, clamping invalid configuration with a warning.
    #[must_use]
    pub fn new(cfg: &ClustererConfig) -> Self {
        Self { p: cfg.resolve() }
    }

    /// Cluster `records` into vertex candidates, ordered by z.
    #[must_use]
    pub fn vertices(&self, records: &[TrackRecord], beam: &BeamSpot) -> Vec<VertexCandidate> {
        let p = &self.p;

        let mut tks = TrackSet::fill(records, beam, p);
        if tks.is_empty() {
            return Vec::new();
        }
        let nt = tks.len();

        let mut rho0 = 0.0; // no outlier rejection while the structure forms

        // a single prototype at infinite temperature
        let mut v = VertexSet::default();
        v.add_item(0.0, 1.0);
        tks.clear_vtx_range(v.len());

        let mut beta = beta0(p, &tks, &mut v);
        debug!(beta, "initial inverse temperature");
        thermalize(p, beta, &mut tks, &mut v, p.delta_high_t, 0.0);

        // cool until T reaches t_min, growing structure on the way down
        let betafreeze = p.beta_max * p.cooling_factor.sqrt();
        while beta < betafreeze {
            update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
            while merge(p, &mut v, &mut tks, beta) {
                update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
            }
            split(p, beta, &mut tks, &mut v, 1.0);

            beta /= p.cooling_factor;
            tks.set_vtx_range(beta, &v, p);
            thermalize(p, beta, &mut tks, &mut v, p.delta_high_t, 0.0);
        }

        // last round of splitting, with the structure otherwise frozen
        tks.set_vtx_range(beta, &v, p);
        update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
        while merge(p, &mut v, &mut tks, beta) {
            tks.set_vtx_range(beta, &v, p);
            update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
        }
        let mut ntry = 0;
        let mut threshold = 1.0;
        while split(p, beta, &mut tks, &mut v, threshold) && ntry < 10 {
            ntry += 1;
            tks.set_vtx_range(beta, &v, p);
            thermalize(p, beta, &mut tks, &mut v, p.delta_high_t, 0.0);
            update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
            while merge(p, &mut v, &mut tks, beta) {
                update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, true);
            }
            // relax the gate to damp split/merge cycles of the same cluster
            threshold *= 1.1;
        }

        // adiabatic switch-on of the uniform outlier background
        if p.dz_cut_off > 0.0 {
            #[allow(clippy::cast_precision_loss)]
            {
                rho0 = 1.0 / nt as f64;
            }
            for a in 0..5_i32 {
                update(
                    beta,
                    &mut tks,
                    &mut v,
                    f64::from(a) * rho0 / 5.0,
                    p.dz_cut_off,
                    false,
                );
            }
        }
        thermalize(p, beta, &mut tks, &mut v, p.delta_low_t, rho0);

        // clusters split by outliers collapse again here
        while merge(p, &mut v, &mut tks, beta) {
            tks.set_vtx_range(beta, &v, p);
            update(beta, &mut tks, &mut v, rho0, p.dz_cut_off, false);
        }

        // descend to the purge temperature
        while beta < p.beta_purge {
            beta = (beta / p.cooling_factor).min(p.beta_purge);
            tks.set_vtx_range(beta, &v, p);
            thermalize(p, beta, &mut tks, &mut v, p.delta_low_t, rho0);
        }

        // drop prototypes with fewer than two unique tracks
        while purge(p, &mut v, &mut tks, rho0, beta) {
            thermalize(p, beta, &mut tks, &mut v, p.delta_low_t, rho0);
        }

        // extra cooling hardens the assignment without changing structure
        while beta < p.beta_stop {
            beta = (beta / p.cooling_factor).min(p.beta_stop);
            thermalize(p, beta, &mut tks, &mut v, p.delta_low_t, rho0);
        }

        if p.verbose {
            dump(p, beta, &v, &tks);
        }

        Self::assign(p, &mut tks, &mut v, beta, rho0)
    }

    /// Final hard assignment: recompute full partition sums (no windows) and
    /// attach each track to the first vertex, in z order, whose posterior
    /// clears `mintrkweight`.
    fn assign(
        p: &Params,
        tks: &mut TrackSet,
        v: &mut VertexSet,
        beta: f64,
        rho0: f64,
    ) -> Vec<VertexCandidate> {
        let nt = tks.len();
        let nv = v.len();

        // a prototype gone non-finite keeps its slot but attracts nothing
        for k in 0..nv {
            if !v.rho[k].is_finite() || !v.zvtx[k].is_finite() {
                v.rho[k] = 0.0;
                v.zvtx[k] = 0.0;
            }
        }

        let z_sum_init = rho0 * local_exp(-beta * p.dz_cut_off * p.dz_cut_off);
        for i in 0..nt {
            tks.z_sum[i] = z_sum_init;
        }
        for k in 0..nv {
            for i in 0..nt {
                tks.z_sum[i] +=
                    v.rho[k] * local_exp(-beta * eik(tks.zpca[i], v.zvtx[k], tks.dz2[i]));
            }
        }

        let mut clusters = Vec::with_capacity(nv);
        for k in 0..nv {
            let mut tracks = Vec::new();
            for i in 0..nt {
                if tks.z_sum[i] > 1e-100 {
                    let pik = v.rho[k]
                        * local_exp(-beta * eik(tks.zpca[i], v.zvtx[k], tks.dz2[i]))
                        / tks.z_sum[i];
                    if tks.tkwt[i] > 0.0 && pik > p.mintrkweight {
                        tracks.push(tks.handle[i]);
                        tks.z_sum[i] = 0.0; // a claimed track cannot be claimed twice
                    }
                }
            }
            clusters.push(VertexCandidate {
                z: v.zvtx[k],
                zz_cov: PLACEHOLDER_ZZ_COV,
                tracks,
            });
        }

        clusters
    }

    /// Cluster and collapse vertices closer than `2·vertex_size` into track
    /// groups. Single-track groups are suppressed, except the final one
    /// which is always emitted.
    #[must_use]
    pub fn clusterize(&self, records: &[TrackRecord], beam: &BeamSpot) -> Vec<Vec<usize>> {
        let pv = self.vertices(records, beam);
        debug!(n_vertices = pv.len(), "collapsing vertex candidates");

        let mut groups: Vec<Vec<usize>> = Vec::new();
        if pv.is_empty() {
            return groups;
        }

        let mut current: Vec<usize> = pv[0].tracks.clone();
        for pair in pv.windows(2) {
            let (prev, vtx) = (&pair[0], &pair[1]);
            if (vtx.z - prev.z).abs() > 2.0 * self.p.vertex_size {
                // close the open group
                if current.len() > 1 {
                    groups.push(std::mem::take(&mut current));
                } else {
                    debug!(z = prev.z, "suppressing single-track group");
                    current.clear();
                }
            }
            current.extend_from_slice(&vtx.tracks);
        }
        groups.push(current);

        groups
    }
}
