// crates/davz-core/src/track.rs

//! Input records and the immutable-after-fill track store.
//!
//! [`TrackSet`] is a structure-of-arrays: the per-track constants (z, 1/σ²,
//! prior weight, caller handle) are filled once and never touched again,
//! while the per-track scratch (partition sum, active vertex window) is
//! mutated throughout the annealing run. Keeping each quantity in its own
//! contiguous `Vec` lets the inner kernels auto-vectorize.

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
use tracing::{trace, warn};

use crate::params::Params;
use crate::update::local_exp;
use crate::vertex::VertexSet;

/// One reconstructed track as seen by the clusterer.
///
/// Callers keep ownership of their own track objects; the clusterer only
/// ever refers back to them by index into the record slice.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Reconstruction validity flag; invalid records are skipped at fill.
    pub valid: bool,
    /// Longitudinal coordinate at the point of closest approach.
    pub z_pca: f64,
    /// σ_z of the track measurement.
    pub dz_error: f64,
    /// Momentum components, used to project the beam width onto z.
    pub px: f64,
    /// See `px`.
    pub py: f64,
    /// See `px`.
    pub pz: f64,
    /// Transverse impact parameter (the error includes the beam spot).
    pub ip_value: f64,
    /// Error on `ip_value`.
    pub ip_error: f64,
}

impl TrackRecord {
    /// A prompt track at `z_pca` with resolution `dz_error`, flying
    /// transverse to the beam so the beam-spot projection vanishes.
    #[must_use]
    pub fn at(z_pca: f64, dz_error: f64) -> Self {
        Self {
            valid: true,
            z_pca,
            dz_error,
            px: 1.0,
            py: 0.0,
            pz: 0.0,
            ip_value: 0.0,
            ip_error: 1.0,
        }
    }
}

/// Transverse beam profile used to project the beam width onto z.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BeamSpot {
    /// Beam width along x.
    pub width_x: f64,
    /// Beam width along y.
    pub width_y: f64,
}

/// Structure-of-arrays track store.
#[derive(Debug, Default, Clone)]
pub(crate) struct TrackSet {
    /// z at the point of closest approach, ascending.
    pub zpca: Vec<f64>,
    /// Inverse variance 1/σ²_z including beam spot and resolution floor.
    pub dz2: Vec<f64>,
    /// Prior track weight in (0,1].
    pub tkwt: Vec<f64>,
    /// Index of the originating record in the caller's slice.
    pub handle: Vec<usize>,
    /// Partition sum over the active window (scratch).
    pub z_sum: Vec<f64>,
    /// Active vertex window, half-open `[kmin, kmax)` (scratch).
    pub kmin: Vec<u32>,
    /// See `kmin`.
    pub kmax: Vec<u32>,
}

impl TrackSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.zpca.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.zpca.is_empty()
    }

    /// Insert keeping `zpca` ascending. O(n) shift; n is small.
    pub fn add_item_sorted(&mut self, z: f64, dz2: f64, handle: usize, tkwt: f64) {
        let at = self.zpca.partition_point(|&x| x <= z);
        self.zpca.insert(at, z);
        self.dz2.insert(at, dz2);
        self.tkwt.insert(at, tkwt);
        self.handle.insert(at, handle);
        self.z_sum.insert(at, 1.0);
        self.kmin.insert(at, 0);
        self.kmax.insert(at, 1);
    }

    /// Prepare the track store from caller records.
    ///
    /// Rejection rules, applied per record:
    /// - invalid records,
    /// - |z| beyond 1000,
    /// - non-finite or sub-normal combined inverse variance,
    /// - non-finite or vanishing prior weight under the IP cut.
    pub fn fill(records: &[TrackRecord], beam: &BeamSpot, p: &Params) -> Self {
        let mut tks = Self::default();
        for (i, r) in records.iter().enumerate() {
            if !r.valid {
                continue;
            }
            if r.z_pca.abs() > 1000.0 {
                continue;
            }

            let perp2 = r.px * r.px + r.py * r.py;
            let beam_proj = (beam.width_x * beam.width_x * r.px * r.px
                + beam.width_y * beam.width_y * r.py * r.py)
                * r.pz
                * r.pz
                / (perp2 * perp2);
            let dz2 = 1.0 / (r.dz_error * r.dz_error + beam_proj + p.vertex_size * p.vertex_size);
            if !dz2.is_finite() || dz2 < f64::MIN_POSITIVE {
                continue;
            }

            let mut tkwt = 1.0;
            if p.d0_cut_off > 0.0 {
                let sig = r.ip_value / r.ip_error;
                // down-weight displaced tracks; usually stays > 0.99
                tkwt = 1.0 / (1.0 + local_exp(sig * sig - p.d0_cut_off * p.d0_cut_off));
                if !tkwt.is_finite() || tkwt < f64::EPSILON {
                    continue;
                }
            }

            trace!(z = r.z_pca, dz2, tkwt, "accepted track");
            tks.add_item_sorted(r.z_pca, dz2, i, tkwt);
        }
        tks
    }

    /// Narrow each track's candidate window to the vertices within
    /// `max(sel_zrange/√(β·dz2), zrange_min)` of its z.
    ///
    /// Both edges walk from their previous position, so refreshes get
    /// cheaper as β grows and the windows shrink monotonically.
    pub fn set_vtx_range(&mut self, beta: f64, v: &VertexSet, p: &Params) {
        if v.is_empty() {
            warn!("empty vertex set in set_vtx_range");
            return;
        }
        let nv = v.len();
        let nv_u = u32::try_from(nv).unwrap_or(u32::MAX);

        for i in 0..self.len() {
            let zrange = (p.sel_zrange / (beta * self.dz2[i]).sqrt()).max(p.zrange_min);

            // smallest vertex index with zvtx > zpca - zrange
            let zmin = self.zpca[i] - zrange;
            let mut kmin = self.kmin[i].min(nv_u - 1) as usize;
            if v.zvtx[kmin] > zmin {
                while kmin > 0 && v.zvtx[kmin - 1] > zmin {
                    kmin -= 1;
                }
            } else {
                while kmin < nv - 1 && v.zvtx[kmin] < zmin {
                    kmin += 1;
                }
            }

            // largest vertex index with zvtx < zpca + zrange; the stored
            // bound is one past it
            let zmax = self.zpca[i] + zrange;
            let mut kmax = self.kmax[i].saturating_sub(1).min(nv_u - 1) as usize;
            if v.zvtx[kmax] < zmax {
                while kmax < nv - 1 && v.zvtx[kmax + 1] < zmax {
                    kmax += 1;
                }
            } else {
                while kmax > 0 && v.zvtx[kmax] > zmax {
                    kmax -= 1;
                }
            }

            if kmin <= kmax {
                self.kmin[i] = kmin as u32;
                self.kmax[i] = kmax as u32 + 1;
            } else {
                // the walks crossed; keep a single-vertex window
                self.kmin[i] = kmin.min(kmax) as u32;
                self.kmax[i] = (kmin.max(kmax) as u32 + 1).min(nv_u);
            }
        }
    }

    /// Reset every window to the full vertex list.
    pub fn clear_vtx_range(&mut self, nv: usize) {
        let nv_u = u32::try_from(nv).unwrap_or(u32::MAX);
        for i in 0..self.len() {
            self.kmin[i] = 0;
            self.kmax[i] = nv_u;
        }
    }
}
