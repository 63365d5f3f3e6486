// crates/davz-core/src/dump.rs

//! Diagnostic vertex-table dump, gated by the `verbose` config flag.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use tracing::debug;

use crate::params::Params;
use crate::track::TrackSet;
use crate::vertex::VertexSet;

/// Log every prototype inside the dump window (position, mass, critical
/// temperature) and the tracks around it. Diagnostic only; no effect on
/// results.
pub(crate) fn dump(p: &Params, beta: f64, v: &VertexSet, tks: &TrackSet) {
    debug!(
        nv = v.len(),
        nt = tks.len(),
        t = 1.0 / beta,
        t_min = 1.0 / p.beta_max,
        "vertex dump"
    );

    for k in 0..v.len() {
        if (v.zvtx[k] - p.zdump_center).abs() > p.zdump_width {
            continue;
        }
        let tc = 2.0 * v.swe[k] / v.sw[k];
        debug!(k, z = v.zvtx[k], rho = v.rho[k], tc, "prototype");
    }

    for i in 0..tks.len() {
        if (tks.zpca[i] - p.zdump_center).abs() > p.zdump_width {
            continue;
        }
        debug!(
            i,
            z = tks.zpca[i],
            sigma = (1.0 / tks.dz2[i]).sqrt(),
            tkwt = tks.tkwt[i],
            kmin = tks.kmin[i],
            kmax = tks.kmax[i],
            "track"
        );
    }
}
