// crates/davz-core/src/vertex.rs

//! The ordered set of vertex prototypes and their per-pass aggregates.
//!
//! Prototypes are kept sorted by z at all times; splits insert in place and
//! merges/purges remove in place, and both fix up every track's active
//! window so the half-open `[kmin, kmax)` ranges stay valid across the
//! index shift.

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

/// Structure-of-arrays vertex store. All vectors share length nv.
#[derive(Debug, Default, Clone)]
pub(crate) struct VertexSet {
    /// Prototype position, ascending.
    pub zvtx: Vec<f64>,
    /// Prototype mass; sums to 1 under normalization.
    pub rho: Vec<f64>,
    /// −β·dz2·(z−zvtx)² for the track currently being accumulated (scratch).
    pub exp_arg: Vec<f64>,
    /// exp(exp_arg) (scratch).
    pub exp: Vec<f64>,
    /// Σ exp·tkwt/Z per vertex (scratch).
    pub se: Vec<f64>,
    /// Σ responsibility·dz2 per vertex (scratch).
    pub sw: Vec<f64>,
    /// Σ responsibility·dz2·z per vertex (scratch).
    pub swz: Vec<f64>,
    /// Heat-capacity numerator Σ w·E per vertex (scratch, Tc passes only).
    pub swe: Vec<f64>,
}

impl VertexSet {
    #[inline]
    pub fn len(&self) -> usize {
        self.zvtx.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.zvtx.is_empty()
    }

    /// Append a prototype. The caller is responsible for z ordering.
    pub fn add_item(&mut self, z: f64, rho: f64) {
        debug_assert!(
            self.zvtx.last().map_or(true, |&last| last <= z),
            "appended prototype breaks z ordering"
        );
        self.zvtx.push(z);
        self.rho.push(rho);
        self.exp_arg.push(0.0);
        self.exp.push(0.0);
        self.se.push(0.0);
        self.sw.push(0.0);
        self.swz.push(0.0);
        self.swe.push(0.0);
    }

    /// Insert a prototype before `k`, shifting the tail right.
    ///
    /// Track windows whose end sits at or beyond `k` grow by one so the new
    /// prototype is immediately visible to the tracks around it; windows
    /// entirely to the right shift with the indices.
    pub fn insert_item(&mut self, k: usize, z: f64, rho: f64, tks: &mut TrackSet) {
        debug_assert!(k == 0 || self.zvtx[k - 1] <= z, "insert breaks z ordering");
        debug_assert!(k >= self.len() || z <= self.zvtx[k], "insert breaks z ordering");

        self.zvtx.insert(k, z);
        self.rho.insert(k, rho);
        self.exp_arg.insert(k, 0.0);
        self.exp.insert(k, 0.0);
        self.se.insert(k, 0.0);
        self.sw.insert(k, 0.0);
        self.swz.insert(k, 0.0);
        self.swe.insert(k, 0.0);

        let k_u = u32::try_from(k).unwrap_or(u32::MAX);
        for i in 0..tks.len() {
            if tks.kmin[i] > k_u {
                tks.kmin[i] += 1;
            }
            if tks.kmax[i] >= k_u || tks.kmax[i] == tks.kmin[i] {
                tks.kmax[i] += 1;
            }
        }
    }

    /// Remove prototype `k`, shifting the tail left.
    ///
    /// Windows shrink with the indices; a window that collapses onto the
    /// removed slot is moved one step left (or reopened over `[0, 1)` at the
    /// left edge) so `kmin < kmax` keeps holding.
    pub fn remove_item(&mut self, k: usize, tks: &mut TrackSet) {
        self.zvtx.remove(k);
        self.rho.remove(k);
        self.exp_arg.remove(k);
        self.exp.remove(k);
        self.se.remove(k);
        self.sw.remove(k);
        self.swz.remove(k);
        self.swe.remove(k);

        let k_u = u32::try_from(k).unwrap_or(u32::MAX);
        for i in 0..tks.len() {
            if tks.kmax[i] > k_u {
                tks.kmax[i] -= 1;
            }
            if tks.kmin[i] > k_u || (tks.kmax[i] < tks.kmin[i] + 1 && tks.kmin[i] > 0) {
                tks.kmin[i] -= 1;
            }
            if tks.kmax[i] == tks.kmin[i] {
                tks.kmax[i] += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_vertices() -> VertexSet {
        let mut v = VertexSet::default();
        v.add_item(-1.0, 0.3);
        v.add_item(0.0, 0.4);
        v.add_item(1.0, 0.3);
        v
    }

    fn tracks_with_windows(windows: &[(u32, u32)]) -> TrackSet {
        let mut tks = TrackSet::default();
        for (i, &(lo, hi)) in windows.iter().enumerate() {
            tks.add_item_sorted(i as f64, 1.0, i, 1.0);
            let at = tks.len() - 1;
            tks.kmin[at] = lo;
            tks.kmax[at] = hi;
        }
        tks
    }

    #[test]
    fn insert_keeps_windows_valid() {
        let mut v = three_vertices();
        // windows: left of, containing, and right of the insertion point
        let mut tks = tracks_with_windows(&[(0, 1), (1, 2), (2, 3)]);
        v.insert_item(1, -0.5, 0.1, &mut tks);

        assert_eq!(v.len(), 4);
        assert!(v.zvtx.windows(2).all(|w| w[0] <= w[1]));
        for i in 0..tks.len() {
            assert!(tks.kmin[i] < tks.kmax[i]);
            assert!(tks.kmax[i] as usize <= v.len());
        }
        // the shifted old vertex 1 is still inside the middle track's window
        assert!(tks.kmin[1] <= 2 && tks.kmax[1] > 2);
    }

    #[test]
    fn remove_keeps_windows_valid() {
        let mut v = three_vertices();
        let mut tks = tracks_with_windows(&[(0, 1), (1, 2), (2, 3), (0, 3)]);
        v.remove_item(1, &mut tks);

        assert_eq!(v.len(), 2);
        for i in 0..tks.len() {
            assert!(tks.kmin[i] < tks.kmax[i], "track {i} window collapsed");
            assert!(tks.kmax[i] as usize <= v.len());
        }
    }

    #[test]
    fn remove_leftmost_reopens_left_edge_window() {
        let mut v = three_vertices();
        let mut tks = tracks_with_windows(&[(0, 1)]);
        v.remove_item(0, &mut tks);
        assert_eq!((tks.kmin[0], tks.kmax[0]), (0, 1));
    }

    #[test]
    fn scratch_stays_in_step_with_positions() {
        let mut v = three_vertices();
        let mut tks = TrackSet::default();
        v.insert_item(2, 0.5, 0.2, &mut tks);
        assert_eq!(v.rho.len(), v.len());
        assert_eq!(v.swe.len(), v.len());
        v.remove_item(0, &mut tks);
        assert_eq!(v.exp.len(), v.len());
        assert_eq!(v.sw.len(), v.len());
    }
}
