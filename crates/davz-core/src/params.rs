// crates/davz-core/src/params.rs

//! Clusterer configuration and the resolved annealing schedule.
//!
//! The user-facing [`ClustererConfig`] deserializes from JSON with every
//! field optional (defaults mirror the production tuning). Invalid values
//! are clamped with a warning rather than rejected; `resolve()` turns the
//! temperature bounds into the inverse-temperature schedule the engine runs.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// User-facing configuration knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClustererConfig {
    /// Lower annealing temperature bound; the engine anneals down to
    /// `T = t_min` before freezing the number of prototypes.
    pub t_min: f64,
    /// Temperature at which under-supported prototypes are purged
    /// (clamped to ≤ `t_min`).
    pub t_purge: f64,
    /// Final cooling target that hardens the assignment (clamped to
    /// ≤ `t_purge` and, when invalid, to ≥ 1).
    pub t_stop: f64,
    /// Intrinsic resolution floor added in quadrature to the per-track
    /// σ_z; also the merge gap used by `clusterize`.
    pub vertex_size: f64,
    /// Multiplicative cooling step per iteration, in (0,1).
    pub cooling_factor: f64,
    /// Logistic cutoff on the transverse-IP significance used to down-weight
    /// displaced tracks; disabled if ≤ 0.
    pub d0_cut_off: f64,
    /// Width of the uniform noise background absorbing outliers;
    /// disabled if ≤ 0.
    pub dz_cut_off: f64,
    /// Fraction of the maximal posterior above which a track counts as
    /// unique to a prototype, in (0,1].
    pub uniquetrkweight: f64,
    /// Maximum Δz between adjacent merge candidates.
    pub zmerge: f64,
    /// Scale of the per-track active vertex window.
    pub zrange: f64,
    /// Thermalization tolerance policy: 0 = fixed, 1 = β-scaled.
    pub convergence_mode: i32,
    /// Convergence tolerance for low-temperature thermalization.
    pub delta_low_t: f64,
    /// Convergence tolerance during annealing.
    pub delta_high_t: f64,
    /// Iteration cap for a single thermalization.
    pub max_iterations: u32,
    /// Minimum posterior for a track to be attached to an output vertex.
    pub mintrkweight: f64,
    /// Floor of the active-window half width.
    pub zrange_min: f64,
    /// Emit a vertex-table dump through `tracing::debug!`.
    pub verbose: bool,
    /// Center of the dump window.
    pub zdump_center: f64,
    /// Half width of the dump window.
    pub zdump_width: f64,
}

impl Default for ClustererConfig {
    fn default() -> Self {
        Self {
            t_min: 2.0,
            t_purge: 2.0,
            t_stop: 0.5,
            vertex_size: 0.006,
            cooling_factor: 0.6,
            d0_cut_off: 3.0,
            dz_cut_off: 3.0,
            uniquetrkweight: 0.8,
            zmerge: 0.01,
            zrange: 4.0,
            convergence_mode: 0,
            delta_low_t: 1e-3,
            delta_high_t: 1e-2,
            max_iterations: 1000,
            mintrkweight: 0.5,
            zrange_min: 0.1,
            verbose: false,
            zdump_center: 0.0,
            zdump_width: 20.0,
        }
    }
}

/// Resolved parameter set used by the engine (temperatures inverted).
#[derive(Debug, Clone)]
pub(crate) struct Params {
    pub beta_max: f64,
    pub beta_purge: f64,
    pub beta_stop: f64,
    pub vertex_size: f64,
    pub cooling_factor: f64,
    pub d0_cut_off: f64,
    pub dz_cut_off: f64,
    pub uniquetrkweight: f64,
    pub zmerge: f64,
    pub sel_zrange: f64,
    pub convergence_mode: i32,
    pub delta_low_t: f64,
    pub delta_high_t: f64,
    pub max_iterations: u32,
    pub mintrkweight: f64,
    pub zrange_min: f64,
    pub verbose: bool,
    pub zdump_center: f64,
    pub zdump_width: f64,
}

impl ClustererConfig {
    /// Resolve the schedule, clamping invalid values with a warning.
    pub(crate) fn resolve(&self) -> Params {
        let mut convergence_mode = self.convergence_mode;
        if !(0..=1).contains(&convergence_mode) {
            warn!(convergence_mode, "invalid convergence_mode, reset to 0");
            convergence_mode = 0;
        }

        let beta_max = if self.t_min == 0.0 {
            warn!(t_min = self.t_min, "invalid t_min, reset to 1.0");
            1.0
        } else {
            1.0 / self.t_min
        };
        let t_min = 1.0 / beta_max;

        let mut t_purge = self.t_purge;
        if t_purge > t_min || t_purge == 0.0 {
            warn!(t_purge, t_min, "invalid t_purge, set to t_min");
            t_purge = t_min;
        }
        let beta_purge = 1.0 / t_purge;

        let mut t_stop = self.t_stop;
        if t_stop > t_purge || t_stop == 0.0 {
            warn!(t_stop, t_purge, "invalid t_stop, set to max(1, t_purge)");
            t_stop = 1.0_f64.max(t_purge);
        }
        let beta_stop = 1.0 / t_stop;

        Params {
            beta_max,
            beta_purge,
            beta_stop,
            vertex_size: self.vertex_size,
            cooling_factor: self.cooling_factor,
            d0_cut_off: self.d0_cut_off,
            dz_cut_off: self.dz_cut_off,
            uniquetrkweight: self.uniquetrkweight,
            zmerge: self.zmerge,
            sel_zrange: self.zrange,
            convergence_mode,
            delta_low_t: self.delta_low_t,
            delta_high_t: self.delta_high_t,
            max_iterations: self.max_iterations,
            mintrkweight: self.mintrkweight,
            zrange_min: self.zrange_min,
            verbose: self.verbose,
            zdump_center: self.zdump_center,
            zdump_width: self.zdump_width,
        }
    }
}
