//! # Scalar astrometric accessors
//!
//! Pure functions turning catalog values into derived quantities. Inputs follow the Gaia
//! catalog units: parallax in mas, proper motions in mas/yr, magnitudes in mag. Physically
//! undefined inputs (non-positive parallax, `NaN`) give `NaN`, never an error, so the
//! functions stay total over a batch of rows.
//!
//! Uncertainties are propagated to first order: `σ² = J Σ Jᵀ` with `J` the Jacobian at the
//! measured values. This is exact only where the transform is locally linear; for
//! parallaxes with a large relative error the propagated error understates the true spread.
use nalgebra::{Matrix3, RowVector3};

use crate::constants::{KmPerSec, Magnitude, MasPerYear, MilliArcSec, Parsec, K_VTAN, MAS_PARSEC};

/// A derived value with its first-order propagated standard error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropagatedValue {
    pub value: f64,
    pub error: f64,
}

impl PropagatedValue {
    pub const NAN: PropagatedValue = PropagatedValue {
        value: f64::NAN,
        error: f64::NAN,
    };
}

/// Parallax as a usable inverse distance; `None` when it is not strictly positive.
fn usable(parallax: MilliArcSec) -> Option<MilliArcSec> {
    (parallax > 0.0).then_some(parallax)
}

/// Tangential speed `K · μ / ϖ` in km/s, `μ = hypot(μα*, μδ)`. `NaN` for `ϖ ≤ 0`.
pub fn tangential_speed(parallax: MilliArcSec, pmra: MasPerYear, pmdec: MasPerYear) -> KmPerSec {
    match usable(parallax) {
        Some(plx) => K_VTAN * pmra.hypot(pmdec) / plx,
        None => f64::NAN,
    }
}

/// Tangential velocity and its propagated error.
///
/// Arguments
/// -----------------
/// * `parallax`: ϖ in mas.
/// * `pmra`, `pmdec`: μα* and μδ in mas/yr.
/// * `cov`: covariance of `(ϖ, μα*, μδ)`, in that order.
///
/// Return
/// ----------
/// * `v = K · μ / ϖ` in km/s with `σ_v = sqrt(J Σ Jᵀ)`,
///   `J = K · (−μ/ϖ², μα*/(μ ϖ), μδ/(μ ϖ))`. At zero proper motion the motion terms of `J`
///   are taken as zero. Both fields are `NaN` for `ϖ ≤ 0`.
pub fn tangential_velocity(
    parallax: MilliArcSec,
    pmra: MasPerYear,
    pmdec: MasPerYear,
    cov: &Matrix3<f64>,
) -> PropagatedValue {
    let Some(plx) = usable(parallax) else {
        return PropagatedValue::NAN;
    };
    let mu = pmra.hypot(pmdec);
    let value = K_VTAN * mu / plx;

    let (d_pmra, d_pmdec) = if mu > 0.0 {
        (K_VTAN * pmra / (mu * plx), K_VTAN * pmdec / (mu * plx))
    } else {
        (0.0, 0.0)
    };
    let jacobian = RowVector3::new(-value / plx, d_pmra, d_pmdec);
    let variance = (jacobian * cov * jacobian.transpose())[(0, 0)];

    PropagatedValue {
        value,
        error: variance.sqrt(),
    }
}

/// Tangential velocity components `(vα, vδ) = K · (μα*, μδ) / ϖ` in km/s.
pub fn velocity_components(
    parallax: MilliArcSec,
    pmra: MasPerYear,
    pmdec: MasPerYear,
) -> (KmPerSec, KmPerSec) {
    match usable(parallax) {
        Some(plx) => (K_VTAN * pmra / plx, K_VTAN * pmdec / plx),
        None => (f64::NAN, f64::NAN),
    }
}

/// Errors of [`velocity_components`], ignoring correlations:
/// `σ_vα = K · hypot(σ_μα / ϖ, σ_ϖ · μα / ϖ²)`, likewise for δ.
pub fn velocity_component_errors(
    parallax: MilliArcSec,
    pmra: MasPerYear,
    pmdec: MasPerYear,
    parallax_error: MilliArcSec,
    pmra_error: MasPerYear,
    pmdec_error: MasPerYear,
) -> (KmPerSec, KmPerSec) {
    let Some(plx) = usable(parallax) else {
        return (f64::NAN, f64::NAN);
    };
    let component = |pm: f64, pm_error: f64| {
        K_VTAN * (pm_error / plx).hypot(parallax_error * pm / (plx * plx))
    };
    (component(pmra, pmra_error), component(pmdec, pmdec_error))
}

/// Distance `1000 / ϖ` in parsecs. `NaN` for `ϖ ≤ 0`.
pub fn distance(parallax: MilliArcSec) -> Parsec {
    usable(parallax).map_or(f64::NAN, |plx| MAS_PARSEC / plx)
}

/// Distance modulus `5 log10(1000 / ϖ) − 5`. `NaN` for `ϖ ≤ 0`.
pub fn distance_modulus(parallax: MilliArcSec) -> Magnitude {
    5.0 * distance(parallax).log10() - 5.0
}

/// Absolute magnitude `m − μ` with `μ` the distance modulus.
pub fn absolute_magnitude(apparent: Magnitude, parallax: MilliArcSec) -> Magnitude {
    apparent - distance_modulus(parallax)
}

/// Lower and upper error bars of an extinction estimate published as percentiles.
pub fn extinction_errors(value: Magnitude, lower: Magnitude, upper: Magnitude) -> (Magnitude, Magnitude) {
    (value - lower, upper - value)
}

/// Whether the BP/RP flux excess lies within the band expected for a well-measured source:
/// `1 + 0.015 c² < E < 1.3 + 0.06 c²` with `c` the BP−RP colour.
///
/// Any `NaN` input gives `false`.
pub fn good_photometry(excess_factor: f64, bp_rp: Magnitude) -> bool {
    let c2 = bp_rp * bp_rp;
    excess_factor > 1.0 + 0.015 * c2 && excess_factor < 1.3 + 0.06 * c2
}
