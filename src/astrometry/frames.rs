//! # Cartesian phase-space coordinates
//!
//! Converts a catalog astrometric solution `(α, δ, ϖ, μα*, μδ, v_r)` to a heliocentric
//! Cartesian position in parsecs and, when the proper motions and the radial velocity are
//! all present, a velocity in km/s:
//!
//! ```text
//! d = 1000 / ϖ
//! r = d · r̂,            r̂ = (cos δ cos α, cos δ sin α, sin δ)
//! v = v_r · r̂ + vα · p̂ + vδ · q̂
//!     p̂ = (−sin α, cos α, 0),  q̂ = (−sin δ cos α, −sin δ sin α, cos δ)
//!     vα = K μα* / ϖ,          vδ = K μδ / ϖ
//! ```
//!
//! The covariance of the inputs is carried through the Jacobian of this map (`J Σ Jᵀ`).
//! Input angles are in degrees but their errors are in mas, as published by the
//! catalog. The right-ascension error is σα* = σα · cos δ, so the Jacobian is taken with
//! respect to α* = α cos δ. The propagation is first order and degrades with the relative
//! parallax error.
use nalgebra::{DMatrix, Matrix3, Vector3};

use crate::astrometry::covariance::{AstrometricParam, CovarianceBuilder, CovarianceMatrix};
use crate::constants::{
    Degree, KmPerSec, MasPerYear, MilliArcSec, ICRS_TO_GALACTIC, K_VTAN, MAS_PARSEC, RADEG,
    RADMAS,
};
use crate::table::SourceRow;
use crate::tap_errors::TapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceFrame {
    Icrs,
    Galactic,
}

/// Position (pc), optional velocity (km/s) and their joint covariance.
///
/// `covariance` is 6×6 (`x, y, z, vx, vy, vz`) when `velocity` is present, 3×3 otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct CartesianState {
    pub frame: ReferenceFrame,
    pub position: Vector3<f64>,
    pub velocity: Option<Vector3<f64>>,
    pub covariance: CovarianceMatrix,
}

fn icrs_to_galactic() -> Matrix3<f64> {
    let r = ICRS_TO_GALACTIC;
    Matrix3::new(
        r[0][0], r[0][1], r[0][2], r[1][0], r[1][1], r[1][2], r[2][0], r[2][1], r[2][2],
    )
}

/// Heliocentric ICRS Cartesian state of one source.
///
/// Arguments
/// -----------------
/// * `ra`, `dec`: position in degrees.
/// * `parallax`: ϖ in mas.
/// * `pmra`, `pmdec`, `radial_velocity`: velocity inputs in mas/yr and km/s. The velocity is
///   computed only when all three are given.
/// * `covariance`: covariance of `(α*, δ, ϖ, μα*, μδ, v_r)` with angle errors in mas, where
///   the first entry is the catalog `ra_error` (already multiplied by cos δ). Only the
///   leading 3×3 block is read when no velocity is computed.
///
/// Return
/// ----------
/// * The state, with `NaN` coordinates for `ϖ ≤ 0`.
///
/// Errors
/// ----------
/// * [`TapError::InvalidCovariance`] when `covariance` is smaller than the inputs used.
pub fn icrs_frame(
    ra: Degree,
    dec: Degree,
    parallax: MilliArcSec,
    pmra: Option<MasPerYear>,
    pmdec: Option<MasPerYear>,
    radial_velocity: Option<KmPerSec>,
    covariance: &CovarianceMatrix,
) -> Result<CartesianState, TapError> {
    let motion = match (pmra, pmdec, radial_velocity) {
        (Some(a), Some(d), Some(v)) => Some((a, d, v)),
        _ => None,
    };
    let dim = if motion.is_some() { 6 } else { 3 };
    if covariance.nrows() < dim || covariance.ncols() < dim {
        return Err(TapError::InvalidCovariance(format!(
            "expected at least {dim}×{dim}, got {}×{}",
            covariance.nrows(),
            covariance.ncols()
        )));
    }
    let sigma = covariance.view((0, 0), (dim, dim));

    let plx = if parallax > 0.0 { parallax } else { f64::NAN };
    let d = MAS_PARSEC / plx;
    let (sa, ca) = (ra * RADEG).sin_cos();
    let (sd, cd) = (dec * RADEG).sin_cos();
    let r_hat = Vector3::new(cd * ca, cd * sa, sd);
    let p_hat = Vector3::new(-sa, ca, 0.0);
    let q_hat = Vector3::new(-sd * ca, -sd * sa, cd);

    let mut jacobian = DMatrix::<f64>::zeros(dim, dim);
    // position rows; angle columns per mas of α* and δ
    jacobian
        .view_mut((0, 0), (3, 1))
        .copy_from(&(p_hat * (d * RADMAS)));
    jacobian
        .view_mut((0, 1), (3, 1))
        .copy_from(&(q_hat * (d * RADMAS)));
    jacobian
        .view_mut((0, 2), (3, 1))
        .copy_from(&(r_hat * (-d / plx)));

    let velocity = motion.map(|(mu_a, mu_d, vr)| {
        let (va, vd) = (K_VTAN * mu_a / plx, K_VTAN * mu_d / plx);
        // ∂v/∂α, then per unit of α* = α cos δ
        let d_alpha = (p_hat * (vr * cd - vd * sd) - Vector3::new(ca, sa, 0.0) * va) / cd;
        let d_delta = q_hat * vr - r_hat * vd;
        let columns = [
            d_alpha * RADMAS,
            d_delta * RADMAS,
            -(p_hat * va + q_hat * vd) / plx,
            p_hat * (K_VTAN / plx),
            q_hat * (K_VTAN / plx),
            r_hat,
        ];
        for (k, column) in columns.iter().enumerate() {
            jacobian.view_mut((3, k), (3, 1)).copy_from(column);
        }
        r_hat * vr + p_hat * va + q_hat * vd
    });

    let covariance = &jacobian * sigma * jacobian.transpose();
    Ok(CartesianState {
        frame: ReferenceFrame::Icrs,
        position: r_hat * d,
        velocity,
        covariance,
    })
}

/// [`icrs_frame`] over the catalog columns of one row.
///
/// The velocity is computed when the row has `pmra`, `pmdec` and `radial_velocity`
/// columns; the covariance is built from the matching error and correlation columns.
pub fn icrs_frame_from_row(row: &SourceRow<'_>) -> Result<CartesianState, TapError> {
    use AstrometricParam::*;

    let has_motion = [Pmra, Pmdec, RadialVelocity]
        .iter()
        .all(|p| row.value(p.column()).is_some());
    let params: &[AstrometricParam] = if has_motion {
        &AstrometricParam::ALL
    } else {
        &[Ra, Dec, Parallax]
    };
    let covariance = CovarianceBuilder::new(params).build(row)?;
    let motion = |p: AstrometricParam| if has_motion { row.opt_f64(p.column()) } else { None };

    icrs_frame(
        row.f64("ra")?,
        row.f64("dec")?,
        row.f64("parallax")?,
        motion(Pmra),
        motion(Pmdec),
        motion(RadialVelocity),
        &covariance,
    )
}

impl CartesianState {
    /// The same state in Galactic coordinates. A Galactic state is returned unchanged.
    pub fn to_galactic(&self) -> CartesianState {
        if self.frame == ReferenceFrame::Galactic {
            return self.clone();
        }
        let rot = icrs_to_galactic();
        let dim = self.covariance.nrows();
        let mut block = DMatrix::<f64>::zeros(dim, dim);
        for offset in (0..dim).step_by(3) {
            block.view_mut((offset, offset), (3, 3)).copy_from(&rot);
        }
        CartesianState {
            frame: ReferenceFrame::Galactic,
            position: rot * self.position,
            velocity: self.velocity.map(|v| rot * v),
            covariance: &block * &self.covariance * block.transpose(),
        }
    }

    /// Distance from the origin in parsecs.
    pub fn distance(&self) -> f64 {
        self.position.norm()
    }
}
