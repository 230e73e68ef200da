//! # Unit weight error and its renormalisation
//!
//! The unit weight error of a five-parameter astrometric solution is
//!
//! ```text
//! UWE = sqrt(χ² / (N − 5))
//! ```
//!
//! with `χ²` the along-scan chi-square and `N` the number of good along-scan observations.
//! Its expected value depends on magnitude and colour, so it is divided by a reference
//! value `u0(G, BP−RP)` read from a published lookup table to give the RUWE.
//!
//! ## Interpolation
//!
//! * Colour grid: regular in `(G, BP−RP)`, interpolated bilinearly.
//! * Magnitude curve: `u0(G)` for sources without a colour, interpolated linearly.
//!
//! A point outside the grid gives `NaN`; there is no extrapolation.
//!
//! ## File format
//!
//! CSV with a header line: `g_mag,bp_rp,u0` for the colour grid, `g_mag,u0` for the
//! magnitude curve.
use std::fs::File;
use std::io::Read;

use camino::Utf8Path;
use serde::Deserialize;

use crate::constants::{Magnitude, N_ASTROMETRIC_PARAMS};
use crate::tap_errors::TapError;

/// `sqrt(χ² / (N − 5))`; `NaN` when `N ≤ 5`.
pub fn unit_weight_error(chi2: f64, n_good_obs: f64) -> f64 {
    if n_good_obs > N_ASTROMETRIC_PARAMS {
        (chi2 / (n_good_obs - N_ASTROMETRIC_PARAMS)).sqrt()
    } else {
        f64::NAN
    }
}

/// `UWE / u0(G, BP−RP)`. A `NaN` colour selects the magnitude-only curve.
pub fn renormalized_unit_weight_error(
    chi2: f64,
    n_good_obs: f64,
    g_mag: Magnitude,
    bp_rp: Magnitude,
    normalization: &RuweNormalization,
) -> f64 {
    unit_weight_error(chi2, n_good_obs) / normalization.u0(g_mag, bp_rp)
}

#[derive(Debug, Deserialize)]
struct ColourRecord {
    g_mag: f64,
    bp_rp: f64,
    u0: f64,
}

#[derive(Debug, Deserialize)]
struct MagnitudeRecord {
    g_mag: f64,
    u0: f64,
}

fn invalid(reason: impl Into<String>) -> TapError {
    TapError::InvalidConfig(format!("RUWE normalisation table: {}", reason.into()))
}

/// Index `i` with `axis[i] ≤ x ≤ axis[i + 1]` and the fractional position within it.
fn bracket(axis: &[f64], x: f64) -> Option<(usize, f64)> {
    let (first, last) = (*axis.first()?, *axis.last()?);
    if !(x >= first && x <= last) || axis.len() < 2 {
        return None;
    }
    let upper = axis.partition_point(|&a| a < x).clamp(1, axis.len() - 1);
    let (lo, hi) = (axis[upper - 1], axis[upper]);
    Some((upper - 1, (x - lo) / (hi - lo)))
}

/// Sorted distinct values of `values`.
fn axis(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut axis: Vec<f64> = values.collect();
    axis.sort_by(f64::total_cmp);
    axis.dedup();
    axis
}

/// `u0` on a regular `(G, BP−RP)` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ColourGrid {
    g_mag: Vec<f64>,
    bp_rp: Vec<f64>,
    /// Row-major, `g_mag.len() × bp_rp.len()`.
    u0: Vec<f64>,
}

impl ColourGrid {
    /// Read a `g_mag,bp_rp,u0` table. Rows may come in any order but must cover the grid.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, TapError> {
        let records = csv::Reader::from_reader(reader)
            .deserialize::<ColourRecord>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;

        let g_mag = axis(records.iter().map(|r| r.g_mag));
        let bp_rp = axis(records.iter().map(|r| r.bp_rp));
        if g_mag.len() < 2 || bp_rp.len() < 2 {
            return Err(invalid("the colour grid needs two nodes per axis"));
        }

        let mut u0 = vec![f64::NAN; g_mag.len() * bp_rp.len()];
        for r in &records {
            let i = g_mag.partition_point(|&g| g < r.g_mag);
            let j = bp_rp.partition_point(|&c| c < r.bp_rp);
            u0[i * bp_rp.len() + j] = r.u0;
        }
        if records.len() != u0.len() || u0.iter().any(|v| v.is_nan()) {
            return Err(invalid(format!(
                "{} rows do not fill a {}×{} grid",
                records.len(),
                g_mag.len(),
                bp_rp.len()
            )));
        }
        Ok(ColourGrid { g_mag, bp_rp, u0 })
    }

    fn at(&self, i: usize, j: usize) -> f64 {
        self.u0[i * self.bp_rp.len() + j]
    }

    /// Bilinear interpolation; `None` outside the grid.
    pub fn u0(&self, g_mag: Magnitude, bp_rp: Magnitude) -> Option<f64> {
        let (i, s) = bracket(&self.g_mag, g_mag)?;
        let (j, t) = bracket(&self.bp_rp, bp_rp)?;
        Some(
            (1.0 - s) * (1.0 - t) * self.at(i, j)
                + s * (1.0 - t) * self.at(i + 1, j)
                + (1.0 - s) * t * self.at(i, j + 1)
                + s * t * self.at(i + 1, j + 1),
        )
    }
}

/// `u0` as a function of magnitude only.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnitudeCurve {
    g_mag: Vec<f64>,
    u0: Vec<f64>,
}

impl MagnitudeCurve {
    /// Read a `g_mag,u0` table.
    pub fn from_csv<R: Read>(reader: R) -> Result<Self, TapError> {
        let mut records = csv::Reader::from_reader(reader)
            .deserialize::<MagnitudeRecord>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(e.to_string()))?;
        records.sort_by(|a, b| a.g_mag.total_cmp(&b.g_mag));
        if records.len() < 2 {
            return Err(invalid("the magnitude curve needs two nodes"));
        }
        if records.windows(2).any(|w| w[0].g_mag == w[1].g_mag) {
            return Err(invalid("duplicate magnitude node"));
        }
        Ok(MagnitudeCurve {
            g_mag: records.iter().map(|r| r.g_mag).collect(),
            u0: records.iter().map(|r| r.u0).collect(),
        })
    }

    /// Linear interpolation; `None` outside the curve.
    pub fn u0(&self, g_mag: Magnitude) -> Option<f64> {
        let (i, s) = bracket(&self.g_mag, g_mag)?;
        Some((1.0 - s) * self.u0[i] + s * self.u0[i + 1])
    }
}

/// Reference `u0` lookup used to renormalise the UWE.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RuweNormalization {
    colour: Option<ColourGrid>,
    magnitude: Option<MagnitudeCurve>,
}

impl RuweNormalization {
    pub fn new(colour: Option<ColourGrid>, magnitude: Option<MagnitudeCurve>) -> Self {
        RuweNormalization { colour, magnitude }
    }

    /// Load the colour grid and/or the magnitude curve from CSV files.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::Io`] when a file cannot be opened.
    /// * [`TapError::InvalidConfig`] when a table is malformed or does not form a grid.
    pub fn from_csv_files(
        colour_grid: Option<&Utf8Path>,
        magnitude_curve: Option<&Utf8Path>,
    ) -> Result<Self, TapError> {
        let colour = colour_grid
            .map(|path| ColourGrid::from_csv(File::open(path)?))
            .transpose()?;
        let magnitude = magnitude_curve
            .map(|path| MagnitudeCurve::from_csv(File::open(path)?))
            .transpose()?;
        Ok(RuweNormalization { colour, magnitude })
    }

    /// Reference value at `(G, BP−RP)`.
    ///
    /// The colour grid is used when the colour is finite, otherwise the magnitude curve.
    /// `NaN` outside the chosen table or when no table applies.
    pub fn u0(&self, g_mag: Magnitude, bp_rp: Magnitude) -> f64 {
        let value = match (&self.colour, &self.magnitude) {
            (Some(grid), _) if bp_rp.is_finite() => grid.u0(g_mag, bp_rp),
            (_, Some(curve)) => curve.u0(g_mag),
            _ => None,
        };
        value.unwrap_or(f64::NAN)
    }
}

#[cfg(test)]
mod ruwe_test {
    use approx::assert_relative_eq;

    use super::*;

    const GRID: &str = "g_mag,bp_rp,u0\n\
        10.0,0.0,1.0\n\
        10.0,1.0,2.0\n\
        12.0,0.0,3.0\n\
        12.0,1.0,4.0\n";

    const CURVE: &str = "g_mag,u0\n12.0,1.5\n10.0,1.0\n";

    fn normalization() -> RuweNormalization {
        RuweNormalization::new(
            Some(ColourGrid::from_csv(GRID.as_bytes()).unwrap()),
            Some(MagnitudeCurve::from_csv(CURVE.as_bytes()).unwrap()),
        )
    }

    #[test]
    fn test_unit_weight_error() {
        assert_relative_eq!(unit_weight_error(20.0, 10.0), 2.0);
        assert!(unit_weight_error(20.0, 5.0).is_nan());
        assert!(unit_weight_error(20.0, f64::NAN).is_nan());
    }

    #[test]
    fn test_bilinear_interpolation() {
        let norm = normalization();
        assert_relative_eq!(norm.u0(10.0, 0.0), 1.0);
        assert_relative_eq!(norm.u0(12.0, 1.0), 4.0);
        assert_relative_eq!(norm.u0(11.0, 0.5), 2.5);
        assert_relative_eq!(norm.u0(11.0, 0.0), 2.0);
        assert_relative_eq!(norm.u0(10.5, 1.0), 2.5);
    }

    #[test]
    fn test_outside_grid_is_nan() {
        let norm = normalization();
        assert!(norm.u0(9.9, 0.5).is_nan());
        assert!(norm.u0(11.0, 1.5).is_nan());
        assert!(RuweNormalization::default().u0(11.0, 0.5).is_nan());
    }

    #[test]
    fn test_magnitude_curve_without_colour() {
        let norm = normalization();
        assert_relative_eq!(norm.u0(11.0, f64::NAN), 1.25);
        assert!(norm.u0(13.0, f64::NAN).is_nan());
    }

    #[test]
    fn test_ruwe() {
        let norm = normalization();
        assert_relative_eq!(
            renormalized_unit_weight_error(20.0, 10.0, 11.0, 0.5, &norm),
            2.0 / 2.5
        );
    }

    #[test]
    fn test_incomplete_grid() {
        let partial = "g_mag,bp_rp,u0\n10.0,0.0,1.0\n10.0,1.0,2.0\n12.0,0.0,3.0\n";
        assert!(matches!(
            ColourGrid::from_csv(partial.as_bytes()),
            Err(TapError::InvalidConfig(_))
        ));
        assert!(matches!(
            MagnitudeCurve::from_csv("g_mag,u0\n10.0,1.0\n".as_bytes()),
            Err(TapError::InvalidConfig(_))
        ));
    }
}
