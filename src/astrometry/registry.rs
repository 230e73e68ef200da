//! # Derived quantity registry
//!
//! Derived columns are computed by named functions held in a [`DerivedRegistry`]. Each
//! [`DerivedQuantity`] declares the catalog columns it reads; [`DerivedRegistry::compute`]
//! checks them once for the whole table and then evaluates the function row by row, so a
//! batch result is identical to evaluating every row on its own.
//!
//! ## Built-in quantities
//!
//! | name | columns read | definition |
//! |------|--------------|------------|
//! | `vtan` | `parallax`, `pmra`, `pmdec` | tangential speed (km/s) |
//! | `vtan_error` | same + errors and correlations | first-order error of `vtan` |
//! | `vra`, `vdec` | `parallax`, `pmra`, `pmdec` | velocity components (km/s) |
//! | `vra_error`, `vdec_error` | same + errors | uncorrelated errors of the components |
//! | `distance` | `parallax` | `1000 / ϖ` (pc) |
//! | `distmod` | `parallax` | distance modulus |
//! | `gmag` | `phot_g_mean_mag`, `parallax` | absolute G magnitude |
//! | `a_g_lerr`, `a_g_uerr` | `a_g_val`, `a_g_percentile_lower/upper` | extinction error bars |
//! | `good_phot` | `phot_bp_rp_excess_factor`, `bp_rp` | 1 when the flux excess is nominal, else 0 |
//! | `uwe` | `astrometric_chi2_al`, `astrometric_n_good_obs_al` | unit weight error |
//!
//! `ruwe` is available after [`DerivedRegistry::register_ruwe`] supplies a normalisation
//! table.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use nalgebra::Matrix3;

use crate::astrometry::accessors::{
    absolute_magnitude, distance, distance_modulus, extinction_errors, good_photometry,
    tangential_speed, tangential_velocity, velocity_component_errors, velocity_components,
};
use crate::astrometry::covariance::{AstrometricParam, CovarianceBuilder};
use crate::astrometry::ruwe::{renormalized_unit_weight_error, unit_weight_error, RuweNormalization};
use crate::table::{SourceRow, Table};
use crate::tap_errors::TapError;

type DeriveFn = dyn Fn(&SourceRow<'_>) -> Result<f64, TapError> + Send + Sync;

/// A named numeric column computed from other columns of the same row.
#[derive(Clone)]
pub struct DerivedQuantity {
    name: String,
    description: String,
    columns: Vec<String>,
    function: Arc<DeriveFn>,
}

impl DerivedQuantity {
    /// Arguments
    /// -----------------
    /// * `name`: column name of the result.
    /// * `description`: one-line human description.
    /// * `columns`: every column `function` reads; checked before evaluation.
    /// * `function`: per-row computation. It should return `NaN` rather than fail on
    ///   physically undefined inputs.
    pub fn new<F>(name: &str, description: &str, columns: &[&str], function: F) -> Self
    where
        F: Fn(&SourceRow<'_>) -> Result<f64, TapError> + Send + Sync + 'static,
    {
        DerivedQuantity {
            name: name.to_string(),
            description: description.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            function: Arc::new(function),
        }
    }

    /// Quantity computed by a plain function of `N` columns.
    fn scalar<const N: usize>(
        name: &str,
        description: &str,
        columns: [&'static str; N],
        f: fn([f64; N]) -> f64,
    ) -> Self {
        Self::new(name, description, &columns, move |row| {
            let mut values = [0.0; N];
            for (value, column) in values.iter_mut().zip(columns) {
                *value = row.f64(column)?;
            }
            Ok(f(values))
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn evaluate(&self, row: &SourceRow<'_>) -> Result<f64, TapError> {
        (self.function)(row)
    }
}

impl fmt::Debug for DerivedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedQuantity")
            .field("name", &self.name)
            .field("columns", &self.columns)
            .finish()
    }
}

impl fmt::Display for DerivedQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [{}]", self.name, self.description, self.columns.join(", "))
    }
}

fn tangential_velocity_error() -> DerivedQuantity {
    use AstrometricParam::*;

    let builder = CovarianceBuilder::new(&[Parallax, Pmra, Pmdec]);
    let columns: Vec<String> = ["parallax", "pmra", "pmdec"]
        .into_iter()
        .chain(builder.required_columns())
        .map(str::to_string)
        .collect();
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();

    DerivedQuantity::new(
        "vtan_error",
        "first-order error of the tangential speed (km/s)",
        &columns,
        move |row| {
            let cov = builder.build(row)?;
            let cov: Matrix3<f64> = cov.fixed_view::<3, 3>(0, 0).into_owned();
            Ok(tangential_velocity(
                row.f64("parallax")?,
                row.f64("pmra")?,
                row.f64("pmdec")?,
                &cov,
            )
            .error)
        },
    )
}

/// Name → [`DerivedQuantity`].
#[derive(Debug, Clone, Default)]
pub struct DerivedRegistry {
    quantities: BTreeMap<String, DerivedQuantity>,
}

impl DerivedRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in quantities.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let quantities = [
            DerivedQuantity::scalar(
                "vtan",
                "tangential speed (km/s)",
                ["parallax", "pmra", "pmdec"],
                |[plx, pmra, pmdec]| tangential_speed(plx, pmra, pmdec),
            ),
            tangential_velocity_error(),
            DerivedQuantity::scalar(
                "vra",
                "velocity along right ascension (km/s)",
                ["parallax", "pmra", "pmdec"],
                |[plx, pmra, pmdec]| velocity_components(plx, pmra, pmdec).0,
            ),
            DerivedQuantity::scalar(
                "vdec",
                "velocity along declination (km/s)",
                ["parallax", "pmra", "pmdec"],
                |[plx, pmra, pmdec]| velocity_components(plx, pmra, pmdec).1,
            ),
            DerivedQuantity::scalar(
                "vra_error",
                "error of vra, correlations ignored (km/s)",
                ["parallax", "pmra", "pmdec", "parallax_error", "pmra_error", "pmdec_error"],
                |[plx, pmra, pmdec, e_plx, e_pmra, e_pmdec]| {
                    velocity_component_errors(plx, pmra, pmdec, e_plx, e_pmra, e_pmdec).0
                },
            ),
            DerivedQuantity::scalar(
                "vdec_error",
                "error of vdec, correlations ignored (km/s)",
                ["parallax", "pmra", "pmdec", "parallax_error", "pmra_error", "pmdec_error"],
                |[plx, pmra, pmdec, e_plx, e_pmra, e_pmdec]| {
                    velocity_component_errors(plx, pmra, pmdec, e_plx, e_pmra, e_pmdec).1
                },
            ),
            DerivedQuantity::scalar("distance", "inverse parallax distance (pc)", ["parallax"], |[plx]| {
                distance(plx)
            }),
            DerivedQuantity::scalar("distmod", "distance modulus (mag)", ["parallax"], |[plx]| {
                distance_modulus(plx)
            }),
            DerivedQuantity::scalar(
                "gmag",
                "absolute G magnitude (mag)",
                ["phot_g_mean_mag", "parallax"],
                |[g, plx]| absolute_magnitude(g, plx),
            ),
            DerivedQuantity::scalar(
                "a_g_lerr",
                "lower error of the G extinction (mag)",
                ["a_g_val", "a_g_percentile_lower", "a_g_percentile_upper"],
                |[val, lower, upper]| extinction_errors(val, lower, upper).0,
            ),
            DerivedQuantity::scalar(
                "a_g_uerr",
                "upper error of the G extinction (mag)",
                ["a_g_val", "a_g_percentile_lower", "a_g_percentile_upper"],
                |[val, lower, upper]| extinction_errors(val, lower, upper).1,
            ),
            DerivedQuantity::scalar(
                "good_phot",
                "1 when the BP/RP flux excess is nominal",
                ["phot_bp_rp_excess_factor", "bp_rp"],
                |[excess, bp_rp]| f64::from(u8::from(good_photometry(excess, bp_rp))),
            ),
            DerivedQuantity::scalar(
                "uwe",
                "unit weight error",
                ["astrometric_chi2_al", "astrometric_n_good_obs_al"],
                |[chi2, n]| unit_weight_error(chi2, n),
            ),
        ];
        for q in quantities {
            registry.register(q);
        }
        registry
    }

    /// Add `quantity`, replacing any quantity of the same name.
    pub fn register(&mut self, quantity: DerivedQuantity) {
        self.quantities.insert(quantity.name.clone(), quantity);
    }

    /// Register `ruwe` over `normalization`. A missing `bp_rp` column falls back to the
    /// magnitude-only curve.
    pub fn register_ruwe(&mut self, normalization: RuweNormalization) {
        let normalization = Arc::new(normalization);
        self.register(DerivedQuantity::new(
            "ruwe",
            "renormalised unit weight error",
            &["astrometric_chi2_al", "astrometric_n_good_obs_al", "phot_g_mean_mag"],
            move |row| {
                Ok(renormalized_unit_weight_error(
                    row.f64("astrometric_chi2_al")?,
                    row.f64("astrometric_n_good_obs_al")?,
                    row.f64("phot_g_mean_mag")?,
                    row.opt_f64("bp_rp").unwrap_or(f64::NAN),
                    &normalization,
                ))
            },
        ));
    }

    pub fn get(&self, name: &str) -> Option<&DerivedQuantity> {
        self.quantities.get(name)
    }

    fn require(&self, name: &str) -> Result<&DerivedQuantity, TapError> {
        self.get(name)
            .ok_or_else(|| TapError::UnknownQuantity(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.quantities.keys().map(String::as_str).collect()
    }

    /// Evaluate `name` on every row of `table`.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::UnknownQuantity`] if `name` is not registered.
    /// * [`TapError::MissingColumn`] naming the first input column `table` lacks.
    pub fn compute(&self, name: &str, table: &Table) -> Result<Vec<f64>, TapError> {
        let quantity = self.require(name)?;
        table.require_columns(&quantity.columns)?;
        table.iter_rows().map(|row| quantity.evaluate(&row)).collect()
    }

    /// Evaluate `name` on a single row.
    pub fn compute_row(&self, name: &str, row: &SourceRow<'_>) -> Result<f64, TapError> {
        self.require(name)?.evaluate(row)
    }

    /// Copy of `table` with one double column appended per name in `names`.
    pub fn with_columns(&self, table: &Table, names: &[&str]) -> Result<Table, TapError> {
        names.iter().try_fold(table.clone(), |acc, name| {
            let values = self.compute(name, &acc)?;
            acc.with_f64_column(name, values)
        })
    }
}

#[cfg(test)]
mod registry_test {
    use approx::assert_relative_eq;

    use super::*;
    use crate::table::{Column, DataType, Value};

    fn sources() -> Table {
        let names = [
            "parallax",
            "pmra",
            "pmdec",
            "parallax_error",
            "pmra_error",
            "pmdec_error",
            "parallax_pmra_corr",
            "parallax_pmdec_corr",
            "pmra_pmdec_corr",
        ];
        let rows = vec![
            vec![1.0, 5.0, -3.0, 0.1, 0.2, 0.2, 0.0, 0.0, 0.0],
            vec![-0.5, 1.0, 1.0, 0.1, 0.1, 0.1, 0.0, 0.0, 0.0],
            vec![100.0, 0.0, 0.0, 0.1, 0.1, 0.1, 0.0, 0.0, 0.0],
        ];
        Table::new(
            names.iter().map(|n| Column::new(*n, DataType::Double)).collect(),
            rows.into_iter()
                .map(|r| r.into_iter().map(Value::from).collect())
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let registry = DerivedRegistry::with_defaults();
        assert!(registry.names().contains(&"vtan"));
        assert!(registry.get("ruwe").is_none());

        let table = sources();
        let vtan = registry.compute("vtan", &table).unwrap();
        assert_relative_eq!(vtan[0], 27.641455129561848, epsilon = 1e-9);
        assert!(vtan[1].is_nan());
        assert_eq!(vtan[2], 0.0);

        let err = registry.compute("vtan_error", &table).unwrap();
        assert_relative_eq!(err[0], 2.9222222397982995, epsilon = 1e-9);

        let distmod = registry.compute("distmod", &table).unwrap();
        assert_relative_eq!(distmod[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_batch_matches_rows() {
        let registry = DerivedRegistry::with_defaults();
        let table = sources();
        for name in ["vtan", "vtan_error", "vra", "vdec_error", "distance"] {
            let batch = registry.compute(name, &table).unwrap();
            for row in table.iter_rows() {
                let single = registry.compute_row(name, &row).unwrap();
                let b = batch[row.index()];
                assert!(b == single || (b.is_nan() && single.is_nan()), "{name}");
            }
        }
    }

    #[test]
    fn test_errors() {
        let registry = DerivedRegistry::with_defaults();
        let table = sources();
        assert_eq!(
            registry.compute("speed", &table),
            Err(TapError::UnknownQuantity("speed".into()))
        );
        assert_eq!(
            registry.compute("gmag", &table),
            Err(TapError::MissingColumn("phot_g_mean_mag".into()))
        );
    }

    #[test]
    fn test_with_columns_and_custom() {
        let mut registry = DerivedRegistry::with_defaults();
        registry.register(DerivedQuantity::new(
            "half_parallax",
            "parallax / 2",
            &["parallax"],
            |row| Ok(row.f64("parallax")? / 2.0),
        ));
        let table = registry
            .with_columns(&sources(), &["vra", "half_parallax"])
            .unwrap();
        assert_eq!(table.num_columns(), 11);
        assert_eq!(table.column_f64("half_parallax").unwrap()[2], 50.0);
        assert_relative_eq!(
            table.column_f64("vra").unwrap()[0],
            5.0 * crate::constants::K_VTAN
        );
    }
}
