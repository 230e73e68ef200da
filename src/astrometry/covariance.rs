//! # Per-source covariance matrices
//!
//! Catalogs publish the uncertainty of an astrometric solution as one standard error per
//! parameter (`<p>_error`) and one correlation coefficient per pair (`<a>_<b>_corr`, with
//! `a` before `b` in catalog order). [`CovarianceBuilder`] assembles them into the full
//! matrix of a chosen parameter subset:
//!
//! ```text
//! Σ[i][i] = err(i)²
//! Σ[i][j] = corr(i, j) · err(i) · err(j)
//! ```
//!
//! Correlation columns are looked up in canonical catalog order whatever order the
//! parameters are requested in. The radial velocity has no correlation columns and is
//! taken as uncorrelated with the other parameters.
//!
//! Null or `NaN` inputs give `NaN` entries, so a row without a usable solution yields a
//! matrix a caller can detect, not an error.
use std::fmt;

use nalgebra::{DMatrix, DVector};

use crate::table::{SourceRow, Table};
use crate::tap_errors::TapError;

/// N×N symmetric covariance matrix of one source.
pub type CovarianceMatrix = DMatrix<f64>;

/// Astrometric parameters, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AstrometricParam {
    Ra,
    Dec,
    Parallax,
    Pmra,
    Pmdec,
    RadialVelocity,
}

impl AstrometricParam {
    pub const ALL: [AstrometricParam; 6] = [
        AstrometricParam::Ra,
        AstrometricParam::Dec,
        AstrometricParam::Parallax,
        AstrometricParam::Pmra,
        AstrometricParam::Pmdec,
        AstrometricParam::RadialVelocity,
    ];

    /// Catalog column holding the value.
    pub fn column(&self) -> &'static str {
        match self {
            AstrometricParam::Ra => "ra",
            AstrometricParam::Dec => "dec",
            AstrometricParam::Parallax => "parallax",
            AstrometricParam::Pmra => "pmra",
            AstrometricParam::Pmdec => "pmdec",
            AstrometricParam::RadialVelocity => "radial_velocity",
        }
    }

    pub fn error_column(&self) -> String {
        format!("{}_error", self.column())
    }

    /// Column of the correlation between `self` and `other`.
    ///
    /// `None` when either is the radial velocity or both are the same parameter.
    pub fn correlation_column(&self, other: AstrometricParam) -> Option<String> {
        if *self == other
            || *self == AstrometricParam::RadialVelocity
            || other == AstrometricParam::RadialVelocity
        {
            return None;
        }
        let (a, b) = if self < &other {
            (self, &other)
        } else {
            (&other, self)
        };
        Some(format!("{}_{}_corr", a.column(), b.column()))
    }
}

impl fmt::Display for AstrometricParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Covariance from standard errors and a correlation matrix.
///
/// Only the strict upper triangle of `correlations` is read; the result is symmetric by
/// construction.
///
/// # Panics
/// If `correlations` is not `n × n` for `n = errors.len()`.
pub fn covariance_from_parts(errors: &DVector<f64>, correlations: &DMatrix<f64>) -> CovarianceMatrix {
    let n = errors.len();
    assert_eq!(correlations.shape(), (n, n), "correlation matrix shape");
    DMatrix::from_fn(n, n, |i, j| match i.cmp(&j) {
        std::cmp::Ordering::Equal => errors[i] * errors[i],
        std::cmp::Ordering::Less => correlations[(i, j)] * errors[i] * errors[j],
        std::cmp::Ordering::Greater => correlations[(j, i)] * errors[i] * errors[j],
    })
}

/// Builds covariance matrices for a fixed, ordered list of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceBuilder {
    error_columns: Vec<String>,
    /// `(i, j, column)` with `i < j`, indices into `error_columns`.
    correlation_columns: Vec<(usize, usize, String)>,
}

impl CovarianceBuilder {
    /// Builder for `params` under the catalog column naming.
    ///
    /// The matrix rows follow the order of `params`.
    pub fn new(params: &[AstrometricParam]) -> Self {
        let error_columns = params.iter().map(AstrometricParam::error_column).collect();
        let mut correlation_columns = Vec::new();
        for (i, a) in params.iter().enumerate() {
            for (j, b) in params.iter().enumerate().skip(i + 1) {
                if let Some(col) = a.correlation_column(*b) {
                    correlation_columns.push((i, j, col));
                }
            }
        }
        CovarianceBuilder {
            error_columns,
            correlation_columns,
        }
    }

    /// Builder with explicit column names.
    ///
    /// Arguments
    /// -----------------
    /// * `error_columns`: one standard-error column per matrix row, in matrix order.
    /// * `correlation_columns`: `(i, j, column)` for each correlated pair; pairs not listed
    ///   are uncorrelated.
    ///
    /// Return
    /// ----------
    /// * The builder, or [`TapError::InvalidCovariance`] when an index is out of range or a
    ///   pair is on the diagonal.
    pub fn with_columns(
        error_columns: &[&str],
        correlation_columns: &[(usize, usize, &str)],
    ) -> Result<Self, TapError> {
        let n = error_columns.len();
        let correlation_columns = correlation_columns
            .iter()
            .map(|&(i, j, col)| {
                if i == j || i >= n || j >= n {
                    return Err(TapError::InvalidCovariance(format!(
                        "correlation `{col}` refers to pair ({i}, {j}) of a {n}×{n} matrix"
                    )));
                }
                Ok((i.min(j), i.max(j), col.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CovarianceBuilder {
            error_columns: error_columns.iter().map(|c| c.to_string()).collect(),
            correlation_columns,
        })
    }

    pub fn dim(&self) -> usize {
        self.error_columns.len()
    }

    /// Every column the builder reads.
    pub fn required_columns(&self) -> Vec<&str> {
        self.error_columns
            .iter()
            .map(String::as_str)
            .chain(self.correlation_columns.iter().map(|(_, _, c)| c.as_str()))
            .collect()
    }

    fn assemble(
        &self,
        mut value: impl FnMut(&str) -> Result<f64, TapError>,
    ) -> Result<CovarianceMatrix, TapError> {
        let n = self.dim();
        let errors = self
            .error_columns
            .iter()
            .map(|c| value(c.as_str()))
            .collect::<Result<Vec<f64>, _>>()?;
        let mut correlations = DMatrix::zeros(n, n);
        for (i, j, col) in &self.correlation_columns {
            correlations[(*i, *j)] = value(col.as_str())?;
        }
        Ok(covariance_from_parts(&DVector::from_vec(errors), &correlations))
    }

    /// Covariance matrix of one row.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::MissingColumn`] when an error or correlation column is absent.
    pub fn build(&self, row: &SourceRow<'_>) -> Result<CovarianceMatrix, TapError> {
        self.assemble(|col| row.f64(col))
    }

    /// Covariance matrices of every row.
    ///
    /// Column presence is checked once; after that the computation cannot fail.
    pub fn build_all(&self, table: &Table) -> Result<Vec<CovarianceMatrix>, TapError> {
        table.require_columns(&self.required_columns())?;
        table.iter_rows().map(|row| self.build(&row)).collect()
    }
}
