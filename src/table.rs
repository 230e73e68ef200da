//! # In-memory tables
//!
//! [`Table`] is the typed result of every tabular payload decoded by
//! [`crate::tap::response`]: an ordered list of [`Column`] descriptors and a list of rows,
//! each row holding exactly one nullable [`Value`] per column.
//!
//! Tables are produced once and consumed read-only downstream. The astrometric
//! pipeline reads them through [`SourceRow`], a borrowed view over one row that resolves
//! columns by name and turns nulls into `NaN`.
//!
//! ## Example
//!
//! ```rust
//! use astrotap::table::{Column, DataType, Table, Value};
//!
//! let table = Table::new(
//!     vec![
//!         Column::new("source_id", DataType::Long),
//!         Column::new("parallax", DataType::Double),
//!     ],
//!     vec![
//!         vec![Value::Int(1), Value::Float(2.5)],
//!         vec![Value::Int(2), Value::Null],
//!     ],
//! )
//! .unwrap();
//!
//! assert_eq!(table.num_rows(), 2);
//! assert!(table.row(1).f64("parallax").unwrap().is_nan());
//! ```
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::tap_errors::TapError;

/// Declared type of a column.
///
/// The names follow the VOTable `datatype` vocabulary; FITS `TFORM` codes and JSON
/// metadata are mapped onto the same set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Boolean,
    UnsignedByte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

impl DataType {
    /// VOTable `datatype` attribute value.
    pub fn votable_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "boolean",
            DataType::UnsignedByte => "unsignedByte",
            DataType::Short => "short",
            DataType::Int => "int",
            DataType::Long => "long",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Char => "char",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, DataType::Boolean | DataType::Char)
    }

    /// Parse a textual cell according to this type. Empty text is null.
    pub fn parse_text(&self, text: &str) -> Option<Value> {
        let text = text.trim();
        if text.is_empty() {
            return Some(Value::Null);
        }
        match self {
            DataType::Boolean => match text.to_ascii_lowercase().as_str() {
                "t" | "true" | "1" => Some(Value::Bool(true)),
                "f" | "false" | "0" => Some(Value::Bool(false)),
                "?" => Some(Value::Null),
                _ => None,
            },
            DataType::UnsignedByte | DataType::Short | DataType::Int | DataType::Long => {
                text.parse::<i64>().ok().map(Value::Int)
            }
            DataType::Float | DataType::Double => match text.to_ascii_lowercase().as_str() {
                "nan" => Some(Value::Float(f64::NAN)),
                "inf" | "+inf" => Some(Value::Float(f64::INFINITY)),
                "-inf" => Some(Value::Float(f64::NEG_INFINITY)),
                _ => text.parse::<f64>().ok().map(Value::Float),
            },
            DataType::Char => Some(Value::Text(text.to_string())),
        }
    }
}

impl FromStr for DataType {
    type Err = TapError;

    /// Accepts VOTable datatypes and the ADQL type names used in table metadata.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        let name = lowered.strip_prefix("adql:").unwrap_or(&lowered);
        match name {
            "boolean" | "bit" => Ok(DataType::Boolean),
            "unsignedbyte" | "byte" => Ok(DataType::UnsignedByte),
            "short" | "smallint" => Ok(DataType::Short),
            "int" | "integer" => Ok(DataType::Int),
            "long" | "bigint" => Ok(DataType::Long),
            "float" | "real" => Ok(DataType::Float),
            "double" | "double precision" => Ok(DataType::Double),
            "char" | "unicodechar" | "varchar" | "text" | "string" | "timestamp" => {
                Ok(DataType::Char)
            }
            _ => Err(TapError::malformed_table(
                format!("unsupported datatype `{s}`"),
                s.as_bytes(),
            )),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.votable_name())
    }
}

/// A nullable scalar cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the cell: null and non-numeric text become `NaN`,
    /// booleans become 0/1.
    pub fn as_f64(&self) -> f64 {
        match self {
            Value::Null => f64::NAN,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Int(i) => *i as f64,
            Value::Float(x) => *x,
            Value::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(b) => write!(f, "{}", if *b { "T" } else { "F" }),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// Column descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub datatype: DataType,
    pub unit: Option<String>,
    pub ucd: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Column {
            name: name.into(),
            datatype,
            unit: None,
            ucd: None,
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

/// Rename repeated column names to `name_2`, `name_3`, ... in order of appearance.
///
/// Join results may repeat a name (`SELECT a.ra, b.ra ...`); the first occurrence keeps it.
/// A suffix already used by another column is skipped.
pub(crate) fn disambiguate_names(columns: &mut [Column]) {
    let mut taken: HashSet<String> = HashSet::with_capacity(columns.len());
    for i in 0..columns.len() {
        if taken.contains(&columns[i].name) {
            let base = &columns[i].name;
            let renamed = (2..)
                .map(|n| format!("{base}_{n}"))
                .find(|candidate| {
                    !taken.contains(candidate) && !columns.iter().any(|c| &c.name == candidate)
                })
                .unwrap_or_default();
            columns[i].name = renamed;
        }
        taken.insert(columns[i].name.clone());
    }
}

/// Ordered columns plus rows aligned to them.
///
/// Invariant: every row has exactly `columns.len()` values. It is checked by
/// [`Table::new`] and preserved by every method that returns a new table.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    columns: Vec<Column>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, checking row arity and column-name uniqueness.
    ///
    /// Return
    /// ----------
    /// * The table, or [`TapError::MalformedTable`] when a row does not carry exactly one
    ///   value per column or a column name is repeated.
    pub fn new(columns: Vec<Column>, rows: Vec<Vec<Value>>) -> Result<Self, TapError> {
        for (i, c) in columns.iter().enumerate() {
            if columns[..i].iter().any(|other| other.name == c.name) {
                return Err(TapError::malformed_table(
                    format!("duplicate column `{}`", c.name),
                    c.name.as_bytes(),
                ));
            }
        }
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            let rendered = row.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",");
            return Err(TapError::malformed_table(
                format!(
                    "row {idx} has {} values for {} columns",
                    row.len(),
                    columns.len()
                ),
                rendered.as_bytes(),
            ));
        }
        Ok(Table { columns, rows })
    }

    pub fn empty(columns: Vec<Column>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the column called `name`, if any.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Fail with [`TapError::MissingColumn`] naming the first absent column.
    pub fn require_columns<S: AsRef<str>>(&self, names: &[S]) -> Result<(), TapError> {
        match names.iter().find(|n| !self.has_column(n.as_ref())) {
            Some(missing) => Err(TapError::MissingColumn(missing.as_ref().to_string())),
            None => Ok(()),
        }
    }

    /// Borrowed view over row `index`.
    ///
    /// # Panics
    /// If `index >= self.num_rows()`.
    pub fn row(&self, index: usize) -> SourceRow<'_> {
        assert!(index < self.rows.len(), "row index {index} out of bounds");
        SourceRow { table: self, index }
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = SourceRow<'_>> {
        (0..self.rows.len()).map(move |index| SourceRow { table: self, index })
    }

    /// Numeric column, nulls as `NaN`.
    pub fn column_f64(&self, name: &str) -> Result<Vec<f64>, TapError> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| TapError::MissingColumn(name.to_string()))?;
        Ok(self.rows.iter().map(|r| r[idx].as_f64()).collect())
    }

    /// Return a copy of this table with `values` appended as a new double column.
    ///
    /// An existing column of the same name is replaced in place.
    pub fn with_f64_column(&self, name: &str, values: Vec<f64>) -> Result<Table, TapError> {
        if values.len() != self.rows.len() {
            return Err(TapError::malformed_table(
                format!(
                    "column `{name}` has {} values for {} rows",
                    values.len(),
                    self.rows.len()
                ),
                name.as_bytes(),
            ));
        }
        let mut table = self.clone();
        match table.column_index(name) {
            Some(idx) => {
                table.columns[idx] = Column::new(name, DataType::Double);
                for (row, v) in table.rows.iter_mut().zip(values) {
                    row[idx] = Value::Float(v);
                }
            }
            None => {
                table.columns.push(Column::new(name, DataType::Double));
                for (row, v) in table.rows.iter_mut().zip(values) {
                    row.push(Value::Float(v));
                }
            }
        }
        Ok(table)
    }
}

/// Borrowed view over one row of a [`Table`].
#[derive(Debug, Clone, Copy)]
pub struct SourceRow<'a> {
    table: &'a Table,
    index: usize,
}

impl<'a> SourceRow<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn table(&self) -> &'a Table {
        self.table
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.table
            .column_index(name)
            .map(|idx| &self.table.rows[self.index][idx])
    }

    /// Numeric value of column `name`; null becomes `NaN`.
    ///
    /// Errors
    /// ----------
    /// * [`TapError::MissingColumn`] if the table has no such column.
    pub fn f64(&self, name: &str) -> Result<f64, TapError> {
        self.value(name)
            .map(Value::as_f64)
            .ok_or_else(|| TapError::MissingColumn(name.to_string()))
    }

    /// Like [`SourceRow::f64`] but `None` when the column is absent.
    pub fn opt_f64(&self, name: &str) -> Option<f64> {
        self.value(name).map(Value::as_f64)
    }
}

#[cfg(test)]
mod table_test {
    use super::*;

    fn sample() -> Table {
        Table::new(
            vec![
                Column::new("a", DataType::Long),
                Column::new("b", DataType::Double),
            ],
            vec![
                vec![Value::Int(1), Value::Float(0.5)],
                vec![Value::Int(2), Value::Null],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_arity_is_checked() {
        let err = Table::new(
            vec![Column::new("a", DataType::Long)],
            vec![vec![Value::Int(1), Value::Int(2)]],
        )
        .unwrap_err();
        assert!(matches!(err, TapError::MalformedTable { .. }));
    }

    #[test]
    fn test_disambiguate_names() {
        let mut columns: Vec<Column> = ["ra", "dec", "ra", "ra_2", "ra"]
            .iter()
            .map(|n| Column::new(*n, DataType::Double))
            .collect();
        disambiguate_names(&mut columns);
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["ra", "dec", "ra_3", "ra_2", "ra_4"]);
    }

    #[test]
    fn test_duplicate_columns_rejected() {
        let err = Table::new(
            vec![
                Column::new("a", DataType::Long),
                Column::new("a", DataType::Double),
            ],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(err, TapError::MalformedTable { .. }));
    }

    #[test]
    fn test_row_view() {
        let t = sample();
        assert_eq!(t.row(0).f64("b").unwrap(), 0.5);
        assert!(t.row(1).f64("b").unwrap().is_nan());
        assert_eq!(
            t.row(0).f64("c").unwrap_err(),
            TapError::MissingColumn("c".into())
        );
        assert_eq!(t.require_columns(&["a", "zz"]), Err(TapError::MissingColumn("zz".into())));
    }

    #[test]
    fn test_with_f64_column() {
        let t = sample().with_f64_column("c", vec![1.0, 2.0]).unwrap();
        assert_eq!(t.column_names(), vec!["a", "b", "c"]);
        assert_eq!(t.column_f64("c").unwrap(), vec![1.0, 2.0]);

        let replaced = t.with_f64_column("a", vec![9.0, 8.0]).unwrap();
        assert_eq!(replaced.column_names(), vec!["a", "b", "c"]);
        assert_eq!(replaced.column_f64("a").unwrap(), vec![9.0, 8.0]);

        assert!(sample().with_f64_column("c", vec![1.0]).is_err());
    }

    #[test]
    fn test_parse_text() {
        assert_eq!(DataType::Long.parse_text("42"), Some(Value::Int(42)));
        assert_eq!(DataType::Double.parse_text(""), Some(Value::Null));
        assert_eq!(DataType::Boolean.parse_text("T"), Some(Value::Bool(true)));
        assert_eq!(DataType::Int.parse_text("x"), None);
        assert_eq!("adql:BIGINT".parse::<DataType>().unwrap(), DataType::Long);
        assert_eq!("double".parse::<DataType>().unwrap(), DataType::Double);
    }
}
