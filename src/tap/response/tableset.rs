//! VODataService table sets (`GET {tap}/tables`).
use std::fmt;

use super::{parse_xml_tree, XmlNode};
use crate::constants::HIDDEN_SCHEMAS;
use crate::table::{Column, DataType, Table, Value};
use crate::tap_errors::TapError;

/// Width of the description column of [`TableMeta::to_table`].
const SHORT_DESCRIPTION_LEN: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    pub ucd: Option<String>,
    /// ADQL/VOTable type name as published (`DOUBLE`, `VARCHAR`, …).
    pub datatype: Option<String>,
    /// `indexed`, `primary`, `nullable`, …
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableMeta {
    /// Table name without its schema prefix.
    pub name: String,
    pub schema: String,
    pub description: Option<String>,
    pub columns: Vec<ColumnMeta>,
}

impl TableMeta {
    /// `schema.name`.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Column listing as a [`Table`] (`name`, `datatype`, `unit`, `description`), the
    /// description cut to a single short line.
    pub fn to_table(&self) -> Result<Table, TapError> {
        let text = |s: Option<&str>| s.map_or(Value::Null, Value::from);
        let rows = self
            .columns
            .iter()
            .map(|c| {
                let short = c.description.as_deref().map(|d| {
                    let line = d.lines().next().unwrap_or("").trim();
                    line.chars().take(SHORT_DESCRIPTION_LEN).collect::<String>()
                });
                vec![
                    Value::from(c.name.as_str()),
                    text(c.datatype.as_deref()),
                    text(c.unit.as_deref()),
                    text(short.as_deref()),
                ]
            })
            .collect();
        let columns = ["name", "datatype", "unit", "description"]
            .into_iter()
            .map(|n| Column::new(n, DataType::Char))
            .collect();
        Table::new(columns, rows)
    }
}

impl fmt::Display for TableMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} columns)",
            self.qualified_name(),
            self.columns.len()
        )
    }
}

/// Tables published by the archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSet {
    tables: Vec<TableMeta>,
}

impl TableSet {
    pub fn new(tables: Vec<TableMeta>) -> Self {
        TableSet { tables }
    }

    pub fn tables(&self) -> &[TableMeta] {
        &self.tables
    }

    pub fn iter(&self) -> impl Iterator<Item = &TableMeta> {
        self.tables.iter()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Look a table up by plain or schema-qualified name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&TableMeta> {
        let (schema, table) = match name.rsplit_once('.') {
            Some((s, t)) => (Some(s), t),
            None => (None, name),
        };
        self.tables.iter().find(|t| {
            t.name.eq_ignore_ascii_case(table)
                && schema.map_or(true, |s| t.schema.eq_ignore_ascii_case(s))
        })
    }

    /// Distinct schema names, in publication order.
    pub fn schemas(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for t in &self.tables {
            if !out.contains(&t.schema.as_str()) {
                out.push(&t.schema);
            }
        }
        out
    }

    /// Subset whose schema is in `schemas` and whose name is in `tables`.
    ///
    /// An empty slice places no constraint on that dimension. Matching ignores case.
    pub fn filter(&self, schemas: &[&str], tables: &[&str]) -> TableSet {
        let matches = |wanted: &[&str], actual: &str| {
            wanted.is_empty() || wanted.iter().any(|w| w.eq_ignore_ascii_case(actual))
        };
        TableSet {
            tables: self
                .tables
                .iter()
                .filter(|t| matches(schemas, &t.schema) && matches(tables, &t.name))
                .cloned()
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a TableSet {
    type Item = &'a TableMeta;
    type IntoIter = std::slice::Iter<'a, TableMeta>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}

fn parse_column(node: &XmlNode) -> Option<ColumnMeta> {
    Some(ColumnMeta {
        name: node.child_value("name")?.to_string(),
        description: node.child_value("description").map(str::to_string),
        unit: node.child_value("unit").map(str::to_string),
        ucd: node.child_value("ucd").map(str::to_string),
        datatype: node.child_value("dataType").map(str::to_string),
        flags: node
            .children_named("flag")
            .filter_map(XmlNode::value)
            .map(str::to_string)
            .collect(),
    })
}

/// Decode a VODataService `tableset` document.
///
/// Tables of the `tap_schema` and `external` schemas are skipped and qualified table names
/// are reduced to their last component.
pub fn parse_tableset(content: &[u8]) -> Result<TableSet, TapError> {
    let root = parse_xml_tree(content)
        .map_err(|reason| TapError::malformed_table(format!("invalid tableset: {reason}"), content))?;
    if root.name != "tableset" {
        return Err(TapError::malformed_table(
            format!("expected a tableset, found <{}>", root.name),
            content,
        ));
    }

    let mut tables = Vec::new();
    for schema in root.children_named("schema") {
        let schema_name = schema.child_value("name").unwrap_or_default();
        if HIDDEN_SCHEMAS
            .iter()
            .any(|hidden| hidden.eq_ignore_ascii_case(schema_name))
        {
            continue;
        }
        for table in schema.children_named("table") {
            let Some(qualified) = table.child_value("name") else {
                continue;
            };
            let name = qualified.rsplit('.').next().unwrap_or(qualified);
            tables.push(TableMeta {
                name: name.to_string(),
                schema: schema_name.to_string(),
                description: table.child_value("description").map(str::to_string),
                columns: table.children_named("column").filter_map(parse_column).collect(),
            });
        }
    }
    Ok(TableSet::new(tables))
}
