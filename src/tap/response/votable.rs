//! VOTable decoding (`TABLEDATA`, `BINARY`, `BINARY2`).
//!
//! Only the first `TABLE` of the document is read. Columns are declared by `FIELD`
//! elements; a `VALUES null="…"` child gives the integer null sentinel. Array-valued
//! numeric fields are kept as a space-separated [`Value::Text`].
//!
//! Binary streams are base64, big-endian, one row after the other. `BINARY2` prefixes
//! each row with a null bitmask of `ceil(nfields / 8)` bytes, most significant bit first.
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use itertools::Itertools;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use super::{attribute, event_text, fixed_width_text, ArchiveError, ByteCursor, ErrorEnvelope};
use crate::table::{disambiguate_names, Column, DataType, Table, Value};
use crate::tap_errors::TapError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Primitive {
    Boolean,
    UnsignedByte,
    Short,
    Int,
    Long,
    Char,
    UnicodeChar,
    Float,
    Double,
}

impl Primitive {
    fn from_votable(name: &str) -> Option<Self> {
        match name {
            "boolean" => Some(Primitive::Boolean),
            "unsignedByte" => Some(Primitive::UnsignedByte),
            "short" => Some(Primitive::Short),
            "int" => Some(Primitive::Int),
            "long" => Some(Primitive::Long),
            "char" => Some(Primitive::Char),
            "unicodeChar" => Some(Primitive::UnicodeChar),
            "float" => Some(Primitive::Float),
            "double" => Some(Primitive::Double),
            _ => None,
        }
    }

    fn datatype(&self) -> DataType {
        match self {
            Primitive::Boolean => DataType::Boolean,
            Primitive::UnsignedByte => DataType::UnsignedByte,
            Primitive::Short => DataType::Short,
            Primitive::Int => DataType::Int,
            Primitive::Long => DataType::Long,
            Primitive::Char | Primitive::UnicodeChar => DataType::Char,
            Primitive::Float => DataType::Float,
            Primitive::Double => DataType::Double,
        }
    }

    fn is_text(&self) -> bool {
        matches!(self, Primitive::Char | Primitive::UnicodeChar)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArraySize {
    Scalar,
    Fixed(usize),
    Variable,
}

impl ArraySize {
    fn parse(raw: Option<&str>) -> Result<Self, String> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(ArraySize::Scalar);
        };
        if raw.contains('*') {
            return Ok(ArraySize::Variable);
        }
        raw.split('x')
            .map(|dim| dim.trim().parse::<usize>())
            .try_fold(1usize, |acc, dim| dim.map(|d| acc * d))
            .map(ArraySize::Fixed)
            .map_err(|_| format!("invalid arraysize `{raw}`"))
    }
}

#[derive(Debug, Clone)]
struct FieldSpec {
    column: Column,
    primitive: Primitive,
    arraysize: ArraySize,
    null: Option<String>,
}

impl FieldSpec {
    fn from_element(e: &BytesStart<'_>, raw: &[u8]) -> Result<Self, TapError> {
        let name = attribute(e, b"name")
            .or_else(|| attribute(e, b"ID"))
            .ok_or_else(|| TapError::malformed_table("FIELD without name", raw))?;
        let declared = attribute(e, b"datatype").ok_or_else(|| {
            TapError::malformed_table(format!("FIELD `{name}` without datatype"), raw)
        })?;
        let primitive = Primitive::from_votable(&declared).ok_or_else(|| {
            TapError::malformed_table(
                format!("unsupported datatype `{declared}` for FIELD `{name}`"),
                raw,
            )
        })?;
        let arraysize = ArraySize::parse(attribute(e, b"arraysize").as_deref())
            .map_err(|reason| TapError::malformed_table(reason, raw))?;

        let is_numeric_array =
            !primitive.is_text() && !matches!(arraysize, ArraySize::Scalar | ArraySize::Fixed(1));
        let datatype = if is_numeric_array {
            DataType::Char
        } else {
            primitive.datatype()
        };

        Ok(FieldSpec {
            column: Column {
                name,
                datatype,
                unit: attribute(e, b"unit"),
                ucd: attribute(e, b"ucd"),
            },
            primitive,
            arraysize,
            null: None,
        })
    }

    fn is_null_sentinel(&self, raw: &str) -> bool {
        self.null.as_deref().is_some_and(|n| n.trim() == raw.trim())
    }

    fn text_value(&self, raw: &str, content: &[u8]) -> Result<Value, TapError> {
        if self.is_null_sentinel(raw) {
            return Ok(Value::Null);
        }
        if self.column.datatype == DataType::Char {
            return Ok(if raw.trim().is_empty() {
                Value::Null
            } else {
                Value::Text(raw.to_string())
            });
        }
        self.column.datatype.parse_text(raw).ok_or_else(|| {
            TapError::malformed_table(
                format!(
                    "cannot read `{raw}` as {} in column `{}`",
                    self.column.datatype, self.column.name
                ),
                content,
            )
        })
    }

    fn read_scalar(&self, cursor: &mut ByteCursor<'_>) -> Option<Value> {
        let value = match self.primitive {
            Primitive::Boolean => match cursor.u8()? {
                b'T' | b't' | b'1' => Value::Bool(true),
                b'F' | b'f' | b'0' => Value::Bool(false),
                _ => Value::Null,
            },
            Primitive::UnsignedByte => Value::Int(cursor.u8()? as i64),
            Primitive::Short => Value::Int(cursor.i16()? as i64),
            Primitive::Int => Value::Int(cursor.i32()? as i64),
            Primitive::Long => Value::Int(cursor.i64()?),
            Primitive::Float => float_or_null(cursor.f32()? as f64),
            Primitive::Double => float_or_null(cursor.f64()?),
            Primitive::Char => Value::Text((cursor.u8()? as char).to_string()),
            Primitive::UnicodeChar => {
                let unit = cursor.array_u16()?;
                Value::Text(String::from_utf16_lossy(&[unit]))
            }
        };
        match &value {
            Value::Int(i) if self.is_null_sentinel(&i.to_string()) => Some(Value::Null),
            _ => Some(value),
        }
    }

    /// One cell of a binary stream. `None` when the stream ends inside the cell.
    fn read_binary(&self, cursor: &mut ByteCursor<'_>) -> Option<Value> {
        let count = match self.arraysize {
            ArraySize::Scalar => 1,
            ArraySize::Fixed(n) => n,
            ArraySize::Variable => usize::try_from(cursor.i32()?).ok()?,
        };

        match self.primitive {
            Primitive::Char => {
                let text = fixed_width_text(cursor.take(count)?);
                Some(non_empty_text(text))
            }
            Primitive::UnicodeChar => {
                let bytes = cursor.take(count.checked_mul(2)?)?;
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|c| u16::from_be_bytes([c[0], c[1]]))
                    .take_while(|&u| u != 0)
                    .collect();
                Some(non_empty_text(
                    String::from_utf16_lossy(&units).trim_end().to_string(),
                ))
            }
            _ if self.column.datatype != DataType::Char => self.read_scalar(cursor),
            _ => {
                let mut items = Vec::with_capacity(count.min(cursor.remaining()));
                for _ in 0..count {
                    items.push(self.read_scalar(cursor)?);
                }
                Some(if items.is_empty() {
                    Value::Null
                } else {
                    Value::Text(items.iter().join(" "))
                })
            }
        }
    }
}

fn float_or_null(x: f64) -> Value {
    if x.is_nan() {
        Value::Null
    } else {
        Value::Float(x)
    }
}

fn non_empty_text(text: String) -> Value {
    if text.is_empty() {
        Value::Null
    } else {
        Value::Text(text)
    }
}

impl ByteCursor<'_> {
    fn array_u16(&mut self) -> Option<u16> {
        let b = self.take(2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Capture {
    Nothing,
    Cell,
    Stream,
    QueryStatus,
}

#[derive(Debug)]
struct VotableReader<'c> {
    content: &'c [u8],
    fields: Vec<FieldSpec>,
    open_field: Option<usize>,
    in_table: bool,
    table_seen: bool,
    done: bool,
    binary2: bool,
    capture: Capture,
    text: String,
    cells: Vec<String>,
    rows: Vec<Vec<Value>>,
    query_error: Option<String>,
}

impl<'c> VotableReader<'c> {
    fn new(content: &'c [u8]) -> Self {
        VotableReader {
            content,
            fields: Vec::new(),
            open_field: None,
            in_table: false,
            table_seen: false,
            done: false,
            binary2: false,
            capture: Capture::Nothing,
            text: String::new(),
            cells: Vec::new(),
            rows: Vec::new(),
            query_error: None,
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> TapError {
        TapError::malformed_table(reason, self.content)
    }

    fn open(&mut self, e: &BytesStart<'_>, empty: bool) -> Result<(), TapError> {
        match e.local_name().as_ref() {
            b"INFO" => {
                let is_status = attribute(e, b"name").as_deref() == Some("QUERY_STATUS");
                let is_error =
                    attribute(e, b"value").is_some_and(|v| v.eq_ignore_ascii_case("ERROR"));
                if is_status && is_error {
                    if empty {
                        self.query_error = Some(String::new());
                    } else {
                        self.capture = Capture::QueryStatus;
                        self.text.clear();
                    }
                }
            }
            b"TABLE" => {
                self.in_table = true;
                self.table_seen = true;
                if empty {
                    self.done = true;
                }
            }
            b"FIELD" if self.in_table => {
                self.fields.push(FieldSpec::from_element(e, self.content)?);
                if !empty {
                    self.open_field = Some(self.fields.len() - 1);
                }
            }
            b"VALUES" => {
                if let Some(idx) = self.open_field {
                    self.fields[idx].null = attribute(e, b"null");
                }
            }
            b"TR" if self.in_table => self.cells.clear(),
            b"TD" if self.in_table => {
                if empty {
                    self.cells.push(String::new());
                } else {
                    self.capture = Capture::Cell;
                    self.text.clear();
                }
            }
            b"BINARY" => self.binary2 = false,
            b"BINARY2" => self.binary2 = true,
            b"STREAM" if self.in_table => {
                let encoding = attribute(e, b"encoding").unwrap_or_default();
                if encoding != "base64" {
                    return Err(self.malformed(format!(
                        "unsupported STREAM encoding `{encoding}`"
                    )));
                }
                if !empty {
                    self.capture = Capture::Stream;
                    self.text.clear();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, name: &[u8]) -> Result<(), TapError> {
        match (name, self.capture) {
            (b"INFO", Capture::QueryStatus) => {
                self.query_error = Some(self.text.trim().to_string());
                self.capture = Capture::Nothing;
            }
            (b"TD", Capture::Cell) => {
                self.cells.push(std::mem::take(&mut self.text));
                self.capture = Capture::Nothing;
            }
            (b"STREAM", Capture::Stream) => {
                let rows = decode_stream(&self.fields, &self.text, self.binary2, self.content)?;
                self.rows.extend(rows);
                self.text.clear();
                self.capture = Capture::Nothing;
            }
            (b"FIELD", _) => self.open_field = None,
            (b"TR", _) if self.in_table => {
                if self.cells.len() != self.fields.len() {
                    return Err(self.malformed(format!(
                        "row {} has {} cells for {} fields",
                        self.rows.len(),
                        self.cells.len(),
                        self.fields.len()
                    )));
                }
                let row = self
                    .fields
                    .iter()
                    .zip(&self.cells)
                    .map(|(f, raw)| f.text_value(raw, self.content))
                    .collect::<Result<Vec<_>, _>>()?;
                self.rows.push(row);
            }
            (b"TABLE", _) => {
                self.in_table = false;
                self.done = true;
            }
            _ => {}
        }
        Ok(())
    }

    fn finish(self) -> Result<Table, TapError> {
        if let Some(message) = self.query_error {
            let message = if message.is_empty() {
                "query failed without message".to_string()
            } else {
                message
            };
            return Err(TapError::ArchiveReported(ArchiveError::new(
                message,
                None,
                ErrorEnvelope::Votable,
            )));
        }
        if !self.table_seen {
            return Err(TapError::malformed_table(
                "no TABLE element in VOTable",
                self.content,
            ));
        }
        let mut columns: Vec<Column> = self.fields.into_iter().map(|f| f.column).collect();
        disambiguate_names(&mut columns);
        Table::new(columns, self.rows)
    }
}

fn decode_stream(
    fields: &[FieldSpec],
    encoded: &str,
    binary2: bool,
    content: &[u8],
) -> Result<Vec<Vec<Value>>, TapError> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| TapError::malformed_table(format!("invalid base64 stream: {e}"), content))?;

    let mask_len = fields.len().div_ceil(8);
    let mut cursor = ByteCursor::new(&bytes);
    let mut rows = Vec::new();

    while !cursor.is_empty() {
        let before = cursor.remaining();
        let truncated = || {
            TapError::malformed_table(
                format!("binary stream ends inside row {}", rows.len()),
                content,
            )
        };
        let mask = if binary2 {
            Some(cursor.take(mask_len).ok_or_else(truncated)?)
        } else {
            None
        };

        let mut row = Vec::with_capacity(fields.len());
        for (i, field) in fields.iter().enumerate() {
            let value = field.read_binary(&mut cursor).ok_or_else(truncated)?;
            let flagged = mask.is_some_and(|m| m[i / 8] & (0x80 >> (i % 8)) != 0);
            row.push(if flagged { Value::Null } else { value });
        }
        if cursor.remaining() == before {
            return Err(TapError::malformed_table(
                format!("{before} bytes left but a row consumes none"),
                content,
            ));
        }
        rows.push(row);
    }
    Ok(rows)
}

pub(crate) fn parse_votable(content: &[u8]) -> Result<Table, TapError> {
    let text = std::str::from_utf8(content)
        .map_err(|e| TapError::malformed_table(format!("VOTable is not UTF-8: {e}"), content))?;
    let mut xml = Reader::from_str(text);
    xml.config_mut().trim_text(true);

    let mut reader = VotableReader::new(content);
    while !reader.done {
        let event = xml
            .read_event()
            .map_err(|e| TapError::malformed_table(format!("invalid VOTable XML: {e}"), content))?;
        match event {
            Event::Start(e) => reader.open(&e, false)?,
            Event::Empty(e) => reader.open(&e, true)?,
            Event::End(e) => reader.close(e.local_name().as_ref())?,
            ev @ (Event::Text(_) | Event::CData(_)) => {
                if reader.capture != Capture::Nothing {
                    let chunk = event_text(ev)
                        .ok_or_else(|| reader.malformed("invalid character data"))?;
                    reader.text.push_str(&chunk);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    reader.finish()
}
