//! FITS binary table decoding.
//!
//! The file is a sequence of HDUs, each an ASCII header of 80-character cards packed in
//! 2880-byte blocks and terminated by `END`, followed by a data unit padded to 2880 bytes.
//! The first `XTENSION = 'BINTABLE'` HDU is decoded; the primary HDU and any other
//! extension are skipped.
//!
//! Supported `TFORM` codes: `L`, `B`, `I`, `J`, `K`, `E`, `D` (scalar or repeated) and `A`
//! (character string). `TNULLn` is honored on integer columns and `TSCALn`/`TZEROn` are
//! applied after the null check.
use std::collections::HashMap;

use itertools::Itertools;

use super::{fixed_width_text, ByteCursor};
use crate::table::{disambiguate_names, Column, DataType, Table, Value};
use crate::tap_errors::TapError;

const BLOCK: usize = 2880;
const CARD: usize = 80;

#[derive(Debug, Clone, PartialEq)]
enum CardValue {
    Text(String),
    Number(f64),
    Logical(bool),
}

#[derive(Debug, Default)]
struct Header {
    cards: HashMap<String, CardValue>,
}

impl Header {
    fn text(&self, key: &str) -> Option<&str> {
        match self.cards.get(key) {
            Some(CardValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    fn number(&self, key: &str) -> Option<f64> {
        match self.cards.get(key) {
            Some(CardValue::Number(x)) => Some(*x),
            _ => None,
        }
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.number(key).map(|x| x as i64)
    }

    fn usize_or(&self, key: &str, default: usize) -> usize {
        self.int(key)
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(default)
    }

    /// Size in bytes of the data unit following this header, before padding.
    ///
    /// `None` when the declared size does not fit in memory addresses.
    fn data_len(&self) -> Option<usize> {
        let naxis = self.usize_or("NAXIS", 0);
        if naxis == 0 {
            return Some(0);
        }
        let bytes_per_value = self.int("BITPIX").unwrap_or(8).unsigned_abs() as usize / 8;
        let axes = (1..=naxis)
            .map(|i| self.usize_or(&format!("NAXIS{i}"), 0))
            .try_fold(1usize, |acc, n| acc.checked_mul(n))?;
        let gcount = self.usize_or("GCOUNT", 1);
        let pcount = self.usize_or("PCOUNT", 0);
        pcount
            .checked_add(axes)?
            .checked_mul(gcount)?
            .checked_mul(bytes_per_value)
    }
}

fn parse_card_value(raw: &str) -> Option<CardValue> {
    let raw = raw.trim_start();
    if let Some(rest) = raw.strip_prefix('\'') {
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return Some(CardValue::Text(out.trim_end().to_string()));
    }
    let value = raw.split('/').next().unwrap_or("").trim();
    match value {
        "T" => Some(CardValue::Logical(true)),
        "F" => Some(CardValue::Logical(false)),
        "" => None,
        v => v
            .replace(['D', 'd'], "E")
            .parse::<f64>()
            .ok()
            .map(CardValue::Number),
    }
}

/// Read the header starting at `offset`; return it with the offset of its data unit.
fn read_header(content: &[u8], offset: usize) -> Result<(Header, usize), TapError> {
    let mut header = Header::default();
    let mut pos = offset;
    loop {
        let card = content
            .get(pos..pos + CARD)
            .ok_or_else(|| TapError::malformed_table("FITS header without END card", content))?;
        pos += CARD;
        let card = String::from_utf8_lossy(card);
        let key = card.get(..8).unwrap_or("").trim().to_string();
        if key == "END" {
            break;
        }
        if card.get(8..10) == Some("= ") {
            if let Some(value) = card.get(10..).and_then(parse_card_value) {
                header.cards.insert(key, value);
            }
        }
    }
    Ok((header, pos.next_multiple_of(BLOCK)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormCode {
    Logical,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Char,
}

impl FormCode {
    fn width(&self) -> usize {
        match self {
            FormCode::Logical | FormCode::Byte | FormCode::Char => 1,
            FormCode::Short => 2,
            FormCode::Int | FormCode::Float => 4,
            FormCode::Long | FormCode::Double => 8,
        }
    }

    fn datatype(&self) -> DataType {
        match self {
            FormCode::Logical => DataType::Boolean,
            FormCode::Byte => DataType::UnsignedByte,
            FormCode::Short => DataType::Short,
            FormCode::Int => DataType::Int,
            FormCode::Long => DataType::Long,
            FormCode::Float => DataType::Float,
            FormCode::Double => DataType::Double,
            FormCode::Char => DataType::Char,
        }
    }

    fn is_integer(&self) -> bool {
        matches!(
            self,
            FormCode::Byte | FormCode::Short | FormCode::Int | FormCode::Long
        )
    }
}

#[derive(Debug, Clone)]
struct BinColumn {
    column: Column,
    code: FormCode,
    repeat: usize,
    null: Option<i64>,
    scale: f64,
    zero: f64,
}

impl BinColumn {
    fn from_header(header: &Header, i: usize, content: &[u8]) -> Result<Self, TapError> {
        let name = header
            .text(&format!("TTYPE{i}"))
            .map(str::to_string)
            .unwrap_or_else(|| format!("col{i}"));
        let tform = header.text(&format!("TFORM{i}")).ok_or_else(|| {
            TapError::malformed_table(format!("missing TFORM{i} for column `{name}`"), content)
        })?;
        let tform = tform.trim();
        let split = tform
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| TapError::malformed_table(format!("invalid TFORM `{tform}`"), content))?;
        let repeat = if split == 0 {
            1
        } else {
            tform[..split].parse::<usize>().map_err(|_| {
                TapError::malformed_table(format!("invalid TFORM `{tform}`"), content)
            })?
        };
        let code = match tform[split..].chars().next().unwrap_or(' ') {
            'L' => FormCode::Logical,
            'B' => FormCode::Byte,
            'I' => FormCode::Short,
            'J' => FormCode::Int,
            'K' => FormCode::Long,
            'E' => FormCode::Float,
            'D' => FormCode::Double,
            'A' => FormCode::Char,
            other => {
                return Err(TapError::malformed_table(
                    format!("unsupported TFORM code `{other}` for column `{name}`"),
                    content,
                ))
            }
        };

        let scale = header.number(&format!("TSCAL{i}")).unwrap_or(1.0);
        let zero = header.number(&format!("TZERO{i}")).unwrap_or(0.0);
        let scaled_to_float = code.is_integer() && (scale != 1.0 || zero.fract() != 0.0);
        let datatype = if code != FormCode::Char && repeat != 1 {
            DataType::Char
        } else if scaled_to_float {
            DataType::Double
        } else if code.is_integer() && zero != 0.0 {
            DataType::Long
        } else {
            code.datatype()
        };

        let mut column = Column::new(name, datatype);
        column.unit = header
            .text(&format!("TUNIT{i}"))
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(BinColumn {
            column,
            code,
            repeat,
            null: header.int(&format!("TNULL{i}")),
            scale,
            zero,
        })
    }

    fn width(&self) -> Option<usize> {
        self.code.width().checked_mul(self.repeat)
    }

    fn read_element(&self, cursor: &mut ByteCursor<'_>) -> Option<Value> {
        let raw_int = match self.code {
            FormCode::Logical => {
                return Some(match cursor.u8()? {
                    b'T' => Value::Bool(true),
                    b'F' => Value::Bool(false),
                    _ => Value::Null,
                })
            }
            FormCode::Float => return Some(self.float(cursor.f32()? as f64)),
            FormCode::Double => return Some(self.float(cursor.f64()?)),
            FormCode::Char => return None,
            FormCode::Byte => cursor.u8()? as i64,
            FormCode::Short => cursor.i16()? as i64,
            FormCode::Int => cursor.i32()? as i64,
            FormCode::Long => cursor.i64()?,
        };
        if self.null == Some(raw_int) {
            return Some(Value::Null);
        }
        Some(if self.scale == 1.0 && self.zero.fract() == 0.0 {
            Value::Int(raw_int + self.zero as i64)
        } else {
            Value::Float(raw_int as f64 * self.scale + self.zero)
        })
    }

    fn float(&self, x: f64) -> Value {
        if x.is_nan() {
            Value::Null
        } else {
            Value::Float(x * self.scale + self.zero)
        }
    }

    fn read(&self, cursor: &mut ByteCursor<'_>) -> Option<Value> {
        if self.code == FormCode::Char {
            let text = fixed_width_text(cursor.take(self.repeat)?);
            return Some(if text.is_empty() {
                Value::Null
            } else {
                Value::Text(text)
            });
        }
        match self.repeat {
            0 => Some(Value::Null),
            1 => self.read_element(cursor),
            n => {
                let items = (0..n)
                    .map(|_| self.read_element(cursor))
                    .collect::<Option<Vec<_>>>()?;
                Some(Value::Text(items.iter().join(" ")))
            }
        }
    }
}

pub(crate) fn parse_fits(content: &[u8]) -> Result<Table, TapError> {
    if !content.starts_with(b"SIMPLE  =") {
        return Err(TapError::malformed_table(
            "not a FITS file (missing SIMPLE card)",
            content,
        ));
    }

    let mut offset = 0;
    loop {
        let (header, data_start) = read_header(content, offset)?;
        let is_bintable = offset > 0 && header.text("XTENSION") == Some("BINTABLE");
        if is_bintable {
            return read_bintable(&header, content, data_start);
        }
        offset = match header
            .data_len()
            .and_then(|n| n.checked_next_multiple_of(BLOCK))
            .and_then(|n| data_start.checked_add(n))
        {
            Some(next) => next,
            None => {
                return Err(TapError::malformed_table(
                    "FITS data unit size overflows",
                    content,
                ))
            }
        };
        if offset >= content.len() {
            return Err(TapError::malformed_table(
                "no BINTABLE extension in FITS file",
                content,
            ));
        }
    }
}

fn read_bintable(header: &Header, content: &[u8], data_start: usize) -> Result<Table, TapError> {
    let row_len = header.usize_or("NAXIS1", 0);
    let num_rows = header.usize_or("NAXIS2", 0);
    let num_fields = header.usize_or("TFIELDS", 0);

    let columns = (1..=num_fields)
        .map(|i| BinColumn::from_header(header, i, content))
        .collect::<Result<Vec<_>, _>>()?;

    let declared = columns
        .iter()
        .try_fold(0usize, |acc, c| acc.checked_add(c.width()?));
    if declared != Some(row_len) {
        return Err(TapError::malformed_table(
            format!(
                "columns span {} bytes but NAXIS1 = {row_len}",
                declared.map_or_else(|| "an overflowing number of".to_string(), |d| d.to_string())
            ),
            content,
        ));
    }
    if row_len == 0 && num_rows > 0 {
        return Err(TapError::malformed_table(
            format!("{num_rows} rows of zero bytes"),
            content,
        ));
    }
    let data = row_len
        .checked_mul(num_rows)
        .and_then(|len| data_start.checked_add(len))
        .and_then(|end| content.get(data_start..end))
        .ok_or_else(|| {
            TapError::malformed_table(
                format!("data unit shorter than {num_rows} rows of {row_len} bytes"),
                content,
            )
        })?;

    let mut cursor = ByteCursor::new(data);
    let mut rows = Vec::with_capacity(num_rows.min(data.len() / row_len.max(1)));
    for r in 0..num_rows {
        let row = columns
            .iter()
            .map(|c| c.read(&mut cursor))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                TapError::malformed_table(format!("row {r} is truncated"), content)
            })?;
        rows.push(row);
    }

    let mut columns: Vec<Column> = columns.into_iter().map(|c| c.column).collect();
    disambiguate_names(&mut columns);
    Table::new(columns, rows)
}
