//! Table format and rows
//!
//! A table format is a fixed list of named, typed columns declared in a
//! loader's `format` meta:
//!
//! ```text
//! format: [ { name: "time", type: "number" }, { name: "value", type: "number" } ]
//! ```
//!
//! Rows are stored one per line, cells separated by tabs. In string cells
//! `\`, tab, newline, carriage return and `#` are backslash-escaped; an empty
//! string is written as `\e` and the string "null" as `\null` so neither
//! collides with the null cell or a blank line. A leading whitespace
//! character is written as `\u{hex}`, so no encoded cell starts with
//! whitespace and no encoded row is blank.

use crate::error::{Result, ShelfError};
use crate::meta::Meta;
use crate::value::{Value, ValueType};

/// Cell separator
const SEPARATOR: char = '\t';

/// A named, typed column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnFormat {
    pub name: String,
    pub value_type: ValueType,
}

impl ColumnFormat {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Fixed column schema of a table loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableFormat {
    columns: Vec<ColumnFormat>,
}

/// One table row; values are in column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

impl<V: Into<Value>> FromIterator<V> for Row {
    fn from_iter<T: IntoIterator<Item = V>>(iter: T) -> Self {
        Row::new(iter.into_iter().map(Into::into).collect())
    }
}

impl TableFormat {
    pub fn new(columns: Vec<ColumnFormat>) -> Result<Self> {
        if columns.is_empty() {
            return Err(ShelfError::Config("Table format has no columns".to_string()));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i].iter().any(|c| c.name == column.name) {
                return Err(ShelfError::Config(format!(
                    "Duplicate column '{}' in table format",
                    column.name
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Parse the `format` list of a loader meta
    pub fn from_meta(meta: &Meta) -> Result<Self> {
        let columns = meta
            .get_nodes("format")
            .into_iter()
            .map(|node| {
                let name = node.get_str("name").ok_or_else(|| {
                    ShelfError::Config("Column declaration without 'name'".to_string())
                })?;
                let value_type = ValueType::parse(node.get_str("type").unwrap_or("string"))?;
                Ok(ColumnFormat::new(name, value_type))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(columns)
    }

    /// The `format` list as meta nodes
    pub fn to_meta(&self) -> Vec<Meta> {
        self.columns
            .iter()
            .map(|c| {
                Meta::new()
                    .with("name", c.name.as_str())
                    .with("type", c.value_type.as_str())
            })
            .collect()
    }

    pub fn columns(&self) -> &[ColumnFormat] {
        &self.columns
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Value of the named column in `row`
    pub fn value_of<'a>(&self, row: &'a Row, name: &str) -> Option<&'a Value> {
        row.get(self.position(name)?)
    }

    /// Check arity and cell types (nulls fit any column)
    pub fn validate(&self, row: &Row) -> Result<()> {
        if row.values.len() != self.columns.len() {
            return Err(ShelfError::Schema(format!(
                "Expected {} values, got {}",
                self.columns.len(),
                row.values.len()
            )));
        }
        for (column, value) in self.columns.iter().zip(&row.values) {
            if let Some(actual) = value.value_type() {
                if actual != column.value_type {
                    return Err(ShelfError::Schema(format!(
                        "Column '{}' expects {}, got {}",
                        column.name,
                        column.value_type.as_str(),
                        actual.as_str()
                    )));
                }
            }
        }
        Ok(())
    }

    // =========================================================================
    // Line Codec
    // =========================================================================

    /// Encode a row as one newline-terminated line
    pub fn encode(&self, row: &Row) -> Result<String> {
        self.validate(row)?;
        let mut line = String::new();
        for (i, value) in row.values.iter().enumerate() {
            if i > 0 {
                line.push(SEPARATOR);
            }
            match value {
                Value::String(s) => escape_into(s, &mut line),
                other => line.push_str(&other.to_string()),
            }
        }
        line.push('\n');
        Ok(line)
    }

    /// Decode one line (without its newline) into a row
    pub fn decode(&self, line: &str) -> Result<Row> {
        let cells: Vec<&str> = line.split(SEPARATOR).collect();
        if cells.len() != self.columns.len() {
            return Err(ShelfError::Schema(format!(
                "Expected {} cells, got {} in line {:?}",
                self.columns.len(),
                cells.len(),
                line
            )));
        }
        let values = self
            .columns
            .iter()
            .zip(cells)
            .map(|(column, cell)| match column.value_type {
                ValueType::String if cell != "null" => unescape(cell).map(Value::String),
                value_type => Value::parse_as(cell, value_type),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Row::new(values))
    }
}

fn escape_into(s: &str, out: &mut String) {
    match s {
        "" => out.push_str("\\e"),
        "null" => out.push_str("\\null"),
        _ => {
            for (i, c) in s.chars().enumerate() {
                match c {
                    c if i == 0 && c.is_whitespace() && !matches!(c, '\t' | '\n' | '\r') => {
                        out.push_str(&format!("\\u{{{:x}}}", c as u32))
                    }
                    '\\' => out.push_str("\\\\"),
                    '\t' => out.push_str("\\t"),
                    '\n' => out.push_str("\\n"),
                    '\r' => out.push_str("\\r"),
                    '#' => out.push_str("\\#"),
                    c => out.push(c),
                }
            }
        }
    }
}

fn unescape(cell: &str) -> Result<String> {
    match cell {
        "\\e" => return Ok(String::new()),
        "\\null" => return Ok("null".to_string()),
        _ => {}
    }
    let mut out = String::with_capacity(cell.len());
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('#') => out.push('#'),
            Some('u') => out.push(unescape_code_point(&mut chars, cell)?),
            other => {
                return Err(ShelfError::Schema(format!(
                    "Invalid escape sequence \\{} in cell {:?}",
                    other.map(String::from).unwrap_or_default(),
                    cell
                )))
            }
        }
    }
    Ok(out)
}

/// Reads the `{hex}` part of a `\u{hex}` escape
fn unescape_code_point(chars: &mut std::str::Chars<'_>, cell: &str) -> Result<char> {
    let invalid = || ShelfError::Schema(format!("Invalid \\u escape in cell {:?}", cell));
    if chars.next() != Some('{') {
        return Err(invalid());
    }
    let mut hex = String::new();
    loop {
        match chars.next() {
            Some('}') => break,
            Some(c) if c.is_ascii_hexdigit() => hex.push(c),
            _ => return Err(invalid()),
        }
    }
    u32::from_str_radix(&hex, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(invalid)
}
