//! XLSX codec (feature `excel`): `calamine` reads, `rust_xlsxwriter` writes.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::error::{PatternError, PatternResult};
use crate::types::{Sheet, Value};

use super::FormatCodec;

/// Longest worksheet name Excel accepts.
const MAX_SHEET_NAME: usize = 31;

/// Single-sheet workbooks.
///
/// Decoding reads the first sheet and takes its first non-empty row as the header
/// row. Encoding names the sheet after [`Sheet::title`], falling back to
/// `default_sheet_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcelCodec {
    pub default_sheet_name: String,
}

impl Default for ExcelCodec {
    fn default() -> Self {
        Self {
            default_sheet_name: "Sheet1".to_string(),
        }
    }
}

impl FormatCodec for ExcelCodec {
    fn extension(&self) -> &str {
        "xlsx"
    }

    fn encode(&self, sheet: &Sheet) -> PatternResult<Vec<u8>> {
        let mut workbook = Workbook::new();
        {
            let worksheet = workbook.add_worksheet();
            let name = sheet
                .title
                .as_deref()
                .map(sheet_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| self.default_sheet_name.clone());
            worksheet.set_name(name)?;

            for (col, header) in sheet.headers.iter().enumerate() {
                worksheet.write_string(0, column(col)?, header)?;
            }
            for (idx0, row) in sheet.rows.iter().enumerate() {
                let line = u32::try_from(idx0 + 1)
                    .map_err(|_| PatternError::config("too many rows for a worksheet"))?;
                for (col, value) in row.iter().enumerate() {
                    write_cell(worksheet, line, column(col)?, value)?;
                }
            }
        }
        Ok(workbook.save_to_buffer()?)
    }

    fn decode(&self, data: &[u8]) -> PatternResult<Sheet> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(data.to_vec()))?;
        let Some(name) = workbook.sheet_names().first().cloned() else {
            return Err(PatternError::config("workbook has no sheets"));
        };
        let range = workbook.worksheet_range(&name)?;

        let blank = range
            .rows()
            .take_while(|row| row.iter().all(|c| matches!(c, Data::Empty)))
            .count();
        // The range starts at the first used cell, not at cell A1.
        let start = range.start().map_or(0, |(row, _)| row as usize);
        let mut rows = range.rows().skip(blank);
        let headers: Vec<String> = rows
            .next()
            .map(|row| row.iter().map(|c| cell_to_header_string(c).trim().to_string()).collect())
            .unwrap_or_default();
        let rows = rows
            .map(|row| row.iter().map(convert_cell).collect())
            .collect();

        Ok(Sheet {
            title: Some(name),
            headers,
            rows,
            skipped_lines: start + blank,
        })
    }
}

fn column(idx: usize) -> PatternResult<u16> {
    u16::try_from(idx).map_err(|_| PatternError::config("too many columns for a worksheet"))
}

fn write_cell(worksheet: &mut Worksheet, row: u32, col: u16, value: &Value) -> PatternResult<()> {
    match value {
        Value::Null => {}
        Value::Int64(i) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        Value::Float64(f) => {
            worksheet.write_number(row, col, *f)?;
        }
        Value::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Value::Utf8(s) => {
            worksheet.write_string(row, col, s)?;
        }
    }
    Ok(())
}

/// Worksheet names cannot contain `[]:*?/\` and are limited in length.
fn sheet_name(title: &str) -> String {
    title
        .chars()
        .map(|c| if "[]:*?/\\".contains(c) { '_' } else { c })
        .take(MAX_SHEET_NAME)
        .collect::<String>()
        .trim_matches('\'')
        .to_string()
}

fn cell_to_header_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
        Data::Empty => String::new(),
        _ => c.to_string(),
    }
}

fn convert_cell(c: &Data) -> Value {
    match c {
        Data::Empty => Value::Null,
        Data::String(s) if s.is_empty() => Value::Null,
        Data::String(s) => Value::Utf8(s.clone()),
        Data::Int(i) => Value::Int64(*i),
        Data::Float(f) => Value::Float64(*f),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(d) => Value::Utf8(d.to_string()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Utf8(s.clone()),
        Data::Error(e) => Value::Utf8(format!("{e:?}")),
    }
}
