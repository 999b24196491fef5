//! CSV codec.

use crate::error::{PatternError, PatternResult};
use crate::types::{Sheet, Value};

use super::FormatCodec;

/// Comma-separated values with a header row.
///
/// CSV carries no types: decoded cells are text (blank cells are `Null`) and the
/// loader converts them against the field schema. `10.10` and `007` therefore come
/// back exactly as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvCodec {
    pub delimiter: u8,
}

impl Default for CsvCodec {
    fn default() -> Self {
        Self { delimiter: b',' }
    }
}

impl FormatCodec for CsvCodec {
    fn extension(&self) -> &str {
        "csv"
    }

    fn encode(&self, sheet: &Sheet) -> PatternResult<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(self.delimiter)
            .from_writer(Vec::new());
        writer.write_record(&sheet.headers)?;
        for row in &sheet.rows {
            let cells = (0..sheet.headers.len().max(row.len()))
                .map(|idx| row.get(idx).map(Value::to_string).unwrap_or_default());
            writer.write_record(cells)?;
        }
        writer
            .into_inner()
            .map_err(|err| PatternError::Io(err.into_error()))
    }

    fn decode(&self, data: &[u8]) -> PatternResult<Sheet> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(data);

        let headers: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for result in rdr.records() {
            let record = result?;
            rows.push(record.iter().map(parse_cell).collect());
        }
        Ok(Sheet::new(headers, rows))
    }
}

fn parse_cell(raw: &str) -> Value {
    if raw.trim().is_empty() {
        Value::Null
    } else {
        Value::Utf8(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_keeps_cells_as_written() {
        let data = b"name,ref,qty,price,active,note\nA,007,3,10.10,true,\nB,R-1,-2,1.0,false,  \n";
        let sheet = CsvCodec::default().decode(data).unwrap();

        assert_eq!(sheet.headers, ["name", "ref", "qty", "price", "active", "note"]);
        assert_eq!(
            sheet.rows[0],
            vec![
                Value::from("A"),
                Value::from("007"),
                Value::from("3"),
                Value::from("10.10"),
                Value::from("true"),
                Value::Null,
            ]
        );
        assert_eq!(sheet.rows[1][3], Value::from("1.0"));
        assert_eq!(sheet.rows[1][5], Value::Null);
    }

    #[test]
    fn encode_writes_nulls_as_empty_cells() {
        let sheet = Sheet::new(
            vec!["id".into(), "name".into()],
            vec![vec![Value::Null, Value::from("a, b")]],
        );
        let bytes = CsvCodec::default().encode(&sheet).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "id,name\n,\"a, b\"\n");
    }

    #[test]
    fn byte_order_mark_is_stripped_from_headers() {
        let sheet = CsvCodec::default().decode("\u{feff}id,name\nx,y\n".as_bytes()).unwrap();
        assert_eq!(sheet.headers[0], "id");
    }
}
