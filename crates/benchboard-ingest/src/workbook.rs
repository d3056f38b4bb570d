use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Range, Reader};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::{MappingError, RawRow};

/// Reads the first worksheet of an `.xlsx`/`.xls`/`.ods` file into raw rows.
pub fn read_first_sheet(path: &Path) -> Result<Vec<RawRow>, MappingError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(MappingError::NoWorksheet)??;
    let rows = rows_from_range(&range);
    debug!(path = %path.display(), rows = rows.len(), "read worksheet");
    Ok(rows)
}

/// Same as [`read_first_sheet`] for an uploaded workbook held in memory.
pub fn read_first_sheet_from_bytes(bytes: Vec<u8>) -> Result<Vec<RawRow>, MappingError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(MappingError::NoWorksheet)??;
    Ok(rows_from_range(&range))
}

fn rows_from_range(range: &Range<Data>) -> Vec<RawRow> {
    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        return Vec::new();
    };
    let headers: Vec<String> = header_row
        .iter()
        .map(|cell| match cell {
            Data::Empty => String::new(),
            other => other.to_string().trim().to_string(),
        })
        .collect();

    rows.filter_map(|cells| {
        let mut row = Map::new();
        for (header, cell) in headers.iter().zip(cells) {
            if header.is_empty() {
                continue;
            }
            if let Some(value) = cell_value(cell) {
                row.insert(header.clone(), value);
            }
        }
        (!row.is_empty()).then_some(row)
    })
    .collect()
}

/// Date cells stay numeric so the mapper decodes them as serials.
fn cell_value(cell: &Data) -> Option<Value> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) if s.trim().is_empty() => None,
        Data::String(s) => Some(Value::String(s.clone())),
        Data::Int(i) => Some(Value::Number((*i).into())),
        Data::Float(f) => Number::from_f64(*f).map(Value::Number),
        Data::Bool(b) => Some(Value::Bool(*b)),
        Data::DateTime(dt) => Number::from_f64(dt.as_f64()).map(Value::Number),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Value::String(s.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    #[test]
    fn reads_header_row_and_skips_blank_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bench.xlsx");

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.write_string(0, 0, "VAMID").expect("header");
        sheet.write_string(0, 1, "Name").expect("header");
        sheet.write_string(0, 2, "Joining Date").expect("header");
        sheet.write_string(1, 0, "VAM1").expect("cell");
        sheet.write_string(1, 1, "Asha").expect("cell");
        sheet.write_number(1, 2, 45000.0).expect("cell");
        sheet.write_string(3, 1, "Only Name").expect("cell");
        workbook.save(&path).expect("save workbook");

        let rows = read_first_sheet(&path).expect("read workbook");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["VAMID"], "VAM1");
        assert_eq!(rows[0]["Joining Date"].as_f64(), Some(45000.0));
        assert!(rows[1].get("VAMID").is_none());
        assert_eq!(rows[1]["Name"], "Only Name");

        let bytes = std::fs::read(&path).expect("read bytes");
        assert_eq!(read_first_sheet_from_bytes(bytes).expect("read bytes"), rows);
    }

    #[test]
    fn garbage_bytes_are_a_workbook_error() {
        let err = read_first_sheet_from_bytes(b"not a workbook".to_vec()).unwrap_err();
        assert!(matches!(err, MappingError::Workbook(_)));
    }
}
