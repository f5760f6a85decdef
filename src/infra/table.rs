// ============================================================
// Layer 6: CSV Tables
// ============================================================
// Reading and writing the small CSV artifacts the pipeline
// exchanges with the outside world:
//
//   queries file     → one `query` column of free text
//   predictions file → query,language,identifier,url
//   embedding cache  → one numeric column per dimension
//
// Fields containing a comma, quote or line break are quoted
// and inner quotes doubled. Writes go to a temporary sibling
// first and are renamed into place.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::error::{Result, SiameseError};
use crate::domain::prediction::PredictionRecord;

/// Header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows:   Vec<Vec<String>>,
}

impl Table {
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn join_row<S: AsRef<str>>(fields: &[S]) -> String {
    fields.iter().map(|f| escape(f.as_ref())).collect::<Vec<_>>().join(",")
}

/// Write `header` and `rows`, committing with a rename.
pub fn write_csv<S, R>(path: &Path, header: &[S], rows: impl IntoIterator<Item = R>) -> Result<()>
where
    S: AsRef<str>,
    R: AsRef<[String]>,
{
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(SiameseError::io(parent))?;
    }
    let tmp = path.with_extension("csv.tmp");
    {
        let file = File::create(&tmp).map_err(SiameseError::io(&tmp))?;
        let mut w = BufWriter::new(file);
        writeln!(w, "{}", join_row(header)).map_err(SiameseError::io(&tmp))?;
        for row in rows {
            writeln!(w, "{}", join_row(row.as_ref())).map_err(SiameseError::io(&tmp))?;
        }
        w.flush().map_err(SiameseError::io(&tmp))?;
    }
    std::fs::rename(&tmp, path).map_err(SiameseError::io(path))
}

pub fn read_csv(path: &Path) -> Result<Table> {
    if !path.is_file() {
        return Err(SiameseError::not_found(path, "csv file"));
    }
    let text = std::fs::read_to_string(path).map_err(SiameseError::io(path))?;
    let mut records = parse_records(&text).map_err(|reason| SiameseError::corrupt(path, "csv file", reason))?;
    if records.is_empty() {
        return Err(SiameseError::corrupt(path, "csv file", "missing header row"));
    }
    let header = records.remove(0);
    Ok(Table { header, rows: records })
}

fn parse_records(text: &str) -> std::result::Result<Vec<Vec<String>>, String> {
    let mut records = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut field));
                if !(row.len() == 1 && row[0].is_empty()) {
                    records.push(std::mem::take(&mut row));
                } else {
                    row.clear();
                }
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        records.push(row);
    }
    Ok(records)
}

/// Values of the `query` column, in file order.
pub fn read_queries(path: &Path) -> Result<Vec<String>> {
    let table = read_csv(path)?;
    let col = table
        .column("query")
        .ok_or_else(|| SiameseError::corrupt(path, "queries csv with a 'query' column", "no 'query' column"))?;
    Ok(table
        .rows
        .into_iter()
        .filter_map(|mut r| (col < r.len()).then(|| std::mem::take(&mut r[col])))
        .collect())
}

pub fn write_predictions(path: &Path, predictions: &[PredictionRecord]) -> Result<()> {
    let rows = predictions
        .iter()
        .map(|p| p.to_row().iter().map(|s| s.to_string()).collect::<Vec<String>>());
    write_csv(path, &PredictionRecord::HEADER, rows)?;
    tracing::info!("Wrote {} predictions to '{}'", predictions.len(), path.display());
    Ok(())
}
