//! Spreadsheet ingestion for the reference corpus.
//!
//! Accepts `.csv` and `.xlsx` uploads whose first row is a header. Columns are
//! matched case-insensitively by English or Spanish name; a title and a label
//! column are required, body and source are optional.

use std::io::Cursor;
use std::path::Path;

use calamine::{open_workbook_from_rs, Reader, Xlsx, XlsxError};
use thiserror::Error;

use crate::record::ReferenceArticle;

const TITLE: &[&str] = &["title", "titulo", "título"];
const BODY: &[&str] = &["body", "cuerpo", "contenido", "texto"];
const SOURCE: &[&str] = &["source", "fuente"];
const LABEL: &[&str] = &["label", "etiqueta"];

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("unsupported file type {0:?}; expected .csv or .xlsx")]
    UnsupportedFormat(String),
    #[error("dataset has no {0} column")]
    MissingColumn(&'static str),
    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("unreadable workbook: {0}")]
    Workbook(#[from] XlsxError),
    #[error("workbook has no sheets")]
    EmptyWorkbook,
}

/// Parse an uploaded file into reference articles, picking the reader by extension.
/// Fully blank rows are dropped; untitled rows are kept for the caller to count.
pub fn parse_dataset(file_name: &str, bytes: &[u8]) -> Result<Vec<ReferenceArticle>, DatasetError> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let rows = match ext.as_str() {
        "csv" => csv_rows(bytes)?,
        "xlsx" => xlsx_rows(bytes)?,
        _ => return Err(DatasetError::UnsupportedFormat(file_name.to_string())),
    };
    to_articles(rows)
}

fn csv_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, DatasetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let mut rows = Vec::new();
    for record in reader.records() {
        rows.push(record?.iter().map(str::to_string).collect());
    }
    Ok(rows)
}

/// First sheet only.
fn xlsx_rows(bytes: &[u8]) -> Result<Vec<Vec<String>>, DatasetError> {
    let mut book: Xlsx<_> = open_workbook_from_rs(Cursor::new(bytes))?;
    let range = book
        .worksheet_range_at(0)
        .ok_or(DatasetError::EmptyWorkbook)??;
    Ok(range
        .rows()
        .map(|row| row.iter().map(|c| c.to_string().trim().to_string()).collect())
        .collect())
}

struct Columns {
    title: usize,
    body: Option<usize>,
    source: Option<usize>,
    label: usize,
}

impl Columns {
    fn locate(header: &[String]) -> Result<Self, DatasetError> {
        let names: Vec<String> = header
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
            .collect();
        let find = |aliases: &[&str]| names.iter().position(|n| aliases.contains(&n.as_str()));
        Ok(Self {
            title: find(TITLE).ok_or(DatasetError::MissingColumn("title"))?,
            body: find(BODY),
            source: find(SOURCE),
            label: find(LABEL).ok_or(DatasetError::MissingColumn("label"))?,
        })
    }

    fn article(&self, row: &[String]) -> ReferenceArticle {
        let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
        ReferenceArticle {
            title: cell(self.title),
            body: self.body.map(cell).unwrap_or_default(),
            source: self.source.map(cell).unwrap_or_default(),
            label: cell(self.label),
        }
    }
}

fn to_articles(rows: Vec<Vec<String>>) -> Result<Vec<ReferenceArticle>, DatasetError> {
    let mut rows = rows.into_iter();
    let header = rows.next().unwrap_or_default();
    let columns = Columns::locate(&header)?;
    Ok(rows
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .map(|r| columns.article(&r))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spanish_headers_in_any_order() {
        let csv = "\u{feff}Etiqueta,Fuente,Titulo,Cuerpo\n\
                   falso,WhatsApp,Corte de agua total,\"Mensaje, reenviado\"\n\
                   real , RPP ,Bono familiar,Anuncio oficial\n";
        let articles = parse_dataset("muestra.CSV", csv.as_bytes()).unwrap();
        assert_eq!(
            articles,
            vec![
                ReferenceArticle {
                    title: "Corte de agua total".into(),
                    body: "Mensaje, reenviado".into(),
                    source: "WhatsApp".into(),
                    label: "falso".into(),
                },
                ReferenceArticle {
                    title: "Bono familiar".into(),
                    body: "Anuncio oficial".into(),
                    source: "RPP".into(),
                    label: "real".into(),
                },
            ]
        );
    }

    #[test]
    fn short_and_blank_rows() {
        let csv = "title,label,body\nSolo titulo\n,,\nCon etiqueta,real\n";
        let articles = parse_dataset("d.csv", csv.as_bytes()).unwrap();
        assert_eq!(articles.len(), 2);
        assert_eq!(articles[0].label, "");
        assert_eq!(articles[1].label, "real");
        assert_eq!(articles[1].body, "");
    }

    #[test]
    fn label_column_is_required() {
        let err = parse_dataset("d.csv", b"title,body\nUno,dos\n").unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn("label")));
        let err = parse_dataset("d.csv", b"").unwrap_err();
        assert!(matches!(err, DatasetError::MissingColumn("title")));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        let err = parse_dataset("notas.txt", b"title,label\n").unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedFormat(_)));
        let err = parse_dataset("sin_extension", b"").unwrap_err();
        assert!(matches!(err, DatasetError::UnsupportedFormat(_)));
    }

    #[test]
    fn garbage_workbook_is_an_error() {
        let err = parse_dataset("corpus.xlsx", b"not a zip archive").unwrap_err();
        assert!(matches!(err, DatasetError::Workbook(_)));
    }
}
