use std::io::Cursor;

use calamine::{Data, Reader, Xlsx};
use chrono::NaiveDate;
use rust_xlsxwriter::Workbook;
use thiserror::Error;

/// Column contract of the document spreadsheet: header name and template
/// column width, in file order. Legacy exports and the generated template
/// both follow it.
pub const DOCUMENT_COLUMNS: [(&str, f64); 14] = [
    ("macro_proceso", 25.0),
    ("proceso", 30.0),
    ("subproceso", 30.0),
    ("tipo_documentacion", 20.0),
    ("codigo", 15.0),
    ("titulo", 40.0),
    ("version", 10.0),
    ("fecha_creacion", 15.0),
    ("revisa", 25.0),
    ("aprueba", 25.0),
    ("fecha_aprobacion", 18.0),
    ("autor", 30.0),
    ("estado", 15.0),
    ("link_acceso", 50.0),
];

const TEMPLATE_SHEET: &str = "Documentos";

const TEMPLATE_EXAMPLE_ROW: [&str; 14] = [
    "Gestión Estratégica",
    "Planeación Estratégica",
    "Formulación de Objetivos",
    "Manual",
    "MAN-GE-001",
    "Manual de Gestión Estratégica",
    "1.0",
    "2024-01-15",
    "Coordinador de Calidad",
    "Rector",
    "2024-01-20",
    "Oficina de Planeación",
    "vigente",
    "",
];

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("could not read workbook: {0}")]
    Read(#[from] calamine::XlsxError),
    #[error("workbook has no sheets")]
    NoSheet,
    #[error("could not build workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),
}

/// First worksheet of an `.xlsx` file, header row plus data rows.
pub struct Sheet {
    headers: Vec<String>,
    rows: Vec<Vec<Data>>,
}

impl Sheet {
    pub fn from_xlsx(bytes: &[u8]) -> Result<Self, SheetError> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or(SheetError::NoSheet)??;
        let mut rows = range.rows();
        // Header names are matched case-insensitively.
        let headers = rows
            .next()
            .map(|cells| {
                cells
                    .iter()
                    .map(|cell| cell_text(cell).unwrap_or_default().to_lowercase())
                    .collect()
            })
            .unwrap_or_default();
        let rows = rows.map(|cells| cells.to_vec()).collect();
        Ok(Self { headers, rows })
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.rows.iter().map(|cells| Row {
            headers: &self.headers,
            cells,
        })
    }
}

/// One data row, cells addressable by header name or position.
pub struct Row<'a> {
    headers: &'a [String],
    cells: &'a [Data],
}

impl Row<'_> {
    pub fn cell(&self, header: &str) -> Option<&Data> {
        let index = self.headers.iter().position(|h| h == header)?;
        self.cells.get(index)
    }

    pub fn cell_at(&self, index: usize) -> Option<&Data> {
        self.cells.get(index)
    }

    /// Trimmed cell text; `None` when the cell is empty or blank.
    pub fn text(&self, header: &str) -> Option<String> {
        self.cell(header).and_then(cell_text)
    }

    pub fn text_at(&self, index: usize) -> Option<String> {
        self.cell_at(index).and_then(cell_text)
    }

    /// Calendar date from a date-formatted cell, a raw Excel serial, or a
    /// `YYYY-MM-DD` / `DD/MM/YYYY` string.
    pub fn date(&self, header: &str) -> Option<NaiveDate> {
        cell_date(self.cell(header)?)
    }
}

fn cell_text(cell: &Data) -> Option<String> {
    let text = match cell {
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                f.to_string()
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => {
            let date = dt.as_datetime()?.date();
            date.format("%Y-%m-%d").to_string()
        }
        Data::Empty | Data::Error(_) => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn cell_date(cell: &Data) -> Option<NaiveDate> {
    match cell {
        Data::DateTime(dt) => dt.as_datetime().map(|naive| naive.date()),
        Data::Float(f) => excel_serial_to_date(*f),
        Data::Int(i) => excel_serial_to_date(*i as f64),
        Data::String(s) | Data::DateTimeIso(s) => parse_date_text(s.trim()),
        _ => None,
    }
}

/// Excel day serials count from 1899-12-30 (serial 25569 = 1970-01-01).
pub fn excel_serial_to_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || !(1.0..3_000_000.0).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    base.checked_add_days(chrono::Days::new(serial.trunc() as u64))
}

pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .ok()
}

/// Import template: one sheet, the 14-column header row, one example row.
pub fn document_template() -> Result<Vec<u8>, SheetError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(TEMPLATE_SHEET)?;
    for (index, (header, width)) in DOCUMENT_COLUMNS.iter().enumerate() {
        let col = index as u16;
        sheet.write_string(0, col, *header)?;
        sheet.set_column_width(col, *width)?;
    }
    for (index, value) in TEMPLATE_EXAMPLE_ROW.iter().enumerate() {
        sheet.write_string(1, index as u16, *value)?;
    }
    Ok(workbook.save_to_buffer()?)
}

/// Row-error report handed back from bulk user uploads: sheet `Errores`,
/// one row per rejected spreadsheet row.
pub fn error_report(entries: &[(u32, String, String)]) -> Result<Vec<u8>, SheetError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Errores")?;
    for (col, header) in ["fila", "email", "error"].iter().enumerate() {
        sheet.write_string(0, col as u16, *header)?;
    }
    sheet.set_column_width(1, 35.0)?;
    sheet.set_column_width(2, 60.0)?;
    for (index, (row, email, message)) in entries.iter().enumerate() {
        let out = index as u32 + 1;
        sheet.write_number(out, 0, *row as f64)?;
        sheet.write_string(out, 1, email)?;
        sheet.write_string(out, 2, message)?;
    }
    Ok(workbook.save_to_buffer()?)
}
