//! Spreadsheets (XLSX, XLSM, XLSB, XLS, ODS) via calamine.
//!
//! Each worksheet becomes a `## <sheet name>` section holding one GFM table;
//! the first used row is the header. Empty sheets get the heading only.

use super::{corrupt, markdown_table, ooxml, Block};
use crate::error::Doc2MdError;
use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;
use tracing::debug;

pub(super) fn extract(path: &Path, name: &str) -> Result<Vec<Block>, Doc2MdError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| classify(path, name, e))?;

    let mut out = String::new();
    for sheet in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|e| classify(path, name, e))?;
        let rows: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect())
            .collect();
        debug!("{}: sheet {:?} has {} rows", name, sheet, rows.len());

        out.push_str(&format!("## {sheet}\n\n"));
        let table = markdown_table(&rows);
        if !table.is_empty() {
            out.push_str(&table);
            out.push('\n');
        }
    }
    Ok(vec![Block::Markdown(out)])
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::Error(e) => format!("#{e:?}"),
        other => other.to_string(),
    }
}

fn classify(path: &Path, name: &str, err: calamine::Error) -> Doc2MdError {
    let detail = err.to_string();
    let lower = detail.to_lowercase();
    let ole_workbook = is_ooxml(name) && ooxml::is_ole_container(path);
    if ole_workbook || lower.contains("password") || lower.contains("encrypt") {
        Doc2MdError::EncryptedFile {
            name: name.to_string(),
        }
    } else {
        corrupt(name, detail)
    }
}

/// Encrypted XLSX files are OLE containers rather than ZIPs.
fn is_ooxml(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.ends_with(".xlsx") || lower.ends_with(".xlsm")
}
