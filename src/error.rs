use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = InvoiceError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum InvoiceError {
    /// Required order columns absent after header normalization.
    #[error("orders file is missing required columns (after normalization): {}", .missing.join(", "))]
    Schema { missing: Vec<String> },

    /// The template workbook has no layout sheet to copy.
    #[error("{} must contain a sheet named '{sheet}' (case-sensitive)", .path.display())]
    Template { path: PathBuf, sheet: String },

    #[error("failed to read orders from {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to open template workbook {}: {source}", .path.display())]
    Workbook {
        path: PathBuf,
        #[source]
        source: calamine::Error,
    },

    #[error("failed to build workbook: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error(
        "could not write {}: {source} (close it if it's open in Excel/LibreOffice, or delete the existing file and try again)",
        .path.display()
    )]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration in {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid cell reference '{0}'")]
    CellRef(String),

    #[error("template rendering failed: {0}")]
    Render(#[from] tera::Error),

    #[error("failed to serialize JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("'{program}' failed: {detail}")]
    Converter { program: String, detail: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}
