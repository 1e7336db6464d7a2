use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::run_program;
use crate::error::Result;

/// Convert a finished workbook to PDF next to it with a headless office suite.
pub fn workbook_to_pdf(office: &str, workbook: &Path) -> Result<PathBuf> {
    let outdir = workbook
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));

    run_program(
        office,
        Command::new(office)
            .args(["--headless", "--convert-to", "pdf", "--outdir"])
            .arg(outdir)
            .arg(workbook),
    )?;

    let pdf = outdir.join(workbook.with_extension("pdf").file_name().unwrap_or_default());
    info!(path = %pdf.display(), "converted workbook");
    Ok(pdf)
}
