//! Writers for rendered invoices, plus the external converters they call.

pub mod convert;
pub mod typst;
pub mod xlsx;

use std::process::Command;

use crate::error::{InvoiceError, Result};

/// `1234.5` → `$1,234.50`
pub fn format_currency(amount: f64) -> String {
    let cents = (amount.abs() * 100.0).round() as u64;
    let digits = (cents / 100).to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if amount < 0.0 && cents > 0 { "-" } else { "" };
    format!("{sign}${grouped}.{:02}", cents % 100)
}

/// Run an external program to completion; non-zero exit carries its stderr.
pub(crate) fn run_program(program: &str, command: &mut Command) -> Result<()> {
    let output = command.output().map_err(|e| InvoiceError::Converter {
        program: program.to_string(),
        detail: format!("could not start ({e}); is it installed and on PATH?"),
    })?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(InvoiceError::Converter {
        program: program.to_string(),
        detail: format!("exited with {}: {}", output.status, stderr.trim()),
    })
}
