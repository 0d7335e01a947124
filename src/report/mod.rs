//! Report tables and the GATK report text format.

mod recal;
mod table;
mod writer;

pub use recal::{build_report, fingerprint, render_report, write_report, ReportInputs};
pub use table::{Cell, Column, ColumnFormat, ReportTable};
pub use writer::{GatkReportWriter, TableSink};

use thiserror::Error;

use crate::covariates::CovariateField;

/// Errors raised while assembling or writing a report.
#[derive(Debug, Error)]
pub enum ReportError {
    /// The destination could not be written.
    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),
    /// A row had the wrong number of cells.
    #[error("table {table}: expected {expected} cells per row, got {got}")]
    RowArity {
        /// Table name.
        table: String,
        /// Column count.
        expected: usize,
        /// Cells supplied.
        got: usize,
    },
    /// A key lacked a field its table should carry.
    #[error("{table} key has no {field} field")]
    MissingField {
        /// Schema name.
        table: &'static str,
        /// Missing field.
        field: CovariateField,
    },
    /// A key carried an unknown event code.
    #[error("unknown event type code {0}")]
    InvalidEvent(u32),
    /// Rendered text was not UTF-8.
    #[error("rendered report is not valid UTF-8")]
    NotUtf8,
}
