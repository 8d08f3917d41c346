//! Error types for trace parsing, cycle detection, and comparison

use thiserror::Error;

/// Errors surfaced by the analysis engine.
///
/// Malformed individual trace events are not represented here: the parser
/// skips them silently so that partial or truncated traces stay usable.
#[derive(Debug, Error)]
pub enum CicloError {
    /// The trace file cannot be opened, decompressed, or is not a JSON
    /// object with a `traceEvents` array.
    #[error("cannot read trace: {0}")]
    InputUnreadable(String),

    /// Parsing succeeded but no `cat == "kernel"`, `ph == "X"` events were
    /// retained.
    #[error("no kernel events found in trace")]
    NoKernelEvents,

    /// Too few events for cycle detection to make sense.
    #[error("not enough events for cycle detection ({found} found, need at least {required})")]
    InsufficientEvents { found: usize, required: usize },

    /// No candidate cycle survived validation.
    #[error("no repeating cycle found")]
    NoCycleFound,

    /// A comparison CSV is missing the mandatory columns.
    #[error("CSV missing required columns (kernel_name, avg_duration_us)")]
    ComparisonInputInvalid,

    /// A multi-sheet workbook was requested with a sheet-name list whose
    /// length disagrees with the comparison count.
    #[error("sheet name count ({names}) does not match comparison count ({comparisons})")]
    MismatchedSheetNames { names: usize, comparisons: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

pub type Result<T> = std::result::Result<T, CicloError>;
