//! CLI argument parsing for ciclo

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::compare::CompareMode;

/// Detection output mode for `analyze`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum DetectMode {
    /// Output every detected cycle pattern (`<base>_cycle_N.csv`)
    All,
    /// Detect prefill and decode phases (`<base>_prefill.csv`, `<base>_decode.csv`)
    Llm,
}

/// Comparison strategy for `compare-csv`.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CompareModeArg {
    /// Position-based alignment with automatic rotation detection
    Align,
    /// Signature-based matching, position-independent
    Match,
}

impl From<CompareModeArg> for CompareMode {
    fn from(mode: CompareModeArg) -> Self {
        match mode {
            CompareModeArg::Align => CompareMode::Align,
            CompareModeArg::Match => CompareMode::Match,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "ciclo")]
#[command(version)]
#[command(about = "Perfetto trace cycle detector and kernel comparison tool", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Detect repeating kernel cycles in a trace and write per-cycle CSVs
    Analyze(AnalyzeArgs),
    /// Compare two previously extracted cycle CSVs
    CompareCsv(CompareCsvArgs),
    /// Compare every <base>_cycle_N.csv pair into one multi-sheet workbook
    CompareAll(CompareAllArgs),
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Path to the Perfetto JSON trace file (.json or .json.gz)
    #[arg(short, long)]
    pub input: String,

    /// Output base path for CSV files (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Detection mode
    #[arg(long, value_enum, default_value = "all")]
    pub mode: DetectMode,

    /// Collapse triton_<...>_<digits> instance counters before matching
    #[arg(long)]
    pub normalize_names: bool,

    /// Suppress the per-cycle summary on stderr
    #[arg(long)]
    pub no_summary: bool,
}

#[derive(Args, Debug)]
pub struct CompareCsvArgs {
    /// Path to the baseline cycle CSV
    #[arg(long)]
    pub baseline: String,

    /// Path to the new/optimized cycle CSV
    #[arg(long)]
    pub new: String,

    /// Output file path (.csv or .xlsx; stdout CSV when omitted)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Comparison mode
    #[arg(long, value_enum, default_value = "align")]
    pub mode: CompareModeArg,

    /// Suppress the comparison summary on stderr
    #[arg(long)]
    pub no_summary: bool,
}

#[derive(Args, Debug)]
pub struct CompareAllArgs {
    /// Base path of the baseline cycle CSVs (e.g. /tmp/baseline)
    #[arg(long)]
    pub baseline: String,

    /// Base path of the new cycle CSVs (e.g. /tmp/optimized)
    #[arg(long)]
    pub new: String,

    /// Output XLSX file path
    #[arg(short, long)]
    pub output: String,

    /// Pair cycles by kernel similarity instead of cycle number
    #[arg(long)]
    pub smart: bool,

    /// Comparison mode applied to each pair
    #[arg(long, value_enum, default_value = "align")]
    pub mode: CompareModeArg,
}
