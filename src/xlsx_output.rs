//! Comparison spreadsheet output
//!
//! One sheet per comparison: twelve columns of baseline/new kernel names
//! and timing, a Change (%) heatmap cell, and a match-type column. Row
//! tints encode the match type; the change cell is tinted independently by
//! its improved/regressed/neutral classification.

use std::path::Path;

use rust_xlsxwriter::{Color, Format, FormatAlign, Workbook, Worksheet};

use crate::compare::{
    change_percent, classify_change, ChangeClass, CompareResult, KernelMatch, MatchType,
    REMOVED_SENTINEL,
};
use crate::error::{CicloError, Result};

/// Improvement threshold for the Change (%) heatmap, in percent.
const IMPROVEMENT_THRESHOLD_PCT: f64 = 5.0;

const HEADERS: [&str; 12] = [
    "Baseline Kernel",
    "Base Avg (µs)",
    "Base Min",
    "Base Max",
    "Base StdDev",
    "New Kernel",
    "New Avg (µs)",
    "New Min",
    "New Max",
    "New StdDev",
    "Change (%)",
    "Match Type",
];

struct SheetStyles {
    header: Format,
    exact: Format,
    similar: Format,
    removed: Format,
    new_only: Format,
    improved: Format,
    regressed: Format,
    neutral: Format,
}

impl SheetStyles {
    fn new() -> Self {
        SheetStyles {
            header: Format::new()
                .set_bold()
                .set_font_size(11)
                .set_font_color(Color::White)
                .set_background_color(Color::RGB(0x4472C4))
                .set_align(FormatAlign::Center)
                .set_align(FormatAlign::VerticalCenter),
            exact: Format::new().set_background_color(Color::RGB(0xE2EFDA)),
            similar: Format::new().set_background_color(Color::RGB(0xDDEBF7)),
            removed: Format::new().set_background_color(Color::RGB(0xFFC7CE)),
            new_only: Format::new().set_background_color(Color::RGB(0xFFEB9C)),
            improved: Format::new()
                .set_background_color(Color::RGB(0x00B050))
                .set_bold()
                .set_font_color(Color::White)
                .set_align(FormatAlign::Center),
            regressed: Format::new()
                .set_background_color(Color::RGB(0xFF0000))
                .set_bold()
                .set_font_color(Color::White)
                .set_align(FormatAlign::Center),
            neutral: Format::new()
                .set_background_color(Color::RGB(0xFFC000))
                .set_bold()
                .set_align(FormatAlign::Center),
        }
    }

    fn row_tint(&self, match_type: MatchType) -> &Format {
        match match_type {
            MatchType::Exact => &self.exact,
            MatchType::Similar => &self.similar,
            MatchType::Removed => &self.removed,
            MatchType::NewOnly => &self.new_only,
        }
    }

    fn change_tint(&self, class: ChangeClass) -> &Format {
        match class {
            ChangeClass::Improved => &self.improved,
            ChangeClass::Regressed => &self.regressed,
            ChangeClass::Neutral => &self.neutral,
        }
    }
}

/// Write a single comparison to an xlsx workbook.
pub fn write_compare_xlsx(path: &Path, result: &CompareResult) -> Result<()> {
    let mut workbook = Workbook::new();
    let styles = SheetStyles::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Comparison")?;
    write_sheet(worksheet, result, &styles)?;
    workbook.save(path)?;
    Ok(())
}

/// Write several comparisons to one workbook, one named sheet each.
pub fn write_multi_compare_xlsx(
    path: &Path,
    comparisons: &[CompareResult],
    sheet_names: &[String],
) -> Result<()> {
    if comparisons.len() != sheet_names.len() {
        return Err(CicloError::MismatchedSheetNames {
            names: sheet_names.len(),
            comparisons: comparisons.len(),
        });
    }

    let mut workbook = Workbook::new();
    let styles = SheetStyles::new();
    for (result, name) in comparisons.iter().zip(sheet_names) {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(sanitize_sheet_name(name))?;
        write_sheet(worksheet, result, &styles)?;
    }
    workbook.save(path)?;
    Ok(())
}

/// Sheet names are capped at 31 characters and cannot contain
/// `[ ] : * ? / \`.
fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            other => other,
        })
        .collect();
    cleaned.chars().take(31).collect()
}

fn write_sheet(
    worksheet: &mut Worksheet,
    result: &CompareResult,
    styles: &SheetStyles,
) -> Result<()> {
    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, *header, &styles.header)?;
    }

    worksheet.set_column_width(0, 55)?;
    for col in 1..=4u16 {
        worksheet.set_column_width(col, 12)?;
    }
    worksheet.set_column_width(5, 55)?;
    for col in 6..=10u16 {
        worksheet.set_column_width(col, 12)?;
    }
    worksheet.set_column_width(11, 15)?;

    // Summary row.
    worksheet.write_string(
        1,
        0,
        format!("Total ({} baseline kernels)", result.baseline_count),
    )?;
    worksheet.write_string(1, 5, format!("({} new kernels)", result.new_count))?;
    worksheet.write_number(1, 6, result.total_time)?;

    let mut row: u32 = 2;
    for m in &result.matches {
        write_match_row(worksheet, row, m, styles)?;
        row += 1;

        // Collapsed baseline kernels continue on their own tinted rows.
        for extra in m.baseline_kernels.iter().skip(1) {
            let tint = styles.row_tint(MatchType::Removed);
            worksheet.write_string_with_format(row, 0, extra, tint)?;
            worksheet.write_string_with_format(row, 5, REMOVED_SENTINEL, tint)?;
            worksheet.write_string_with_format(row, 11, MatchType::Removed.as_str(), tint)?;
            row += 1;
        }
    }

    if row > 1 {
        worksheet.autofilter(0, 0, row - 1, 11)?;
    }
    worksheet.set_freeze_panes(1, 0)?;
    Ok(())
}

fn write_match_row(
    worksheet: &mut Worksheet,
    row: u32,
    m: &KernelMatch,
    styles: &SheetStyles,
) -> Result<()> {
    let tint = styles.row_tint(m.match_type);

    let baseline_name = m
        .baseline_kernels
        .first()
        .map_or("(none)", String::as_str);
    worksheet.write_string_with_format(row, 0, baseline_name, tint)?;

    if let Some(t) = m.baseline {
        worksheet.write_number_with_format(row, 1, t.avg, tint)?;
        worksheet.write_number_with_format(row, 2, t.min, tint)?;
        worksheet.write_number_with_format(row, 3, t.max, tint)?;
        worksheet.write_number_with_format(row, 4, t.stddev, tint)?;
    } else {
        for col in 1..=4u16 {
            worksheet.write_blank(row, col, tint)?;
        }
    }

    worksheet.write_string_with_format(row, 5, &m.new_kernel, tint)?;

    let new_timing = m.new.filter(|_| m.new_kernel != REMOVED_SENTINEL);
    if let Some(t) = new_timing {
        worksheet.write_number_with_format(row, 6, t.avg, tint)?;
        worksheet.write_number_with_format(row, 7, t.min, tint)?;
        worksheet.write_number_with_format(row, 8, t.max, tint)?;
        worksheet.write_number_with_format(row, 9, t.stddev, tint)?;
    } else {
        for col in 6..=9u16 {
            worksheet.write_blank(row, col, tint)?;
        }
    }

    // Change (%) heatmap cell, tinted independently of the row.
    match (m.baseline, new_timing) {
        (Some(b), Some(n)) if b.avg > 0.0 => {
            let pct = change_percent(b.avg, n.avg);
            let class = classify_change(pct, IMPROVEMENT_THRESHOLD_PCT);
            worksheet.write_number_with_format(row, 10, pct, styles.change_tint(class))?;
        }
        _ => match m.match_type {
            MatchType::NewOnly => {
                worksheet.write_string_with_format(
                    row,
                    10,
                    "NEW",
                    styles.change_tint(ChangeClass::Neutral),
                )?;
            }
            MatchType::Removed => {
                worksheet.write_string_with_format(
                    row,
                    10,
                    "REMOVED",
                    styles.change_tint(ChangeClass::Improved),
                )?;
            }
            _ => {}
        },
    }

    worksheet.write_string_with_format(row, 11, m.match_type.as_str(), tint)?;
    Ok(())
}
