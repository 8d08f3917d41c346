//! CSV output and input for cycle and comparison results
//!
//! Cycle CSVs carry a metadata block of `#`-prefixed comment rows before
//! the data header; comparison CSVs lead with a summary row. Kernel names
//! contain commas inside template argument lists, so reading and writing
//! both go through a real CSV codec rather than string splitting.

use std::io::{Read, Write};
use std::path::Path;

use crate::compare::{CompareResult, REMOVED_SENTINEL};
use crate::error::{CicloError, Result};
use crate::stats::{CycleResult, KernelStats};

/// Column header of the per-kernel data section.
const CYCLE_HEADER: [&str; 8] = [
    "index",
    "kernel_name",
    "avg_duration_us",
    "min_duration_us",
    "max_duration_us",
    "stddev_us",
    "count",
    "pct_of_cycle",
];

impl CycleResult {
    /// Write the cycle to CSV: metadata comment rows, a blank row, the
    /// data header, then one row per position in cycle order.
    pub fn write_csv<W: Write>(&self, mut writer: W) -> Result<()> {
        // The metadata block never needs quoting; written directly so the
        // separator row stays genuinely blank.
        writeln!(writer, "# Cycle Statistics")?;
        writeln!(writer, "# Iterations,{}", self.num_cycles)?;
        writeln!(writer, "# Kernels per cycle,{}", self.cycle_length)?;
        writeln!(writer, "# Avg cycle time (us),{:.3}", self.avg_cycle_time)?;
        writeln!(writer, "# Total time (us),{:.3}", self.total_cycle_time)?;
        writeln!(writer)?;

        let mut w = csv::Writer::from_writer(writer);
        w.write_record(CYCLE_HEADER)?;

        for k in &self.kernels {
            let pct = if self.avg_cycle_time > 0.0 {
                k.avg_dur / self.avg_cycle_time * 100.0
            } else {
                0.0
            };
            w.write_record([
                k.index_in_cycle.to_string(),
                k.name.clone(),
                format!("{:.3}", k.avg_dur),
                format!("{:.3}", k.min_dur),
                format!("{:.3}", k.max_dur),
                format!("{:.3}", k.stddev),
                k.count.to_string(),
                format!("{pct:.4}"),
            ])?;
        }

        w.flush()?;
        Ok(())
    }

    /// Write JSON (pretty) to the given writer.
    pub fn write_json<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| CicloError::InputUnreadable(e.to_string()))?;
        Ok(())
    }

    /// Write to a file, choosing the format from the extension
    /// (`.json` or `.csv`; anything else gets CSV).
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        if path.extension().is_some_and(|ext| ext == "json") {
            self.write_json(file)
        } else {
            self.write_csv(file)
        }
    }
}

/// Read kernel statistics back from a cycle CSV.
///
/// Tolerates the leading metadata block; requires the `kernel_name` and
/// `avg_duration_us` columns and picks up min/max/stddev/count when
/// present. Rows whose average fails to parse are skipped.
pub fn read_kernels_from_csv<R: Read>(reader: R) -> Result<Vec<KernelStats>> {
    let mut r = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(reader);

    let mut header: Option<Vec<String>> = None;
    let mut kernels = Vec::new();

    for record in r.records() {
        let record = record?;
        let first = record.get(0).unwrap_or("");

        let Some(columns) = header.as_ref() else {
            if first.starts_with('#') || first.is_empty() {
                continue;
            }
            if record.iter().any(|f| f == "kernel_name") {
                header = Some(record.iter().map(str::to_string).collect());
                continue;
            }
            // Headerless data is not a cycle CSV we can pair up.
            return Err(CicloError::ComparisonInputInvalid);
        };

        let field = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .and_then(|i| record.get(i))
        };
        let Some(name) = field("kernel_name") else {
            continue;
        };
        let Some(avg) = field("avg_duration_us").and_then(|v| v.parse::<f64>().ok()) else {
            continue;
        };
        let parse = |col: &str| field(col).and_then(|v| v.parse::<f64>().ok());

        let stats = KernelStats {
            name: name.to_string(),
            index_in_cycle: field("index")
                .and_then(|v| v.parse().ok())
                .unwrap_or(kernels.len()),
            count: field("count").and_then(|v| v.parse().ok()).unwrap_or(0),
            total_dur: 0.0,
            min_dur: parse("min_duration_us").unwrap_or(0.0),
            max_dur: parse("max_duration_us").unwrap_or(0.0),
            avg_dur: avg,
            stddev: parse("stddev_us").unwrap_or(0.0),
        };
        kernels.push(stats);
    }

    if header.is_none() {
        return Err(CicloError::ComparisonInputInvalid);
    }
    Ok(kernels)
}

/// Read a cycle CSV from disk.
pub fn read_kernels_from_path(path: &Path) -> Result<Vec<KernelStats>> {
    let file = std::fs::File::open(path)?;
    read_kernels_from_csv(file)
}

impl CompareResult {
    /// Write the comparison as CSV: header, summary row, then one row per
    /// match (plus continuation rows for collapsed baseline kernels).
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut w = csv::WriterBuilder::new().flexible(true).from_writer(writer);

        w.write_record(["eager_kernel", "compiled_kernel", "duration_us", "match_type"])?;
        w.write_record([
            format!("Total ({} eager kernels)", self.baseline_count),
            format!("({} compiled kernels)", self.new_count),
            format!("{:.3}", self.total_time),
            String::new(),
        ])?;

        for m in &self.matches {
            let baseline = m
                .baseline_kernels
                .first()
                .map_or("(none)", String::as_str);
            let duration = match m.new {
                Some(t) if m.new_kernel != REMOVED_SENTINEL => format!("{:.3}", t.avg),
                _ => String::new(),
            };
            w.write_record([
                baseline,
                m.new_kernel.as_str(),
                duration.as_str(),
                m.match_type.as_str(),
            ])?;

            // Collapsed baseline kernels continue on their own rows.
            for extra in m.baseline_kernels.iter().skip(1) {
                w.write_record([extra.as_str(), REMOVED_SENTINEL, "", "removed"])?;
            }
        }

        w.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{compare_cycles, CompareMode};
    use crate::cycle::CycleInfo;
    use crate::parser::KernelEvent;
    use crate::stats::extract_cycle;

    fn sample_result() -> CycleResult {
        let events: Vec<KernelEvent> = (0..3)
            .flat_map(|_| {
                vec![
                    KernelEvent::named("gemm<float, 128>", 10.0),
                    KernelEvent::named("softmax_kernel", 2.5),
                ]
            })
            .collect();
        let info = CycleInfo {
            start_index: 0,
            cycle_length: 2,
            num_cycles: 3,
            cycle_indices: vec![0, 2, 4],
            anchor: None,
        };
        extract_cycle(&events, &info)
    }

    #[test]
    fn test_cycle_csv_metadata_rows() {
        let mut out = Vec::new();
        sample_result().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("# Cycle Statistics\n"));
        assert!(text.contains("# Iterations,3\n"));
        assert!(text.contains("# Kernels per cycle,2\n"));
        assert!(text.contains("# Avg cycle time (us),12.500\n"));
        assert!(text.contains("# Total time (us),37.500\n"));
        assert!(text.contains(
            "index,kernel_name,avg_duration_us,min_duration_us,max_duration_us,stddev_us,count,pct_of_cycle\n"
        ));
    }

    #[test]
    fn test_cycle_csv_quotes_template_names() {
        let mut out = Vec::new();
        sample_result().write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        // The comma inside the template argument list must be quoted.
        assert!(text.contains("\"gemm<float, 128>\""));
        assert!(text.contains("0,\"gemm<float, 128>\",10.000,10.000,10.000,0.000,3,80.0000"));
        assert!(text.contains("1,softmax_kernel,2.500,2.500,2.500,0.000,3,20.0000"));
    }

    #[test]
    fn test_cycle_csv_round_trip() {
        let result = sample_result();
        let mut out = Vec::new();
        result.write_csv(&mut out).unwrap();

        let kernels = read_kernels_from_csv(out.as_slice()).unwrap();
        assert_eq!(kernels.len(), result.kernels.len());
        for (read, orig) in kernels.iter().zip(&result.kernels) {
            assert_eq!(read.name, orig.name);
            assert!((read.avg_dur - orig.avg_dur).abs() < 1e-3);
            assert!((read.min_dur - orig.min_dur).abs() < 1e-3);
            assert!((read.max_dur - orig.max_dur).abs() < 1e-3);
            assert!((read.stddev - orig.stddev).abs() < 1e-3);
            assert_eq!(read.count, orig.count);
        }
    }

    #[test]
    fn test_read_rejects_missing_columns() {
        let csv = "a,b,c\n1,2,3\n";
        let err = read_kernels_from_csv(csv.as_bytes()).unwrap_err();
        assert!(matches!(err, CicloError::ComparisonInputInvalid));
    }

    #[test]
    fn test_read_rejects_empty_input() {
        let err = read_kernels_from_csv("".as_bytes()).unwrap_err();
        assert!(matches!(err, CicloError::ComparisonInputInvalid));
    }

    #[test]
    fn test_read_skips_unparseable_rows() {
        let csv = "\
kernel_name,avg_duration_us
good_kernel,1.500
bad_kernel,not_a_number
another_kernel,2.000
";
        let kernels = read_kernels_from_csv(csv.as_bytes()).unwrap();
        assert_eq!(kernels.len(), 2);
        assert_eq!(kernels[0].name, "good_kernel");
        assert_eq!(kernels[1].name, "another_kernel");
    }

    #[test]
    fn test_compare_csv_layout() {
        let base = CycleResult::from_kernels(read_kernels_from_csv(
            "kernel_name,avg_duration_us\naaa,10.0\nbbb,5.0\n".as_bytes(),
        ).unwrap());
        let new = CycleResult::from_kernels(read_kernels_from_csv(
            "kernel_name,avg_duration_us\naaa,8.0\nccc,4.0\n".as_bytes(),
        ).unwrap());
        let result = compare_cycles(&base, &new, "base.csv", "new.csv", CompareMode::Match);

        let mut out = Vec::new();
        result.write_csv(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("eager_kernel,compiled_kernel,duration_us,match_type\n"));
        assert!(text.contains("Total (2 eager kernels),(2 compiled kernels),12.000,\n"));
        assert!(text.contains("aaa,aaa,8.000,exact\n"));
        assert!(text.contains("(none),ccc,4.000,new_only\n"));
        // Removed row has the sentinel and no duration.
        assert!(text.contains("bbb,.,,removed\n"));
    }
}
