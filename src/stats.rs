//! Per-position kernel statistics across cycle repetitions

use serde::Serialize;

use crate::cycle::CycleInfo;
use crate::parser::KernelEvent;

/// Aggregated statistics for one position within a cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KernelStats {
    pub name: String,
    pub index_in_cycle: usize,
    pub count: usize,
    pub total_dur: f64,
    pub min_dur: f64,
    pub max_dur: f64,
    pub avg_dur: f64,
    pub stddev: f64,
}

/// One extracted cycle: the per-position statistics plus cycle-level totals.
///
/// `avg_cycle_time` is the sum of per-position averages; `total_cycle_time`
/// is the sum of every visited event's duration across all repetitions.
#[derive(Debug, Clone, Serialize)]
pub struct CycleResult {
    pub cycle_length: usize,
    pub num_cycles: usize,
    #[serde(rename = "total_cycle_time_us")]
    pub total_cycle_time: f64,
    #[serde(rename = "avg_cycle_time_us")]
    pub avg_cycle_time: f64,
    pub kernels: Vec<KernelStats>,
}

/// Aggregate per-position statistics for one detected cycle.
///
/// For each position `j` and repetition start `s`, the event at `s + j`
/// contributes to position `j`. The position's name is taken from the first
/// repetition; later repetitions are not reconciled (detection already
/// verified they agree at the configured threshold). Standard deviation
/// uses the population formula and is zero below two samples.
pub fn extract_cycle(events: &[KernelEvent], info: &CycleInfo) -> CycleResult {
    let mut durations: Vec<Vec<f64>> = vec![Vec::with_capacity(info.num_cycles); info.cycle_length];
    let mut kernels: Vec<KernelStats> = Vec::with_capacity(info.cycle_length);
    let mut total_cycle_time = 0.0;

    for &start in &info.cycle_indices {
        for j in 0..info.cycle_length {
            let Some(event) = events.get(start + j) else {
                break;
            };
            total_cycle_time += event.dur;

            if let Some(stats) = kernels.get_mut(j) {
                stats.count += 1;
                stats.total_dur += event.dur;
                stats.min_dur = stats.min_dur.min(event.dur);
                stats.max_dur = stats.max_dur.max(event.dur);
            } else {
                kernels.push(KernelStats {
                    name: event.name.clone(),
                    index_in_cycle: j,
                    count: 1,
                    total_dur: event.dur,
                    min_dur: event.dur,
                    max_dur: event.dur,
                    avg_dur: 0.0,
                    stddev: 0.0,
                });
            }
            durations[j].push(event.dur);
        }
    }

    let mut avg_cycle_time = 0.0;
    for (stats, durs) in kernels.iter_mut().zip(&durations) {
        stats.avg_dur = stats.total_dur / stats.count as f64;
        stats.stddev = population_stddev(durs, stats.avg_dur);
        avg_cycle_time += stats.avg_dur;
    }

    CycleResult {
        cycle_length: info.cycle_length,
        num_cycles: info.num_cycles,
        total_cycle_time,
        avg_cycle_time,
        kernels,
    }
}

/// Population standard deviation (`Σ(d − mean)² / n`), zero below two
/// samples.
fn population_stddev(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let sum_squares: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (sum_squares / values.len() as f64).sqrt()
}

impl CycleResult {
    /// Build a result directly from a kernel list, used when the cycle was
    /// already extracted to CSV and read back for comparison.
    pub fn from_kernels(kernels: Vec<KernelStats>) -> Self {
        let avg_cycle_time = kernels.iter().map(|k| k.avg_dur).sum();
        CycleResult {
            cycle_length: kernels.len(),
            num_cycles: 1,
            total_cycle_time: avg_cycle_time,
            avg_cycle_time,
            kernels,
        }
    }

    /// Human-readable summary on stderr: totals, the top kernels by average
    /// duration, and a coarse kernel-category breakdown.
    pub fn print_summary(&self) {
        eprintln!("\n=== Cycle Analysis Summary ===");
        eprintln!("Cycle Length: {} kernels", self.cycle_length);
        eprintln!("Number of Cycles: {}", self.num_cycles);
        eprintln!(
            "Average Cycle Time: {:.2} µs ({:.4} ms)",
            self.avg_cycle_time,
            self.avg_cycle_time / 1000.0
        );
        eprintln!(
            "Total Measured Time: {:.2} µs ({:.4} ms)",
            self.total_cycle_time,
            self.total_cycle_time / 1000.0
        );

        eprintln!("\n=== Top 10 Kernels by Average Duration ===");
        let mut sorted: Vec<&KernelStats> = self.kernels.iter().collect();
        sorted.sort_by(|a, b| b.avg_dur.total_cmp(&a.avg_dur));
        for (i, k) in sorted.iter().take(10).enumerate() {
            let pct = if self.avg_cycle_time > 0.0 {
                k.avg_dur / self.avg_cycle_time * 100.0
            } else {
                0.0
            };
            eprintln!(
                "{:2}. [{:4}] {}",
                i + 1,
                k.index_in_cycle,
                truncate_name(&k.name, 80)
            );
            eprintln!(
                "          Avg: {:.2} µs | Min: {:.2} | Max: {:.2} | StdDev: {:.2}  ({:.2}% of cycle)",
                k.avg_dur, k.min_dur, k.max_dur, k.stddev, pct
            );
        }

        eprintln!("\n=== Kernel Type Distribution ===");
        let mut categories: Vec<(&'static str, usize, f64)> = Vec::new();
        for k in &self.kernels {
            let category = categorize_kernel(&k.name);
            match categories.iter_mut().find(|(name, _, _)| *name == category) {
                Some(entry) => {
                    entry.1 += 1;
                    entry.2 += k.avg_dur;
                }
                None => categories.push((category, 1, k.avg_dur)),
            }
        }
        categories.sort_by(|a, b| b.2.total_cmp(&a.2));
        for (name, count, dur) in categories {
            let pct = if self.avg_cycle_time > 0.0 {
                dur / self.avg_cycle_time * 100.0
            } else {
                0.0
            };
            eprintln!("  {name:<20}: {count:4} kernels, {dur:.2} µs ({pct:.1}%)");
        }
    }
}

/// Coarse name-based kernel categorization for the summary report.
fn categorize_kernel(name: &str) -> &'static str {
    const PATTERNS: &[(&str, &str)] = &[
        ("cijk_", "GEMM/BLAS"),
        ("triton_", "Triton"),
        ("paged_attention", "PagedAttention"),
        ("attention", "Attention"),
        ("fmha", "FlashAttention"),
        ("elementwise", "Elementwise"),
        ("reduce", "Reduce"),
        ("norm", "Normalization"),
        ("softmax", "Softmax"),
        ("embedding", "Embedding"),
        ("copy", "Memory"),
        ("fill", "Memory"),
        ("reshape", "Memory"),
        ("transpose", "Memory"),
        ("rocprim", "ROCm Primitives"),
        ("ck_tile", "Composable Kernel"),
    ];

    let lower = name.to_ascii_lowercase();
    for (substr, category) in PATTERNS {
        if lower.contains(substr) {
            return category;
        }
    }
    "Other"
}

pub(crate) fn truncate_name(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        s.to_string()
    } else {
        let mut cut = max_len.saturating_sub(3);
        while cut > 0 && !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    }
}
