//! Batch comparison pairing for `compare-all`
//!
//! Discovers `<base>_cycle_N.csv` families and pairs baseline against new
//! cycles either by index or, in smart mode, by weighted-Jaccard
//! similarity over signature-weighted time shares.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::signature::kernel_signature;

/// Minimum similarity for smart pairing; pairs below this are dropped.
const SIMILARITY_FLOOR: f64 = 0.2;

/// Per-file cycle metadata used for similarity scoring.
#[derive(Debug, Clone, Default)]
pub struct CycleFileInfo {
    pub path: PathBuf,
    /// Signature -> summed share of cycle time (percent).
    pub kernel_shares: HashMap<String, f64>,
    pub avg_cycle_time: f64,
    pub num_kernels: usize,
}

/// Enumerate `<base>_cycle_1.csv`, `<base>_cycle_2.csv`, ... until the
/// first missing index.
pub fn find_cycle_files(base: &str) -> Vec<PathBuf> {
    let mut files = Vec::new();
    for i in 1.. {
        let path = PathBuf::from(format!("{base}_cycle_{i}.csv"));
        if !path.exists() {
            break;
        }
        files.push(path);
    }
    files
}

/// Load the similarity-relevant metadata from one cycle CSV.
///
/// Reads the `# Avg cycle time (us)` metadata row and accumulates each
/// kernel's `pct_of_cycle` under its signature. Unreadable files yield an
/// empty info (they simply never pair well).
pub fn load_cycle_info(path: &Path) -> CycleFileInfo {
    let mut info = CycleFileInfo {
        path: path.to_path_buf(),
        ..CycleFileInfo::default()
    };

    let Ok(file) = std::fs::File::open(path) else {
        return info;
    };
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(file);

    let mut columns: Option<(usize, usize)> = None; // (kernel_name, pct_of_cycle)
    for record in reader.records() {
        let Ok(record) = record else { break };
        let first = record.get(0).unwrap_or("");

        if columns.is_none() {
            if first == "# Avg cycle time (us)" {
                if let Some(v) = record.get(1).and_then(|v| v.parse().ok()) {
                    info.avg_cycle_time = v;
                }
            } else if !first.starts_with('#') && !first.is_empty() {
                let name_idx = record.iter().position(|f| f == "kernel_name");
                let pct_idx = record.iter().position(|f| f == "pct_of_cycle");
                if let (Some(n), Some(p)) = (name_idx, pct_idx) {
                    columns = Some((n, p));
                }
            }
            continue;
        }

        let (name_idx, pct_idx) = columns.unwrap();
        let Some(name) = record.get(name_idx) else {
            continue;
        };
        let pct: f64 = record
            .get(pct_idx)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0.0);
        *info
            .kernel_shares
            .entry(kernel_signature(name))
            .or_insert(0.0) += pct;
        info.num_kernels += 1;
    }

    info
}

/// Weighted Jaccard similarity over the union of kernel signatures:
/// `Σ min(a_k, b_k) / Σ max(a_k, b_k)`.
pub fn cycle_similarity(a: &CycleFileInfo, b: &CycleFileInfo) -> f64 {
    if a.kernel_shares.is_empty() || b.kernel_shares.is_empty() {
        return 0.0;
    }

    let mut min_sum = 0.0;
    let mut max_sum = 0.0;
    let all_sigs: std::collections::HashSet<&String> =
        a.kernel_shares.keys().chain(b.kernel_shares.keys()).collect();
    for sig in all_sigs {
        let a_val = a.kernel_shares.get(sig).copied().unwrap_or(0.0);
        let b_val = b.kernel_shares.get(sig).copied().unwrap_or(0.0);
        min_sum += a_val.min(b_val);
        max_sum += a_val.max(b_val);
    }

    if max_sum == 0.0 {
        0.0
    } else {
        min_sum / max_sum
    }
}

/// Greedily pick the best (baseline, new) pairs by descending similarity,
/// each cycle used at most once, stopping below the similarity floor.
/// Returns `(baseline_index, new_index, similarity)` sorted by baseline
/// index.
pub fn pair_cycles_smart(
    baseline: &[CycleFileInfo],
    new: &[CycleFileInfo],
) -> Vec<(usize, usize, f64)> {
    let mut similarity = vec![vec![0.0; new.len()]; baseline.len()];
    for (i, b) in baseline.iter().enumerate() {
        for (j, n) in new.iter().enumerate() {
            similarity[i][j] = cycle_similarity(b, n);
        }
    }

    let mut used_baseline = vec![false; baseline.len()];
    let mut used_new = vec![false; new.len()];
    let mut pairs = Vec::new();

    loop {
        let mut best = SIMILARITY_FLOOR;
        let mut best_pair: Option<(usize, usize)> = None;
        for i in 0..baseline.len() {
            if used_baseline[i] {
                continue;
            }
            for j in 0..new.len() {
                if used_new[j] {
                    continue;
                }
                if similarity[i][j] > best {
                    best = similarity[i][j];
                    best_pair = Some((i, j));
                }
            }
        }

        let Some((i, j)) = best_pair else { break };
        used_baseline[i] = true;
        used_new[j] = true;
        eprintln!(
            "  Matched: baseline cycle {} <-> new cycle {} ({:.1}% similar)",
            i + 1,
            j + 1,
            similarity[i][j] * 100.0
        );
        pairs.push((i, j, similarity[i][j]));
    }

    pairs.sort_by_key(|&(i, _, _)| i);
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_with_shares(shares: &[(&str, f64)]) -> CycleFileInfo {
        CycleFileInfo {
            kernel_shares: shares
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            ..CycleFileInfo::default()
        }
    }

    #[test]
    fn test_similarity_identical_shares() {
        let a = info_with_shares(&[("gemm", 60.0), ("softmax", 40.0)]);
        let b = info_with_shares(&[("gemm", 60.0), ("softmax", 40.0)]);
        assert!((cycle_similarity(&a, &b) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_disjoint_shares() {
        let a = info_with_shares(&[("gemm", 100.0)]);
        let b = info_with_shares(&[("softmax", 100.0)]);
        assert_eq!(cycle_similarity(&a, &b), 0.0);
    }

    #[test]
    fn test_similarity_partial_overlap() {
        let a = info_with_shares(&[("gemm", 50.0), ("softmax", 50.0)]);
        let b = info_with_shares(&[("gemm", 50.0), ("reduce", 50.0)]);
        // min: 50 + 0 + 0; max: 50 + 50 + 50.
        assert!((cycle_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_similarity_empty_is_zero() {
        let a = info_with_shares(&[("gemm", 100.0)]);
        assert_eq!(cycle_similarity(&a, &CycleFileInfo::default()), 0.0);
    }

    #[test]
    fn test_smart_pairing_picks_best_and_honors_floor() {
        let baseline = vec![
            info_with_shares(&[("gemm", 90.0), ("softmax", 10.0)]),
            info_with_shares(&[("embedding", 100.0)]),
        ];
        let new = vec![
            info_with_shares(&[("reduce", 100.0)]), // matches nothing well
            info_with_shares(&[("gemm", 85.0), ("softmax", 15.0)]),
        ];

        let pairs = pair_cycles_smart(&baseline, &new);
        assert_eq!(pairs.len(), 1);
        let (base_idx, new_idx, sim) = pairs[0];
        assert_eq!(base_idx, 0);
        assert_eq!(new_idx, 1);
        assert!(sim > 0.8);
    }

    #[test]
    fn test_smart_pairing_each_cycle_once() {
        let shares = [("gemm", 80.0), ("softmax", 20.0)];
        let baseline = vec![info_with_shares(&shares), info_with_shares(&shares)];
        let new = vec![info_with_shares(&shares), info_with_shares(&shares)];

        let pairs = pair_cycles_smart(&baseline, &new);
        assert_eq!(pairs.len(), 2);
        let mut base_seen: Vec<usize> = pairs.iter().map(|p| p.0).collect();
        let mut new_seen: Vec<usize> = pairs.iter().map(|p| p.1).collect();
        base_seen.dedup();
        new_seen.sort_unstable();
        new_seen.dedup();
        assert_eq!(base_seen.len(), 2);
        assert_eq!(new_seen.len(), 2);
    }

    #[test]
    fn test_find_cycle_files_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run").to_string_lossy().to_string();
        for i in [1, 2, 4] {
            std::fs::write(format!("{base}_cycle_{i}.csv"), "x").unwrap();
        }
        let files = find_cycle_files(&base);
        // Index 3 is missing, so discovery stops after 2.
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_load_cycle_info_accumulates_signature_shares() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cycle.csv");
        std::fs::write(
            &path,
            "\
# Cycle Statistics
# Iterations,4
# Avg cycle time (us),100.000

index,kernel_name,avg_duration_us,min_duration_us,max_duration_us,stddev_us,count,pct_of_cycle
0,gemm_kernel_MT64,60.000,59.0,61.0,0.5,4,60.0000
1,gemm_kernel_MT128,25.000,24.0,26.0,0.5,4,25.0000
2,softmax_kernel,15.000,14.0,16.0,0.5,4,15.0000
",
        )
        .unwrap();

        let info = load_cycle_info(&path);
        assert_eq!(info.avg_cycle_time, 100.0);
        assert_eq!(info.num_kernels, 3);
        // Both gemm variants share a signature and accumulate.
        assert!((info.kernel_shares["gemm_kernel"] - 85.0).abs() < 1e-9);
        assert!((info.kernel_shares["softmax_kernel"] - 15.0).abs() < 1e-9);
    }
}
