//! Kernel-sequence comparison between two analyzed cycles
//!
//! Two modes. `align` treats both cycles as the same logical loop that may
//! start at a different anchor point: it removes that offset with a
//! rotation search, then walks a longest-common-subsequence alignment over
//! kernel signatures so insertions and deletions show up in execution
//! order. `match` drops ordering entirely and greedily claims baseline
//! kernels by name, then by signature, which is the right tool when the
//! compiler has reordered or changed the kernel set wholesale.

use std::collections::HashMap;

use serde::Serialize;

use crate::signature::kernel_signature;
use crate::stats::{CycleResult, KernelStats};

/// Placeholder for the new-kernel column of a baseline-only match.
pub const REMOVED_SENTINEL: &str = ".";

/// Comparison strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMode {
    /// Position-based alignment with rotation detection.
    #[default]
    Align,
    /// Position-independent greedy signature matching.
    Match,
}

/// How a kernel pair was matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Identical kernel name on both sides.
    Exact,
    /// Same signature, different name (retuned or renamed variant).
    Similar,
    /// Present only on the new side.
    NewOnly,
    /// Present only on the baseline side.
    Removed,
}

impl MatchType {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Similar => "similar",
            MatchType::NewOnly => "new_only",
            MatchType::Removed => "removed",
        }
    }
}

/// Timing summary for one side of a match.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct KernelTiming {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub stddev: f64,
}

fn timing_of(k: &KernelStats) -> Option<KernelTiming> {
    if k.avg_dur > 0.0 {
        Some(KernelTiming {
            avg: k.avg_dur,
            min: k.min_dur,
            max: k.max_dur,
            stddev: k.stddev,
        })
    } else {
        None
    }
}

/// One aligned kernel pair.
///
/// `baseline_kernels` is empty for `new_only` matches and may exceed one
/// entry when several baseline kernels collapsed onto one new kernel;
/// `new_kernel` is [`REMOVED_SENTINEL`] for `removed` matches.
#[derive(Debug, Clone, Serialize)]
pub struct KernelMatch {
    pub index: usize,
    pub baseline_kernels: Vec<String>,
    pub new_kernel: String,
    pub baseline: Option<KernelTiming>,
    pub new: Option<KernelTiming>,
    pub match_type: MatchType,
    pub signature: String,
}

/// The full comparison between two cycles.
#[derive(Debug, Clone, Serialize)]
pub struct CompareResult {
    pub baseline_name: String,
    pub new_name: String,
    pub baseline_count: usize,
    pub new_count: usize,
    pub matches: Vec<KernelMatch>,
    /// Sum of new-side average durations over matches that have them.
    pub total_time: f64,
}

/// Performance classification of one match's change percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    Improved,
    Regressed,
    Neutral,
}

/// Relative change of the new side versus baseline, in percent.
pub fn change_percent(baseline_avg: f64, new_avg: f64) -> f64 {
    (new_avg - baseline_avg) / baseline_avg * 100.0
}

/// Classify a change percentage against the improvement threshold
/// (default 5%): below `-threshold` improved, above `+threshold`
/// regressed, otherwise neutral.
pub fn classify_change(pct: f64, threshold_pct: f64) -> ChangeClass {
    if pct < -threshold_pct {
        ChangeClass::Improved
    } else if pct > threshold_pct {
        ChangeClass::Regressed
    } else {
        ChangeClass::Neutral
    }
}

/// Compare two cycles under the given mode.
pub fn compare_cycles(
    baseline: &CycleResult,
    new: &CycleResult,
    baseline_name: &str,
    new_name: &str,
    mode: CompareMode,
) -> CompareResult {
    let matches = match mode {
        CompareMode::Align => align_kernels(&baseline.kernels, &new.kernels),
        CompareMode::Match => match_kernels(&baseline.kernels, &new.kernels),
    };

    let total_time = matches.iter().filter_map(|m| m.new.map(|t| t.avg)).sum();

    CompareResult {
        baseline_name: baseline_name.to_string(),
        new_name: new_name.to_string(),
        baseline_count: baseline.kernels.len(),
        new_count: new.kernels.len(),
        matches,
        total_time,
    }
}

/// Length of the longest common subsequence of two signature slices.
fn lcs_length(a: &[String], b: &[String]) -> usize {
    // Two-row DP; only the length is needed during rotation search.
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            curr[j] = if a[i - 1] == b[j - 1] {
                prev[j - 1] + 1
            } else {
                prev[j].max(curr[j - 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Find the rotation of `a` that maximizes its LCS against `b`.
fn best_rotation(a: &[String], b: &[String]) -> usize {
    let mut best = 0;
    let mut best_len = lcs_length(a, b);
    let mut rotated = a.to_vec();
    for r in 1..a.len() {
        rotated.rotate_left(1);
        let len = lcs_length(&rotated, b);
        if len > best_len {
            best_len = len;
            best = r;
        }
    }
    best
}

/// Position-based alignment with rotation search.
pub fn align_kernels(baseline: &[KernelStats], new: &[KernelStats]) -> Vec<KernelMatch> {
    let mut baseline: Vec<&KernelStats> = baseline.iter().collect();
    let mut b_sigs: Vec<String> = baseline.iter().map(|k| kernel_signature(&k.name)).collect();
    let c_sigs: Vec<String> = new.iter().map(|k| kernel_signature(&k.name)).collect();

    // Equal-length cycles may start at different anchor kernels; undo the
    // offset before aligning.
    if !baseline.is_empty() && baseline.len() == new.len() {
        let rotation = best_rotation(&b_sigs, &c_sigs);
        if rotation > 0 {
            eprintln!("Detected rotation of {rotation} positions between cycles");
            baseline.rotate_left(rotation);
            b_sigs.rotate_left(rotation);
        }
    }

    let m = baseline.len();
    let n = new.len();

    // Full LCS table for the backtrack.
    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for i in 1..=m {
        for j in 1..=n {
            dp[i][j] = if b_sigs[i - 1] == c_sigs[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    // Backtrack; ties resolve toward new-side insertions first.
    let mut matches = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && b_sigs[i - 1] == c_sigs[j - 1] {
            let b = baseline[i - 1];
            let c = &new[j - 1];
            let match_type = if b.name == c.name {
                MatchType::Exact
            } else {
                MatchType::Similar
            };
            matches.push(KernelMatch {
                index: 0,
                baseline_kernels: vec![b.name.clone()],
                new_kernel: c.name.clone(),
                baseline: timing_of(b),
                new: timing_of(c),
                match_type,
                signature: b_sigs[i - 1].clone(),
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i][j - 1] >= dp[i - 1][j]) {
            let c = &new[j - 1];
            matches.push(KernelMatch {
                index: 0,
                baseline_kernels: Vec::new(),
                new_kernel: c.name.clone(),
                baseline: None,
                new: timing_of(c),
                match_type: MatchType::NewOnly,
                signature: c_sigs[j - 1].clone(),
            });
            j -= 1;
        } else {
            let b = baseline[i - 1];
            matches.push(KernelMatch {
                index: 0,
                baseline_kernels: vec![b.name.clone()],
                new_kernel: REMOVED_SENTINEL.to_string(),
                baseline: timing_of(b),
                new: None,
                match_type: MatchType::Removed,
                signature: b_sigs[i - 1].clone(),
            });
            i -= 1;
        }
    }

    matches.reverse();
    for (idx, m) in matches.iter_mut().enumerate() {
        m.index = idx;
    }
    matches
}

/// Greedy signature matching; each baseline kernel is claimed at most once.
pub fn match_kernels(baseline: &[KernelStats], new: &[KernelStats]) -> Vec<KernelMatch> {
    let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut by_sig: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, k) in baseline.iter().enumerate() {
        by_name.entry(k.name.as_str()).or_default().push(i);
        by_sig.entry(kernel_signature(&k.name)).or_default().push(i);
    }

    let mut claimed = vec![false; baseline.len()];
    let mut matches = Vec::new();
    let mut index = 0;

    for c in new {
        let sig = kernel_signature(&c.name);

        // Exact name first.
        let exact = by_name
            .get(c.name.as_str())
            .and_then(|entries| entries.iter().copied().find(|&i| !claimed[i]));
        if let Some(i) = exact {
            claimed[i] = true;
            matches.push(KernelMatch {
                index,
                baseline_kernels: vec![baseline[i].name.clone()],
                new_kernel: c.name.clone(),
                baseline: timing_of(&baseline[i]),
                new: timing_of(c),
                match_type: MatchType::Exact,
                signature: sig,
            });
            index += 1;
            continue;
        }

        // Then first unclaimed baseline kernel with the same signature.
        let similar = by_sig
            .get(&sig)
            .and_then(|entries| entries.iter().copied().find(|&i| !claimed[i]));
        if let Some(i) = similar {
            claimed[i] = true;
            matches.push(KernelMatch {
                index,
                baseline_kernels: vec![baseline[i].name.clone()],
                new_kernel: c.name.clone(),
                baseline: timing_of(&baseline[i]),
                new: timing_of(c),
                match_type: MatchType::Similar,
                signature: sig,
            });
            index += 1;
            continue;
        }

        matches.push(KernelMatch {
            index,
            baseline_kernels: Vec::new(),
            new_kernel: c.name.clone(),
            baseline: None,
            new: timing_of(c),
            match_type: MatchType::NewOnly,
            signature: sig,
        });
        index += 1;
    }

    // Unclaimed baseline kernels become removed matches, in baseline order.
    for (i, k) in baseline.iter().enumerate() {
        if claimed[i] {
            continue;
        }
        matches.push(KernelMatch {
            index,
            baseline_kernels: vec![k.name.clone()],
            new_kernel: REMOVED_SENTINEL.to_string(),
            baseline: timing_of(k),
            new: None,
            match_type: MatchType::Removed,
            signature: kernel_signature(&k.name),
        });
        index += 1;
    }

    matches
}

impl CompareResult {
    /// Human-readable comparison summary on stderr.
    pub fn print_summary(&self) {
        use crate::stats::truncate_name;

        eprintln!("\n=== Trace Comparison Summary ===");
        eprintln!(
            "Baseline: {} ({} kernels/cycle)",
            self.baseline_name, self.baseline_count
        );
        eprintln!(
            "New:      {} ({} kernels/cycle)",
            self.new_name, self.new_count
        );
        eprintln!(
            "\nTotal New Cycle Time: {:.2} µs ({:.4} ms)\n",
            self.total_time,
            self.total_time / 1000.0
        );

        eprintln!("Match Types:");
        for match_type in [
            MatchType::Exact,
            MatchType::Similar,
            MatchType::NewOnly,
            MatchType::Removed,
        ] {
            let count = self
                .matches
                .iter()
                .filter(|m| m.match_type == match_type)
                .count();
            if count > 0 {
                eprintln!("  {}: {}", match_type.as_str(), count);
            }
        }

        eprintln!("\n=== Top 10 Kernels by Duration (New) ===");
        let mut timed: Vec<&KernelMatch> =
            self.matches.iter().filter(|m| m.new.is_some()).collect();
        timed.sort_by(|a, b| {
            b.new
                .map(|t| t.avg)
                .unwrap_or(0.0)
                .total_cmp(&a.new.map(|t| t.avg).unwrap_or(0.0))
        });
        for (i, m) in timed.iter().take(10).enumerate() {
            let avg = m.new.map(|t| t.avg).unwrap_or(0.0);
            let pct = if self.total_time > 0.0 {
                avg / self.total_time * 100.0
            } else {
                0.0
            };
            eprintln!(
                "{:2}. {:.2} µs ({:.1}%) - {}",
                i + 1,
                avg,
                pct,
                m.match_type.as_str()
            );
            eprintln!("    New:      {}", truncate_name(&m.new_kernel, 65));
            if let Some(b) = m.baseline_kernels.first() {
                eprintln!("    Baseline: {}", truncate_name(b, 65));
            }
        }

        eprintln!("\n=== Removed Baseline Kernels (no new equivalent) ===");
        let mut removed = 0;
        for m in &self.matches {
            if m.match_type == MatchType::Removed {
                removed += 1;
                for b in &m.baseline_kernels {
                    eprintln!("  - {}", truncate_name(b, 75));
                }
            }
        }
        if removed == 0 {
            eprintln!("  (none)");
        }

        eprintln!("\n=== New-Only Kernels ===");
        let mut new_only = 0;
        for m in &self.matches {
            if m.match_type == MatchType::NewOnly {
                new_only += 1;
                let avg = m.new.map(|t| t.avg).unwrap_or(0.0);
                let pct = if self.total_time > 0.0 {
                    avg / self.total_time * 100.0
                } else {
                    0.0
                };
                eprintln!(
                    "  {:.2} µs ({:.1}%) {}",
                    avg,
                    pct,
                    truncate_name(&m.new_kernel, 60)
                );
            }
        }
        if new_only == 0 {
            eprintln!("  (none)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel(name: &str, avg: f64) -> KernelStats {
        KernelStats {
            name: name.to_string(),
            avg_dur: avg,
            min_dur: avg,
            max_dur: avg,
            stddev: 0.0,
            count: 1,
            total_dur: avg,
            index_in_cycle: 0,
        }
    }

    fn kernels(names: &[&str]) -> Vec<KernelStats> {
        names.iter().map(|n| kernel(n, 1.0)).collect()
    }

    fn type_counts(matches: &[KernelMatch]) -> HashMap<MatchType, usize> {
        let mut counts = HashMap::new();
        for m in matches {
            *counts.entry(m.match_type).or_insert(0) += 1;
        }
        counts
    }

    #[test]
    fn test_align_single_identical_kernel() {
        let matches = align_kernels(&kernels(&["gemm"]), &kernels(&["gemm"]));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_type, MatchType::Exact);
        assert_eq!(matches[0].baseline_kernels, vec!["gemm"]);
        assert_eq!(matches[0].new_kernel, "gemm");
    }

    #[test]
    fn test_align_detects_rotation() {
        // Baseline [A..E], new rotated by 2: five exact matches in
        // execution order.
        let base = kernels(&["alpha", "bravo", "charlie", "delta", "echo"]);
        let new = kernels(&["charlie", "delta", "echo", "alpha", "bravo"]);
        let matches = align_kernels(&base, &new);

        assert_eq!(matches.len(), 5);
        assert!(matches.iter().all(|m| m.match_type == MatchType::Exact));
        let new_order: Vec<&str> = matches.iter().map(|m| m.new_kernel.as_str()).collect();
        assert_eq!(new_order, ["charlie", "delta", "echo", "alpha", "bravo"]);
        // Sequential indices.
        assert!(matches.iter().enumerate().all(|(i, m)| m.index == i));
    }

    #[test]
    fn test_align_similar_by_signature() {
        // Template instantiations differ; signatures agree.
        let base = kernels(&["gemm<float, 128>"]);
        let new = kernels(&["gemm<double, 64>"]);
        let matches = align_kernels(&base, &new);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_type, MatchType::Similar);
    }

    #[test]
    fn test_align_fusion_shape() {
        // Baseline [X,Y,Z]; new [XY_fused, Z]: the fused kernel matches
        // nothing, X and Y fall out as removed, Z aligns exactly.
        let base = kernels(&["xxx_kernel", "yyy_kernel", "zzz_kernel"]);
        let new = kernels(&["xy_fused_kernel", "zzz_kernel"]);
        let matches = align_kernels(&base, &new);

        let counts = type_counts(&matches);
        assert_eq!(counts.get(&MatchType::NewOnly), Some(&1));
        assert_eq!(counts.get(&MatchType::Removed), Some(&2));
        assert_eq!(counts.get(&MatchType::Exact), Some(&1));
        assert_eq!(matches.len(), 4);
    }

    #[test]
    fn test_align_each_kernel_used_once() {
        let base = kernels(&["aaa", "bbb", "aaa", "ccc"]);
        let new = kernels(&["aaa", "ddd", "aaa", "ccc"]);
        let matches = align_kernels(&base, &new);

        let baseline_used: usize = matches.iter().map(|m| m.baseline_kernels.len()).sum();
        let new_used = matches
            .iter()
            .filter(|m| m.new_kernel != REMOVED_SENTINEL)
            .count();
        assert_eq!(baseline_used, 4);
        assert_eq!(new_used, 4);
    }

    #[test]
    fn test_match_mode_permutation_has_no_removed() {
        let base = kernels(&["aaa", "bbb", "ccc", "ddd"]);
        let new = kernels(&["ddd", "ccc", "bbb", "aaa"]);
        let matches = match_kernels(&base, &new);

        assert_eq!(matches.len(), 4);
        assert!(matches.iter().all(|m| m.match_type == MatchType::Exact));
    }

    #[test]
    fn test_match_mode_fusion_shape() {
        let base = kernels(&["xxx_kernel", "yyy_kernel", "zzz_kernel"]);
        let new = kernels(&["xy_fused_kernel", "zzz_kernel"]);
        let matches = match_kernels(&base, &new);

        let counts = type_counts(&matches);
        assert_eq!(counts.get(&MatchType::NewOnly), Some(&1));
        assert_eq!(counts.get(&MatchType::Removed), Some(&2));
        assert_eq!(counts.get(&MatchType::Exact), Some(&1));
    }

    #[test]
    fn test_match_mode_prefers_name_over_signature() {
        // Both baseline kernels share a signature with the new kernel, but
        // one has the identical name and must win.
        let base = kernels(&["gemm_kernel_MT64", "gemm_kernel_MT128"]);
        let new = kernels(&["gemm_kernel_MT128"]);
        let matches = match_kernels(&base, &new);

        assert_eq!(matches[0].match_type, MatchType::Exact);
        assert_eq!(matches[0].baseline_kernels, vec!["gemm_kernel_MT128"]);
        assert_eq!(matches[1].match_type, MatchType::Removed);
        assert_eq!(matches[1].baseline_kernels, vec!["gemm_kernel_MT64"]);
    }

    #[test]
    fn test_match_mode_claims_each_baseline_once() {
        let base = kernels(&["dup_kernel", "dup_kernel"]);
        let new = kernels(&["dup_kernel", "dup_kernel", "dup_kernel"]);
        let matches = match_kernels(&base, &new);

        let counts = type_counts(&matches);
        assert_eq!(counts.get(&MatchType::Exact), Some(&2));
        assert_eq!(counts.get(&MatchType::NewOnly), Some(&1));
    }

    #[test]
    fn test_removed_has_sentinel_and_no_new_timing() {
        let base = kernels(&["only_in_baseline"]);
        let matches = match_kernels(&base, &[]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].new_kernel, REMOVED_SENTINEL);
        assert!(matches[0].new.is_none());
        assert!(matches[0].baseline.is_some());
    }

    #[test]
    fn test_total_time_sums_new_side() {
        let base = CycleResult::from_kernels(vec![kernel("aaa", 10.0), kernel("bbb", 5.0)]);
        let new = CycleResult::from_kernels(vec![kernel("aaa", 8.0), kernel("ccc", 4.0)]);
        let result = compare_cycles(&base, &new, "base.csv", "new.csv", CompareMode::Match);

        // aaa (exact, 8.0) + ccc (new_only, 4.0); removed bbb contributes
        // nothing.
        assert_eq!(result.total_time, 12.0);
        assert_eq!(result.baseline_count, 2);
        assert_eq!(result.new_count, 2);
    }

    #[test]
    fn test_change_classification_thresholds() {
        assert_eq!(
            classify_change(change_percent(100.0, 93.0), 5.0),
            ChangeClass::Improved
        );
        assert_eq!(
            classify_change(change_percent(100.0, 106.0), 5.0),
            ChangeClass::Regressed
        );
        assert_eq!(
            classify_change(change_percent(100.0, 103.0), 5.0),
            ChangeClass::Neutral
        );
    }

    #[test]
    fn test_rotation_symmetry_of_match_set() {
        // Rotating the baseline must not change the match-type multiset.
        let names = ["aaa", "bbb", "ccc", "ddd", "eee", "fff"];
        let new = kernels(&names);
        let reference = type_counts(&align_kernels(&kernels(&names), &new));

        for r in 1..names.len() {
            let mut rotated = names.to_vec();
            rotated.rotate_left(r);
            let counts = type_counts(&align_kernels(&kernels(&rotated), &new));
            assert_eq!(counts, reference, "rotation {r}");
        }
    }

    #[test]
    fn test_empty_sides() {
        assert!(align_kernels(&[], &[]).is_empty());
        let matches = align_kernels(&[], &kernels(&["fresh_kernel"]));
        assert_eq!(matches[0].match_type, MatchType::NewOnly);
        assert!(matches[0].baseline_kernels.is_empty());
    }
}
