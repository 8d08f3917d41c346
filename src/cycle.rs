//! Periodic pattern detection over kernel event streams
//!
//! The detector looks for kernels whose occurrence positions witness a
//! stable period (anchor candidates), verifies candidate cycles against the
//! raw name sequence, refines long cycles into their smallest repeating
//! sub-unit by signature, and groups the survivors into distinct patterns.
//! Two fallback detectors (bounded brute-force search and auto search
//! seeded by the first repeated name) cover streams where no anchor
//! qualifies. All thresholds live in [`DetectorConfig`]; there is no global
//! state and no randomness, so output is fully determined by input.

use std::collections::HashMap;

use crate::error::{CicloError, Result};
use crate::parser::KernelEvent;
use crate::signature::{cycle_signature, hash_name, hash_name_normalized, kernel_signature};

/// One detected repeating pattern.
///
/// `cycle_indices` holds the event index of each repetition's first event,
/// in ascending order; `cycle_indices[0] == start_index`. Every
/// `cycle_indices[r] + j` with `j < cycle_length` lies inside the stream
/// the pattern was detected over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleInfo {
    pub start_index: usize,
    pub cycle_length: usize,
    pub num_cycles: usize,
    pub cycle_indices: Vec<usize>,
    /// Kernel name (or signature, for sub-cycles) used as the periodicity
    /// witness, when one exists.
    pub anchor: Option<String>,
}

/// A [`CycleInfo`] annotated with its grouping signature and temporal
/// center, as produced by [`find_all_patterns`].
#[derive(Debug, Clone)]
pub struct CyclePattern {
    pub info: CycleInfo,
    /// `|`-joined signatures of the first `min(10, cycle_length)` events.
    pub signature: String,
    /// Midpoint between the pattern's first and last covered event index.
    pub center_pos: f64,
}

/// Which phase of an LLM trace to select a pattern for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhaseMode {
    /// Most-repeated pattern (the main workload).
    #[default]
    Auto,
    /// Earliest significant pattern (prompt processing).
    Prefill,
    /// Latest significant pattern (token generation).
    Decode,
}

/// Detection thresholds. Defaults match production traces; tests and
/// special-purpose callers tighten or relax individual knobs.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Shortest cycle the anchor path will accept.
    pub min_cycle_length: usize,
    /// An anchor candidate must occur at least this often...
    pub anchor_min_count: usize,
    /// ...and at most `N / anchor_max_share` times.
    pub anchor_max_share: usize,
    /// Gap tolerance for anchor regularity is `max(1, L / regularity_divisor)`.
    pub regularity_divisor: usize,
    /// Fraction of positions that must hash-match the first repetition.
    pub exact_match_threshold: f64,
    /// Minimum verified repetitions for a significant cycle.
    pub min_repetitions: usize,
    /// Sub-cycle refinement only runs inside outers longer than this.
    pub sub_refine_min_outer: usize,
    /// Gap tolerance for sub-cycle spacing is `max(1, L / sub_cycle_divisor)`.
    pub sub_cycle_divisor: usize,
    /// Fraction of positions that must signature-match per sub-repetition.
    pub sub_cycle_match_threshold: f64,
    /// Minimum matching sub-repetitions inside one outer window.
    pub min_sub_reps: usize,
    /// A pattern is significant when it covers at least
    /// `N / significance_divisor` events.
    pub significance_divisor: usize,
    /// Collapse `triton_<...>_<digits>` instance counters before hashing.
    pub normalize_names: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            min_cycle_length: 10,
            anchor_min_count: 5,
            anchor_max_share: 5,
            regularity_divisor: 20,
            exact_match_threshold: 0.95,
            min_repetitions: 5,
            sub_refine_min_outer: 20,
            sub_cycle_divisor: 10,
            sub_cycle_match_threshold: 0.80,
            min_sub_reps: 3,
            significance_divisor: 100,
            normalize_names: false,
        }
    }
}

impl DetectorConfig {
    fn effective_name(&self, event: &KernelEvent) -> String {
        if self.normalize_names {
            crate::signature::normalize_kernel_name(&event.name)
        } else {
            event.name.clone()
        }
    }

    fn hash_events(&self, events: &[KernelEvent]) -> Vec<u64> {
        events
            .iter()
            .map(|e| {
                if self.normalize_names {
                    hash_name_normalized(&e.name)
                } else {
                    hash_name(&e.name)
                }
            })
            .collect()
    }
}

/// Find every significant repeating pattern in the stream.
///
/// Anchor candidates are kernel names occurring between `anchor_min_count`
/// and `N / anchor_max_share` times. Each candidate's occurrence gaps must
/// all equal the first gap within tolerance; the resulting cycle is then
/// verified position-by-position against the first repetition at the
/// configured hash-match threshold, counting consecutive matching
/// repetitions from the start. Cycles longer than `sub_refine_min_outer`
/// are refined into their smallest signature-consistent sub-cycle. The
/// survivors are grouped by cycle signature (keeping the most-repeated per
/// group), deduplicated across rotations, and ordered by temporal center.
pub fn find_all_patterns(events: &[KernelEvent], config: &DetectorConfig) -> Vec<CyclePattern> {
    let n = events.len();
    if n < 20 {
        return Vec::new();
    }

    let hashes = config.hash_events(events);

    // Occurrence counts and positions per effective name.
    let mut positions: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        positions.entry(config.effective_name(event)).or_default().push(i);
    }

    let max_count = n / config.anchor_max_share;
    let mut candidates: Vec<(&String, &Vec<usize>)> = positions
        .iter()
        .filter(|(_, p)| p.len() >= config.anchor_min_count.max(2) && p.len() <= max_count)
        .collect();
    // Count descending, then name, so detection is deterministic.
    candidates.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    let mut found: Vec<CycleInfo> = Vec::new();
    for (name, pos) in candidates {
        let cycle_len = pos[1] - pos[0];
        if cycle_len < config.min_cycle_length {
            continue;
        }
        if !gaps_are_regular(pos, cycle_len, config.regularity_divisor) {
            continue;
        }

        if let Some(mut info) = verify_cycle(
            &hashes,
            pos[0],
            cycle_len,
            config.exact_match_threshold,
        ) {
            if info.num_cycles < config.min_repetitions {
                continue;
            }
            info.anchor = Some(name.clone());

            if info.cycle_length > config.sub_refine_min_outer {
                if let Some(sub) = find_sub_cycle(events, &info, config) {
                    eprintln!(
                        "Refined cycle {} -> sub-cycle {} ({} reps)",
                        info.cycle_length, sub.cycle_length, sub.num_cycles
                    );
                    info = sub;
                }
            }
            found.push(info);
        }
    }

    group_patterns(events, found)
}

/// Check that every gap between consecutive occurrences equals the first
/// gap within `max(1, cycle_len / divisor)`.
fn gaps_are_regular(positions: &[usize], cycle_len: usize, divisor: usize) -> bool {
    let tolerance = (cycle_len / divisor).max(1) as i64;
    positions.windows(2).skip(1).all(|w| {
        let gap = (w[1] - w[0]) as i64;
        (gap - cycle_len as i64).abs() <= tolerance
    })
}

/// Verify a candidate cycle against the raw name sequence.
///
/// Counts consecutive repetitions, starting at `start`, whose positions
/// hash-match the first repetition's window at `threshold` or better.
fn verify_cycle(
    hashes: &[u64],
    start: usize,
    cycle_len: usize,
    threshold: f64,
) -> Option<CycleInfo> {
    let n = hashes.len();
    if start + cycle_len > n {
        return None;
    }

    let reference = &hashes[start..start + cycle_len];
    let mut cycle_indices = vec![start];

    let mut pos = start + cycle_len;
    while pos + cycle_len <= n {
        let matched = reference
            .iter()
            .zip(&hashes[pos..pos + cycle_len])
            .filter(|(a, b)| a == b)
            .count();
        if matched as f64 / cycle_len as f64 >= threshold {
            cycle_indices.push(pos);
            pos += cycle_len;
        } else {
            break;
        }
    }

    if cycle_indices.len() < 2 {
        return None;
    }
    Some(CycleInfo {
        start_index: start,
        cycle_length: cycle_len,
        num_cycles: cycle_indices.len(),
        cycle_indices,
        anchor: None,
    })
}

/// Look for the smallest repeating sub-unit inside one repetition of an
/// outer cycle, using signature equality instead of exact names. This is
/// what turns "one full forward pass" into "one transformer layer".
fn find_sub_cycle(
    events: &[KernelEvent],
    outer: &CycleInfo,
    config: &DetectorConfig,
) -> Option<CycleInfo> {
    let window_len = outer.cycle_length;
    let window = &events[outer.start_index..outer.start_index + window_len];
    let signatures: Vec<String> = window.iter().map(|e| kernel_signature(&e.name)).collect();

    let mut sig_positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, sig) in signatures.iter().enumerate() {
        sig_positions.entry(sig.as_str()).or_default().push(i);
    }

    let mut best: Option<(usize, &Vec<usize>, &str)> = None;
    let mut ordered: Vec<(&&str, &Vec<usize>)> = sig_positions.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));

    for (sig, pos) in ordered {
        if pos.len() < config.min_sub_reps.max(3) {
            continue;
        }
        let sub_len = pos[1] - pos[0];
        if sub_len < 2 || sub_len * 2 > window_len {
            continue;
        }
        if !gaps_are_regular(pos, sub_len, config.sub_cycle_divisor) {
            continue;
        }
        if best.map_or(true, |(len, _, _)| sub_len < len)
            && verify_sub_cycle(
                &signatures,
                pos[0],
                sub_len,
                config.sub_cycle_match_threshold,
                config.min_sub_reps,
            )
        {
            best = Some((sub_len, pos, *sig));
        }
    }

    let (sub_len, in_window, anchor_sig) = best?;

    // Repetition starts are the cross product of outer starts and
    // in-window sub-cycle positions, clipped to the stream.
    let n = events.len();
    let mut cycle_indices: Vec<usize> = Vec::with_capacity(outer.num_cycles * in_window.len());
    for &outer_start in &outer.cycle_indices {
        for &p in in_window {
            let idx = outer_start + p;
            if idx + sub_len <= n {
                cycle_indices.push(idx);
            }
        }
    }
    cycle_indices.sort_unstable();
    if cycle_indices.len() < 2 {
        return None;
    }

    Some(CycleInfo {
        start_index: cycle_indices[0],
        cycle_length: sub_len,
        num_cycles: cycle_indices.len(),
        cycle_indices,
        anchor: Some(anchor_sig.to_string()),
    })
}

/// Check that the signature pattern starting at `start` repeats at stride
/// `sub_len` inside the window, with at least `min_reps` repetitions
/// matching at `threshold` or better.
fn verify_sub_cycle(
    signatures: &[String],
    start: usize,
    sub_len: usize,
    threshold: f64,
    min_reps: usize,
) -> bool {
    let n = signatures.len();
    let mut matches = 0;

    let mut i = start;
    while i + sub_len < n {
        let mut matched = 0;
        let mut checked = 0;
        for j in 0..sub_len {
            if i + j + sub_len >= n {
                break;
            }
            checked += 1;
            if signatures[i + j] == signatures[i + j + sub_len] {
                matched += 1;
            }
        }
        if checked > 0 && matched as f64 / sub_len as f64 >= threshold {
            matches += 1;
        }
        i += sub_len;
    }

    matches >= min_reps
}

/// Group surviving descriptors into distinct patterns: first by exact cycle
/// signature (keeping the most-repeated per group), then merging patterns
/// of similar length whose signature members overlap at 80% or more, which
/// collapses rotations of the same cycle found through different anchors.
fn group_patterns(events: &[KernelEvent], found: Vec<CycleInfo>) -> Vec<CyclePattern> {
    let mut by_signature: Vec<CyclePattern> = Vec::new();

    for info in found {
        let names: Vec<&str> = events
            [info.start_index..info.start_index + info.cycle_length.min(10)]
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        let signature = cycle_signature(&names);

        match by_signature.iter_mut().find(|p| p.signature == signature) {
            Some(existing) => {
                if info.num_cycles > existing.info.num_cycles {
                    existing.info = info;
                }
            }
            None => by_signature.push(CyclePattern {
                info,
                signature,
                center_pos: 0.0,
            }),
        }
    }

    // Rotation-tolerant merge: same cycle found via different anchors
    // starts at a different offset and so carries a rotated signature.
    let mut merged: Vec<CyclePattern> = Vec::new();
    for pattern in by_signature {
        let similar = merged.iter_mut().find(|p| {
            lengths_similar(p.info.cycle_length, pattern.info.cycle_length)
                && signature_members_overlap(&p.signature, &pattern.signature)
        });
        match similar {
            Some(existing) => {
                if pattern.info.num_cycles > existing.info.num_cycles {
                    *existing = pattern;
                }
            }
            None => merged.push(pattern),
        }
    }

    for pattern in &mut merged {
        let last_end = pattern
            .info
            .cycle_indices
            .last()
            .map_or(pattern.info.start_index, |&s| s + pattern.info.cycle_length);
        pattern.center_pos = (pattern.info.start_index + last_end) as f64 / 2.0;
    }
    merged.sort_by(|a, b| a.center_pos.total_cmp(&b.center_pos));
    merged
}

fn lengths_similar(a: usize, b: usize) -> bool {
    let tolerance = (a / 5).max(2);
    a.abs_diff(b) <= tolerance
}

/// Order-insensitive 80% member overlap between two `|`-joined signatures.
fn signature_members_overlap(a: &str, b: &str) -> bool {
    let parts_a: Vec<&str> = a.split('|').collect();
    let parts_b: Vec<&str> = b.split('|').collect();
    let matched = parts_a
        .iter()
        .filter(|p| parts_b.contains(p))
        .count();
    matched >= (parts_a.len() * 8 / 10).max(1)
}

/// Brute-force cycle search over an explicit length range.
///
/// Tries each cycle length, at each start offset below `min(len, N/4)` (to
/// step over a warm-up prefix), and accepts the first length that repeats
/// at least twice with exact hash equality.
pub fn detect_cycle(
    events: &[KernelEvent],
    min_len: usize,
    max_len: usize,
    config: &DetectorConfig,
) -> Result<CycleInfo> {
    let n = events.len();
    if n < min_len * 2 {
        return Err(CicloError::InsufficientEvents {
            found: n,
            required: min_len * 2,
        });
    }

    let hashes = config.hash_events(events);
    eprintln!("Searching for cycles (length {min_len}-{max_len}) in {n} kernel events...");

    for cycle_len in min_len..=max_len.min(n / 2) {
        if let Some(info) = try_cycle_length(&hashes, cycle_len) {
            eprintln!(
                "Found cycle of length {} repeating {} times",
                cycle_len, info.num_cycles
            );
            return Ok(info);
        }
    }

    Err(CicloError::NoCycleFound)
}

fn try_cycle_length(hashes: &[u64], cycle_len: usize) -> Option<CycleInfo> {
    let n = hashes.len();

    for start in 0..cycle_len.min(n / 4).max(1) {
        let mut cycle_indices = vec![start];
        let mut pos = start + cycle_len;
        while pos + cycle_len <= n {
            if hashes[start..start + cycle_len] == hashes[pos..pos + cycle_len] {
                cycle_indices.push(pos);
                pos += cycle_len;
            } else {
                break;
            }
        }

        if cycle_indices.len() >= 2 {
            return Some(CycleInfo {
                start_index: start,
                cycle_length: cycle_len,
                num_cycles: cycle_indices.len(),
                cycle_indices,
                anchor: None,
            });
        }
    }

    None
}

/// Auto cycle search: seed the brute-force length range from the position
/// of the first repeated kernel name.
pub fn detect_cycle_auto(events: &[KernelEvent], config: &DetectorConfig) -> Result<CycleInfo> {
    let n = events.len();
    if n < 20 {
        return Err(CicloError::InsufficientEvents {
            found: n,
            required: 20,
        });
    }

    eprintln!("Auto-detecting cycle in {n} kernel events...");

    let first_repeat = find_first_repeat(events, config);
    if first_repeat == 0 {
        return Err(CicloError::NoCycleFound);
    }

    let min_len = first_repeat.saturating_sub(100).max(10);
    let max_len = (first_repeat + 1000).min(n / 2);
    detect_cycle(events, min_len, max_len, config)
}

fn find_first_repeat(events: &[KernelEvent], config: &DetectorConfig) -> usize {
    let mut seen: HashMap<u64, usize> = HashMap::new();
    for (i, h) in config.hash_events(events).into_iter().enumerate() {
        if seen.contains_key(&h) {
            return i;
        }
        seen.insert(h, i);
    }
    0
}

/// Primary detection path: anchor-based pattern search with sub-cycle
/// refinement, selecting one pattern per the requested phase, falling back
/// to the auto search when no anchor qualifies.
pub fn detect_cycle_by_signature(
    events: &[KernelEvent],
    config: &DetectorConfig,
    phase: PhaseMode,
) -> Result<CycleInfo> {
    if events.len() < 20 {
        return Err(CicloError::InsufficientEvents {
            found: events.len(),
            required: 20,
        });
    }

    let patterns = find_all_patterns(events, config);
    if let Some(pattern) = select_phase(&patterns, events.len(), config, phase) {
        eprintln!(
            "Selected cycle: length={}, repetitions={}",
            pattern.info.cycle_length, pattern.info.num_cycles
        );
        return Ok(pattern.info.clone());
    }

    eprintln!("No anchor-based pattern found, falling back to auto detection");
    detect_cycle_auto(events, config)
}

/// Pick one pattern for the requested phase.
///
/// Patterns covering less than `N / significance_divisor` events are
/// filtered out first (unless that empties the set). Prefill takes the
/// earliest center, decode the latest, auto the most repetitions. A trace
/// with a single significant pattern resolves every phase to it.
pub fn select_phase<'a>(
    patterns: &'a [CyclePattern],
    total_events: usize,
    config: &DetectorConfig,
    phase: PhaseMode,
) -> Option<&'a CyclePattern> {
    if patterns.is_empty() {
        return None;
    }

    let min_coverage = total_events / config.significance_divisor;
    let significant: Vec<&CyclePattern> = {
        let filtered: Vec<&CyclePattern> = patterns
            .iter()
            .filter(|p| p.info.num_cycles * p.info.cycle_length >= min_coverage)
            .collect();
        if filtered.is_empty() {
            patterns.iter().collect()
        } else {
            filtered
        }
    };

    match phase {
        PhaseMode::Prefill => significant
            .into_iter()
            .min_by(|a, b| a.center_pos.total_cmp(&b.center_pos)),
        PhaseMode::Decode => significant
            .into_iter()
            .max_by(|a, b| a.center_pos.total_cmp(&b.center_pos)),
        PhaseMode::Auto => significant
            .into_iter()
            .max_by_key(|p| p.info.num_cycles),
    }
}

/// Classify patterns into (prefill, decode) for LLM traces.
///
/// Prefill is the earliest significant pattern; decode the latest whose
/// signature differs from prefill's. When only one pattern exists, both
/// phases resolve to it.
pub fn classify_phases<'a>(
    patterns: &'a [CyclePattern],
    total_events: usize,
    config: &DetectorConfig,
) -> (Option<&'a CyclePattern>, Option<&'a CyclePattern>) {
    let prefill = select_phase(patterns, total_events, config, PhaseMode::Prefill);

    let min_coverage = total_events / config.significance_divisor;
    let significant: Vec<&CyclePattern> = {
        let filtered: Vec<&CyclePattern> = patterns
            .iter()
            .filter(|p| p.info.num_cycles * p.info.cycle_length >= min_coverage)
            .collect();
        if filtered.is_empty() {
            patterns.iter().collect()
        } else {
            filtered
        }
    };

    let decode = significant
        .into_iter()
        .filter(|p| prefill.map_or(true, |pre| p.signature != pre.signature))
        .max_by(|a, b| a.center_pos.total_cmp(&b.center_pos))
        .or(prefill);

    (prefill.or(decode), decode)
}

/// Cheap periodicity probe for early-stop parsing.
///
/// Samples the most common inter-occurrence gap among frequently seen
/// names, restricted to `[min_cycle, max_cycle]`, and verifies candidates
/// with at least four consistent gaps at a 90% hash-match threshold.
/// Returns a descriptor with at least five repetitions, or nothing.
pub fn quick_probe(
    events: &[KernelEvent],
    min_cycle: usize,
    max_cycle: usize,
) -> Option<CycleInfo> {
    if events.len() < min_cycle * 3 {
        return None;
    }

    let mut positions: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        positions.entry(event.name.as_str()).or_default().push(i);
    }

    let mut names: Vec<(&&str, &Vec<usize>)> = positions
        .iter()
        .filter(|(_, pos)| pos.len() >= 5)
        .collect();
    names.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(b.0)));

    for (_, pos) in names {
        let mut gap_counts: HashMap<usize, usize> = HashMap::new();
        for w in pos.windows(2) {
            let gap = w[1] - w[0];
            if gap >= min_cycle && gap <= max_cycle {
                *gap_counts.entry(gap).or_insert(0) += 1;
            }
        }

        let mut gaps: Vec<(usize, usize)> =
            gap_counts.into_iter().filter(|&(_, c)| c >= 4).collect();
        gaps.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (gap, _) in gaps {
            if let Some(info) = verify_cycle_quick(events, gap, pos[0]) {
                return Some(info);
            }
        }
    }

    None
}

fn verify_cycle_quick(events: &[KernelEvent], cycle_len: usize, start: usize) -> Option<CycleInfo> {
    if start + cycle_len * 3 > events.len() {
        return None;
    }

    let hashes: Vec<u64> = events[start..]
        .iter()
        .map(|e| hash_name(&e.name))
        .collect();
    let info = verify_cycle(&hashes, 0, cycle_len, 0.90)?;
    if info.num_cycles < 5 {
        return None;
    }

    Some(CycleInfo {
        start_index: start,
        cycle_indices: info.cycle_indices.iter().map(|&i| i + start).collect(),
        ..info
    })
}
