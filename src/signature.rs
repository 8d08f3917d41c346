//! Kernel name normalization and hashing
//!
//! GPU kernel names encode template instantiations and compile-time tuning
//! parameters (`_GROUP_K_128`, `_MT64x128`, trailing instance counters).
//! The signature normalizer reduces a name to the coarse equivalence class
//! that survives retuning, so that cycle detection and kernel matching can
//! treat `gemm<float, 128>` and `gemm<half, 64>` as the same logical kernel.
//! Signatures are reference material only; output always carries the
//! original names.

/// Configuration-suffix markers. A kernel name is truncated at the earliest
/// occurrence of any of these; everything from the marker on is tuning
/// detail, not identity.
const CONFIG_MARKERS: &[&str] = &[
    "_GROUP_K_",
    "_GROUP_N_",
    "_GROUP_SIZE_",
    "_BLOCK_SIZE_",
    "_SPLITK_BLOCK_SIZE_",
    "_NUM_KSPLIT_",
    "_ACTUAL_KSPLIT_",
    "_MAX_KSPLIT_",
    "_GRID_MN_",
    "_GRID_",
    "_EVEN_K_",
    "_cache_modifier_",
    "_MT",
    "_MI",
    "_SN_",
    "_AFC",
    "_LDSB",
    "_LPA",
    "_LPB",
    "_UserArgs_",
    "_shortname",
];

/// 64-bit FNV-1a hash.
///
/// Used only as a fast equality proxy during cycle verification; collisions
/// are tolerable because every positive is rechecked against the original
/// name wherever exactness matters.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    let mut hash = OFFSET_BASIS;
    for &byte in data {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Hash a kernel name.
pub fn hash_name(name: &str) -> u64 {
    fnv1a_64(name.as_bytes())
}

/// Hash a kernel name after triton normalization.
pub fn hash_name_normalized(name: &str) -> u64 {
    fnv1a_64(normalize_kernel_name(name).as_bytes())
}

/// Reduce a kernel name to its coarse signature.
///
/// Applied in order: truncate at the first `<` (template instantiations),
/// truncate at the earliest configuration marker, strip trailing
/// `_<digits>` suffixes, trim trailing underscores. Names that collapse
/// below 3 characters fall back to `other_<h mod 1000>` over the original
/// name so distinct degenerate names stay distinguishable.
pub fn kernel_signature(name: &str) -> String {
    let mut sig = name;

    if let Some(idx) = sig.find('<') {
        if idx > 0 {
            sig = &sig[..idx];
        }
    }

    let earliest = CONFIG_MARKERS
        .iter()
        .filter_map(|marker| sig.find(marker).filter(|&idx| idx > 0))
        .min();
    if let Some(idx) = earliest {
        sig = &sig[..idx];
    }

    while let Some(stripped) = strip_trailing_digit_suffix(sig) {
        sig = stripped;
    }

    let sig = sig.trim_end_matches('_');

    if sig.len() < 3 {
        return format!("other_{}", hash_name(name) % 1000);
    }

    sig.to_string()
}

/// Remove one trailing `_<digits>` suffix, if present.
fn strip_trailing_digit_suffix(s: &str) -> Option<&str> {
    let digits = s
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 || digits == s.len() {
        return None;
    }
    let cut = s.len() - digits;
    if s.as_bytes()[cut - 1] == b'_' {
        Some(&s[..cut - 1])
    } else {
        None
    }
}

/// Strip the trailing `_<digits>` instance counter from `triton_` kernels.
///
/// Torch-compiled graphs emit numerically indexed kernels
/// (`triton_red_fused_mul_0`, `triton_red_fused_mul_1`) that are the same
/// kernel; the name-equality detector path groups them through this.
pub fn normalize_kernel_name(name: &str) -> String {
    if let Some(rest) = name.strip_prefix("triton_") {
        if let Some(idx) = rest.rfind('_') {
            let suffix = &rest[idx + 1..];
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                return format!("triton_{}", &rest[..idx]);
            }
        }
    }
    name.to_string()
}

/// Grouping signature for a cycle: the `|`-joined signatures of its first
/// `min(10, cycle_length)` kernel names.
pub fn cycle_signature(names: &[&str]) -> String {
    names
        .iter()
        .take(10)
        .map(|name| kernel_signature(name))
        .collect::<Vec<_>>()
        .join("|")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_known_values() {
        // Reference vectors for 64-bit FNV-1a.
        assert_eq!(fnv1a_64(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_signature_strips_template() {
        assert_eq!(
            kernel_signature("void ck::kernel_gemm<int, float>"),
            "void ck::kernel_gemm"
        );
    }

    #[test]
    fn test_signature_strips_config_suffix() {
        assert_eq!(
            kernel_signature("gemm_kernel_GROUP_K_128_BLOCK_SIZE_64"),
            "gemm_kernel"
        );
        assert_eq!(kernel_signature("attn_fwd_MT64x128_MI32"), "attn_fwd");
    }

    #[test]
    fn test_signature_earliest_marker_wins() {
        // _MT appears before _GROUP_K_, so truncation happens there.
        assert_eq!(kernel_signature("gemm_MT16_GROUP_K_8"), "gemm");
    }

    #[test]
    fn test_signature_strips_trailing_numbers() {
        assert_eq!(
            kernel_signature("triton_red_fused__to_copy_add_mean_mul_pow_rsqrt_0"),
            "triton_red_fused__to_copy_add_mean_mul_pow_rsqrt"
        );
        assert_eq!(kernel_signature("elementwise_kernel_12_3"), "elementwise_kernel");
    }

    #[test]
    fn test_signature_unchanged_for_simple_names() {
        assert_eq!(kernel_signature("simple_kernel_name"), "simple_kernel_name");
    }

    #[test]
    fn test_signature_short_name_fallback() {
        let sig = kernel_signature("k_1");
        assert!(sig.starts_with("other_"), "got {sig}");
        // Deterministic for the same input.
        assert_eq!(sig, kernel_signature("k_1"));
    }

    #[test]
    fn test_signature_groups_tuning_variants() {
        let a = kernel_signature("void ck::kernel_gemm<int, float, 32>");
        let b = kernel_signature("void ck::kernel_gemm<long, double, 64>");
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_idempotent() {
        for name in [
            "void ck::kernel_gemm<int, float>",
            "gemm_kernel_GROUP_K_128",
            "triton_red_fused_mul_0",
            "plain_kernel",
        ] {
            let once = kernel_signature(name);
            assert_eq!(kernel_signature(&once), once, "not idempotent for {name}");
        }
    }

    #[test]
    fn test_normalize_triton_strips_counter() {
        assert_eq!(
            normalize_kernel_name("triton_red_fused_something_123"),
            "triton_red_fused_something"
        );
        assert_eq!(
            normalize_kernel_name("triton_poi_fused_add_0"),
            "triton_poi_fused_add"
        );
    }

    #[test]
    fn test_normalize_leaves_non_triton_alone() {
        assert_eq!(normalize_kernel_name("Cijk_gemm_7"), "Cijk_gemm_7");
        assert_eq!(normalize_kernel_name("triton_nodigits"), "triton_nodigits");
    }

    #[test]
    fn test_cycle_signature_takes_first_ten() {
        let names: Vec<String> = (0..15).map(|i| format!("kernel_name_{i}")).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let sig = cycle_signature(&refs);
        assert_eq!(sig.split('|').count(), 10);
        // Trailing counters collapse under the signature normalizer.
        assert!(sig.starts_with("kernel_name|kernel_name"));
    }
}
