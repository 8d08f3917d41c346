// CSV round-trip: a written CycleResult re-read through the
// compare-from-CSV path preserves names and statistics.

use ciclo::csv_output::{read_kernels_from_csv, read_kernels_from_path};
use ciclo::cycle::{find_all_patterns, DetectorConfig};
use ciclo::error::CicloError;
use ciclo::parser::KernelEvent;
use ciclo::stats::extract_cycle;

fn analyzed_cycle() -> ciclo::stats::CycleResult {
    let names: Vec<String> = (0..12)
        .map(|i| match i {
            0 => "void ck::gemm_pipeline<float, 128, 4>".to_string(),
            1 => "triton_red_fused_mul_add_7".to_string(),
            i => format!("steady_op_{i:02}"),
        })
        .collect();

    let mut events = Vec::new();
    for rep in 0..7 {
        for (j, name) in names.iter().enumerate() {
            events.push(KernelEvent::named(name, 1.5 + (rep + j) as f64 * 0.25));
        }
    }

    let patterns = find_all_patterns(&events, &DetectorConfig::default());
    assert_eq!(patterns.len(), 1);
    extract_cycle(&events, &patterns[0].info)
}

#[test]
fn round_trip_preserves_per_position_stats() {
    let result = analyzed_cycle();
    let mut buffer = Vec::new();
    result.write_csv(&mut buffer).unwrap();

    let kernels = read_kernels_from_csv(buffer.as_slice()).unwrap();
    assert_eq!(kernels.len(), result.kernels.len());

    for (read, orig) in kernels.iter().zip(&result.kernels) {
        assert_eq!(read.name, orig.name);
        assert_eq!(read.index_in_cycle, orig.index_in_cycle);
        assert_eq!(read.count, orig.count);
        // Values were formatted at three decimals.
        assert!((read.avg_dur - orig.avg_dur).abs() < 5e-4);
        assert!((read.min_dur - orig.min_dur).abs() < 5e-4);
        assert!((read.max_dur - orig.max_dur).abs() < 5e-4);
        assert!((read.stddev - orig.stddev).abs() < 5e-4);
    }
}

#[test]
fn round_trip_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cycle.csv");

    let result = analyzed_cycle();
    result.write_to_file(&path).unwrap();

    let kernels = read_kernels_from_path(&path).unwrap();
    assert_eq!(kernels.len(), result.kernels.len());
    // Comma-bearing template names survive quoting.
    assert_eq!(kernels[0].name, "void ck::gemm_pipeline<float, 128, 4>");
}

#[test]
fn json_output_is_parseable() {
    let result = analyzed_cycle();
    let mut buffer = Vec::new();
    result.write_json(&mut buffer).unwrap();

    let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert_eq!(value["cycle_length"], 12);
    assert_eq!(value["num_cycles"], 7);
    assert_eq!(value["kernels"].as_array().unwrap().len(), 12);
}

#[test]
fn missing_required_columns_is_fatal() {
    let err = read_kernels_from_csv("index,name,duration\n0,x,1.0\n".as_bytes()).unwrap_err();
    assert!(matches!(err, CicloError::ComparisonInputInvalid));
}

#[test]
fn comparison_csv_round_trips_into_batch_loader() {
    // The batch loader reads the same cycle CSV shape the writer emits.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run_cycle_1.csv");
    analyzed_cycle().write_to_file(&path).unwrap();

    let info = ciclo::batch::load_cycle_info(&path);
    assert_eq!(info.num_kernels, 12);
    assert!(info.avg_cycle_time > 0.0);
    let share_sum: f64 = info.kernel_shares.values().sum();
    assert!((share_sum - 100.0).abs() < 0.1, "shares sum to ~100%");
}
