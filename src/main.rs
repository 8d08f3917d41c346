use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser;

use ciclo::batch;
use ciclo::cli::{AnalyzeArgs, Cli, Command, CompareAllArgs, CompareCsvArgs, DetectMode};
use ciclo::compare::{compare_cycles, CompareResult};
use ciclo::csv_output::read_kernels_from_path;
use ciclo::cycle::{classify_phases, find_all_patterns, CyclePattern, DetectorConfig};
use ciclo::parser::parse_kernel_events;
use ciclo::stats::{extract_cycle, CycleResult};
use ciclo::xlsx_output::{write_compare_xlsx, write_multi_compare_xlsx};

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Analyze(args) => run_analyze(&args),
        Command::CompareCsv(args) => run_compare_csv(&args),
        Command::CompareAll(args) => run_compare_all(&args),
    }
}

fn run_analyze(args: &AnalyzeArgs) -> Result<()> {
    let input = Path::new(&args.input);
    if !input.exists() {
        bail!("input file does not exist: {}", args.input);
    }

    eprintln!("Parsing trace file: {}", args.input);
    let events = parse_kernel_events(input)?;
    eprintln!("Parsed {} kernel events", events.len());

    if events.is_empty() {
        return Err(ciclo::error::CicloError::NoKernelEvents.into());
    }

    let config = DetectorConfig {
        normalize_names: args.normalize_names,
        ..DetectorConfig::default()
    };

    eprintln!("\n=== Detecting cycle patterns ===");
    let patterns = find_all_patterns(&events, &config);
    if patterns.is_empty() {
        return Err(ciclo::error::CicloError::NoCycleFound.into());
    }

    eprintln!("Found {} distinct patterns:", patterns.len());
    for (i, p) in patterns.iter().enumerate() {
        eprintln!(
            "  {}. length={}, reps={}, center={:.1}%",
            i + 1,
            p.info.cycle_length,
            p.info.num_cycles,
            p.center_pos / events.len() as f64 * 100.0
        );
    }

    match args.mode {
        DetectMode::All => output_all_patterns(&events, &patterns, args),
        DetectMode::Llm => output_phases(&events, &patterns, &config, args),
    }
}

fn output_all_patterns(
    events: &[ciclo::parser::KernelEvent],
    patterns: &[CyclePattern],
    args: &AnalyzeArgs,
) -> Result<()> {
    eprintln!("\n=== Outputting {} cycle patterns ===", patterns.len());

    for (i, pattern) in patterns.iter().enumerate() {
        let result = extract_cycle(events, &pattern.info);
        if !args.no_summary {
            eprintln!("\n--- Cycle {} ---", i + 1);
            eprintln!("Length: {} kernels", result.cycle_length);
            eprintln!("Repetitions: {}", result.num_cycles);
            eprintln!(
                "Center: {:.1}% of trace",
                pattern.center_pos / events.len() as f64 * 100.0
            );
            eprintln!("Avg Cycle Time: {:.2} µs", result.avg_cycle_time);
        }

        if let Some(base) = &args.output {
            let path = format!("{base}_cycle_{}.csv", i + 1);
            result
                .write_to_file(Path::new(&path))
                .with_context(|| format!("writing {path}"))?;
            eprintln!("Written: {path}");
        }
    }

    if args.output.is_none() {
        if let Some(first) = patterns.first() {
            let result = extract_cycle(events, &first.info);
            result.write_csv(std::io::stdout().lock())?;
        }
    }
    Ok(())
}

fn output_phases(
    events: &[ciclo::parser::KernelEvent],
    patterns: &[CyclePattern],
    config: &DetectorConfig,
    args: &AnalyzeArgs,
) -> Result<()> {
    let (prefill, decode) = classify_phases(patterns, events.len(), config);

    let write_phase = |pattern: Option<&CyclePattern>, label: &str| -> Result<()> {
        let Some(pattern) = pattern else {
            return Ok(());
        };
        let result = extract_cycle(events, &pattern.info);
        if !args.no_summary {
            eprintln!("\n=== {} Cycle Summary ===", label.to_uppercase());
            eprintln!("Cycle Length: {} kernels", result.cycle_length);
            eprintln!("Number of Cycles: {}", result.num_cycles);
            eprintln!("Average Cycle Time: {:.2} µs", result.avg_cycle_time);
        }
        if let Some(base) = &args.output {
            let path = format!("{base}_{label}.csv");
            result
                .write_to_file(Path::new(&path))
                .with_context(|| format!("writing {path}"))?;
            eprintln!("{label} results written to: {path}");
        }
        Ok(())
    };

    write_phase(prefill, "prefill")?;
    write_phase(decode, "decode")?;

    if args.output.is_none() {
        if let Some(pattern) = decode.or(prefill) {
            let result = extract_cycle(events, &pattern.info);
            result.write_csv(std::io::stdout().lock())?;
        }
    }
    Ok(())
}

fn compare_csv_files(
    baseline_path: &str,
    new_path: &str,
    mode: ciclo::compare::CompareMode,
) -> Result<CompareResult> {
    eprintln!("=== Reading baseline CSV: {baseline_path} ===");
    let baseline = CycleResult::from_kernels(
        read_kernels_from_path(Path::new(baseline_path))
            .with_context(|| format!("reading {baseline_path}"))?,
    );
    eprintln!("Read {} kernels", baseline.kernels.len());

    eprintln!("=== Reading new CSV: {new_path} ===");
    let new = CycleResult::from_kernels(
        read_kernels_from_path(Path::new(new_path))
            .with_context(|| format!("reading {new_path}"))?,
    );
    eprintln!("Read {} kernels", new.kernels.len());

    let baseline_name = file_name(baseline_path);
    let new_name = file_name(new_path);
    Ok(compare_cycles(&baseline, &new, &baseline_name, &new_name, mode))
}

fn file_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn run_compare_csv(args: &CompareCsvArgs) -> Result<()> {
    let result = compare_csv_files(&args.baseline, &args.new, args.mode.into())?;

    if !args.no_summary {
        result.print_summary();
    }

    match &args.output {
        Some(output) if output.ends_with(".xlsx") => {
            write_compare_xlsx(Path::new(output), &result)?;
            eprintln!("\nResults written to: {output}");
        }
        Some(output) => {
            let file = std::fs::File::create(output)
                .with_context(|| format!("creating {output}"))?;
            result.write_csv(file)?;
            eprintln!("\nResults written to: {output}");
        }
        None => result.write_csv(std::io::stdout().lock())?,
    }
    Ok(())
}

fn run_compare_all(args: &CompareAllArgs) -> Result<()> {
    let baseline_files = batch::find_cycle_files(&args.baseline);
    let new_files = batch::find_cycle_files(&args.new);

    if baseline_files.is_empty() || new_files.is_empty() {
        bail!(
            "no cycle files found (baseline: {}, new: {})",
            baseline_files.len(),
            new_files.len()
        );
    }
    eprintln!(
        "Found {} baseline cycles and {} new cycles",
        baseline_files.len(),
        new_files.len()
    );

    let mut comparisons = Vec::new();
    let mut sheet_names = Vec::new();

    if args.smart {
        eprintln!("\n=== Smart Matching Mode ===");
        eprintln!("Loading baseline cycles...");
        let baseline_info: Vec<_> = baseline_files.iter().map(|f| batch::load_cycle_info(f)).collect();
        eprintln!("Loading new cycles...");
        let new_info: Vec<_> = new_files.iter().map(|f| batch::load_cycle_info(f)).collect();

        for (base_idx, new_idx, similarity) in batch::pair_cycles_smart(&baseline_info, &new_info) {
            let result = compare_csv_files(
                &baseline_files[base_idx].to_string_lossy(),
                &new_files[new_idx].to_string_lossy(),
                args.mode.into(),
            )?;
            comparisons.push(result);
            sheet_names.push(format!(
                "Base{}-New{} ({:.0}%)",
                base_idx + 1,
                new_idx + 1,
                similarity * 100.0
            ));
        }
    } else {
        let count = baseline_files.len().min(new_files.len());
        for i in 0..count {
            eprintln!("Comparing cycle {}...", i + 1);
            let result = compare_csv_files(
                &baseline_files[i].to_string_lossy(),
                &new_files[i].to_string_lossy(),
                args.mode.into(),
            )?;
            comparisons.push(result);
            sheet_names.push(format!("Cycle {}", i + 1));
        }
    }

    if comparisons.is_empty() {
        bail!("no valid comparisons");
    }

    eprintln!(
        "\nWriting {} comparisons to {}...",
        comparisons.len(),
        args.output
    );
    write_multi_compare_xlsx(Path::new(&args.output), &comparisons, &sheet_names)?;
    eprintln!(
        "Done! Created {} with {} sheets",
        args.output,
        comparisons.len()
    );
    Ok(())
}
