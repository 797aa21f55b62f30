//! CVT MAP-Elites CLI - Run a benchmark search from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use cvt_map_elites::{
    compute::evolution::{
        COVERAGE, MAX_FITNESS, MapElites, QD_SCORE, QdMetrics, random_parameters,
    },
    schema::{QdConfig, RunReport},
};

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [report.json]", args[0]);
        eprintln!();
        eprintln!("Run CVT MAP-Elites on a benchmark task from JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to run configuration file");
        eprintln!("  report.json  Where to write the run report (default: stdout summary only)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let report_path = args.get(2).map(PathBuf::from);

    // Load configuration
    let config_str = fs::read_to_string(&config_path)
        .unwrap_or_else(|e| exit_with("Error reading config file", e));
    let config: QdConfig =
        serde_json::from_str(&config_str).unwrap_or_else(|e| exit_with("Error parsing config", e));
    config
        .validate()
        .unwrap_or_else(|e| exit_with("Invalid config", e));

    let scoring = config.scoring();
    let key = config.random_key();

    println!("CVT MAP-Elites");
    println!("==============");
    println!(
        "Task: {:?} ({} parameters)",
        config.task.task, config.task.genotype_size
    );
    println!("Niches: {:?}", config.centroids.method);
    println!(
        "Batch size: {} (variation {:.0}%)",
        config.emitter.batch_size,
        config.emitter.variation_percentage * 100.0
    );
    println!("Iterations: {}", config.run.iterations);
    println!();

    // Build components
    let (centroids, key) = config
        .centroids
        .build(scoring.descriptor_dimension(), key)
        .unwrap_or_else(|e| exit_with("Error computing centroids", e));
    let emitter = config
        .emitter
        .build()
        .unwrap_or_else(|e| exit_with("Error building emitter", e));
    let search = MapElites::new(scoring, emitter, QdMetrics::new(config.qd_offset()));

    println!("Centroids: {}", centroids.len());

    let (initial, key) = random_parameters(
        config.task.initial_batch_size,
        config.task.genotype_size,
        config.emitter.genotype_min,
        config.emitter.genotype_max,
        key,
    );

    let start = Instant::now();
    let state = search
        .init(&initial, Arc::new(centroids), key)
        .unwrap_or_else(|e| exit_with("Error initializing repertoire", e));

    println!(
        "Initial repertoire: {}/{} niches",
        state.repertoire.occupied_count(),
        state.repertoire.capacity()
    );
    println!();

    // Run search
    println!("Running search...");
    let iterations = config.run.iterations;
    let log_interval = config.run.log_interval;
    let (state, history) = search
        .run_with_callback(state, iterations, |state, metrics| {
            let due = state.generation % log_interval.max(1) == 0 || state.generation == iterations;
            if log_interval > 0 && due {
                let elapsed = start.elapsed().as_secs_f32();
                println!(
                    "  Generation {}/{}: qd_score={:.3}, coverage={:.1}%, max_fitness={:.4}, {:.1} gen/s",
                    state.generation,
                    iterations,
                    metrics.get(QD_SCORE).copied().unwrap_or(0.0),
                    metrics.get(COVERAGE).copied().unwrap_or(0.0),
                    metrics.get(MAX_FITNESS).copied().unwrap_or(f32::NEG_INFINITY),
                    state.generation as f32 / elapsed
                );
            }
        })
        .unwrap_or_else(|e| exit_with("Search failed", e));

    let elapsed = start.elapsed().as_secs_f64();
    let total_evaluations =
        (config.task.initial_batch_size + iterations * config.emitter.batch_size) as u64;

    if let Some(path) = &config.run.snapshot_path {
        state
            .repertoire
            .save_json(path)
            .unwrap_or_else(|e| exit_with("Error writing snapshot", e));
        println!();
        println!("Repertoire written to {}", path.display());
    }

    let report = RunReport::new(
        config,
        &state.repertoire,
        &history,
        total_evaluations,
        elapsed,
    );

    println!();
    println!("Final repertoire:");
    println!(
        "  Occupied niches: {}/{} ({:.1}%)",
        report.stats.occupied_niches, report.stats.capacity, report.stats.coverage
    );
    println!("  QD-score: {:.3}", report.stats.qd_score);
    match &report.best {
        Some(best) => println!(
            "  Best fitness: {:.6} (niche {}, descriptor {:?})",
            best.fitness, best.niche, best.descriptor
        ),
        None => println!("  Best fitness: none"),
    }
    println!(
        "Time: {:.2}s ({:.1} evaluations/s)",
        report.stats.elapsed_seconds, report.stats.evaluations_per_second
    );

    if let Some(path) = report_path {
        let json = serde_json::to_string_pretty(&report)
            .unwrap_or_else(|e| exit_with("Error serializing report", e));
        fs::write(&path, json).unwrap_or_else(|e| exit_with("Error writing report", e));
        println!("Report written to {}", path.display());
    }
}

fn exit_with(context: &str, error: impl Display) -> ! {
    eprintln!("{}: {}", context, error);
    std::process::exit(1);
}

fn print_example_config() {
    let config = QdConfig::default();
    let json = serde_json::to_string_pretty(&config)
        .unwrap_or_else(|e| exit_with("Error serializing config", e));

    println!("Example configuration (config.json):");
    println!("{}", json);
}
