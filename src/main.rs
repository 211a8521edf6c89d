//! GAVID CLI entry point.
//!
//! Bootstraps logging and the metrics descriptions, then dispatches to a
//! subcommand. Every command builds its own in-process runtime from the
//! `GAVID_*` environment.
//!
//! ## CLI Subcommands
//!
//! - `gavid-cli infer <IMAGE>...` - Classify images
//! - `gavid-cli metrics` - Sample GPU telemetry
//! - `gavid-cli compile` - Build the compiled artifact ahead of time
//! - `gavid-cli bench` - CPU vs accelerator latency
//! - `gavid-cli health` - Health check (exit 0/1)

use std::process::ExitCode;

use gavid_core::cli::{bench_cmd, compile_cmd, config_cmd, health_cmd, infer_cmd, metrics_cmd};
use gavid_core::config as gavid_config;
use gavid_core::telemetry::{init_logging, init_metrics};

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    if matches!(command, "infer" | "metrics" | "compile" | "bench" | "health") {
        let log = gavid_config::load().log;
        if let Err(e) = init_logging(&log) {
            eprintln!("Logging setup failed: {}", e);
            return ExitCode::from(2u8);
        }
        init_metrics();
    }

    let code = match command {
        "infer" => infer_cmd::run_infer(&args).await,
        "metrics" => metrics_cmd::run_metrics(&args).await,
        "health" => health_cmd::run_health(&args).await,
        "compile" => {
            let args = args.clone();
            blocking(move || compile_cmd::run_compile(&args)).await
        }
        "bench" => {
            let args = args.clone();
            blocking(move || bench_cmd::run_bench(&args)).await
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let json = args.iter().skip(3).any(|a| a == "--json");
            match subcommand {
                "show" => config_cmd::run_show(json),
                "defaults" => config_cmd::run_defaults(json),
                "validate" => config_cmd::run_validate(),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    1
                }
            }
        }
        "help" | "--help" | "-h" => {
            // Check if help is requested for a specific command
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            0
        }
        "version" | "--version" | "-V" => {
            println!("gavid-cli {}", env!("CARGO_PKG_VERSION"));
            0
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            1
        }
    };

    ExitCode::from(code.clamp(0, 255) as u8)
}

/// Run a synchronous command off the async worker threads.
async fn blocking<F>(run: F) -> i32
where
    F: FnOnce() -> i32 + Send + 'static,
{
    match tokio::task::spawn_blocking(run).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Command task failed: {}", e);
            1
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "GAVID - GPU-Accelerated Vision Inference v{}

USAGE:
    gavid-cli <COMMAND> [OPTIONS]

COMMANDS:
    infer        Classify one or more image files
    metrics      Sample GPU telemetry (DCGM, NVML or stub)
    compile      Build the compiled artifact and run a warm-up prediction
    bench        Compare CPU and accelerator mean latency
    health       Health check (exit 0 if healthy or degraded, 1 if unhealthy)
    config       Inspect configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

OPTIONS:
    -h, --help     Show help for command
    -V, --version  Show version information

EXAMPLES:
    gavid-cli infer cat.jpg dog.png          # Top-5 labels per image
    gavid-cli infer cat.jpg --json           # JSON result per image
    gavid-cli metrics --samples 5            # Five telemetry samples
    gavid-cli compile --max-batch 16 --force # Rebuild the artifact
    gavid-cli bench --iters 50               # CPU vs GPU speedup
    gavid-cli config validate                # Validate configuration

ENVIRONMENT:
    GAVID_DEVICE              Target device (default: cuda:0)
    GAVID_MODEL_FP16          Half precision on accelerators (default: true)
    GAVID_MAX_BATCH_SIZE      Compiled artifact max batch (default: 8)
    GAVID_ALLOW_CPU_FALLBACK  Run on the CPU when the device is missing (default: true)
    GAVID_METRICS_INTERVAL_S  Seconds between telemetry samples (default: 2.0)
    GAVID_MODEL_ENGINE_PATH   Compiled artifact path
    GAVID_MODEL_WEIGHTS       Local weight file (.safetensors, .pth, .onnx)
    GAVID_LOG                 Log filter (default: info)
    GAVID_LOG_FORMAT          pretty or json (default: pretty)

EXIT CODES:
    0  Success / Healthy
    1  Failure / Unhealthy
    2  Configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "infer" => {
            eprintln!(
                "gavid-cli infer - Classify images

USAGE:
    gavid-cli infer <IMAGE>... [OPTIONS]

OPTIONS:
    --json    Print one JSON object per image

DESCRIPTION:
    Builds the inference engine (loading or compiling the cached artifact
    on accelerators) and prints the top-5 labels with confidences and
    per-image latency.

EXIT CODES:
    0  Every image classified
    1  At least one image failed
    2  Engine could not be built (weights, artifact, device)
"
            );
        }
        "metrics" => {
            eprintln!(
                "gavid-cli metrics - Sample GPU telemetry

USAGE:
    gavid-cli metrics [OPTIONS]

OPTIONS:
    -n, --samples N  Number of samples, 1..=120 (default: 1)
    --json           Output in JSON format

DESCRIPTION:
    Probes DCGM, then NVML, then falls back to a synthetic stub. Samples
    are taken GAVID_METRICS_INTERVAL_S seconds apart.
"
            );
        }
        "compile" => {
            eprintln!(
                "gavid-cli compile - Build the compiled artifact

USAGE:
    gavid-cli compile [OPTIONS]

OPTIONS:
    --engine-path P  Artifact path (default: GAVID_MODEL_ENGINE_PATH)
    --max-batch N    Largest batch the artifact accepts
    --fp16           Compile at half precision
    --fp32           Compile at full precision
    --force          Rebuild even if the artifact exists

DESCRIPTION:
    Loads the artifact if present, otherwise compiles and writes it, then
    runs one warm-up prediction on a random image. Devices without compile
    support report that the eager model will be used.
"
            );
        }
        "bench" => {
            eprintln!(
                "gavid-cli bench - Compare CPU and accelerator latency

USAGE:
    gavid-cli bench [OPTIONS]

OPTIONS:
    --iters N   Timed predictions per device (default: 25)
    --warmup N  Untimed predictions first (default: 5)
"
            );
        }
        "health" => {
            eprintln!(
                "gavid-cli health - Health check

USAGE:
    gavid-cli health [--json]

EXIT CODES:
    0  Healthy, or degraded (stub telemetry)
    1  Unhealthy (engine could not be built)
"
            );
        }
        "config" => {
            eprintln!(
                "gavid-cli config - Inspect configuration

USAGE:
    gavid-cli config <SUBCOMMAND> [--json]

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show built-in defaults
    validate       Validate configuration (exit 2 when invalid)
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'gavid-cli help' for general usage.",
                command
            );
        }
    }
}
