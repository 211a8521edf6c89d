// Copyright 2024-2026 GAVID Contributors
// Licensed under the Apache License, Version 2.0

//! Infer CLI subcommand: classify image files.

use std::path::PathBuf;
use std::sync::Arc;

use crate::engine::InferenceResult;
use crate::{config, Runtime, RuntimeConfig};

use super::{exit_code_for, EXIT_CONFIG, EXIT_FAILURE, EXIT_SUCCESS};

#[derive(Debug, PartialEq)]
struct InferArgs {
    images: Vec<PathBuf>,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<InferArgs, String> {
    let mut parsed = InferArgs {
        images: Vec::new(),
        json: false,
    };
    for arg in args.iter().skip(2) {
        match arg.as_str() {
            "--json" => parsed.json = true,
            flag if flag.starts_with("--") => return Err(format!("Unknown argument: {}", flag)),
            path => parsed.images.push(PathBuf::from(path)),
        }
    }
    if parsed.images.is_empty() {
        return Err("Usage: gavid-cli infer <IMAGE>... [--json]".to_string());
    }
    Ok(parsed)
}

/// Run `infer`: one prediction per image, in order.
///
/// Returns 0 when every image was classified, 1 if any failed, 2 when the
/// engine could not be built.
pub async fn run_infer(args: &[String]) -> i32 {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{}", message);
            return EXIT_CONFIG;
        }
    };

    let runtime = Arc::new(Runtime::new(RuntimeConfig::from(config::load())));
    let mut code = EXIT_SUCCESS;

    for path in &parsed.images {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                code = EXIT_FAILURE;
                continue;
            }
        };

        match runtime.predict(bytes).await {
            Ok(result) => print_result(&path.display().to_string(), &result, parsed.json),
            Err(e) => {
                eprintln!("{}: {}", path.display(), e);
                let failure = exit_code_for(&e);
                if failure == EXIT_CONFIG {
                    code = EXIT_CONFIG;
                    break;
                }
                code = EXIT_FAILURE;
            }
        }
    }

    if let Err(e) = runtime.shutdown().await {
        eprintln!("Shutdown error: {}", e);
    }
    code
}

fn print_result(name: &str, result: &InferenceResult, json: bool) {
    if json {
        let line = serde_json::json!({ "image": name, "result": result });
        println!("{}", line);
        return;
    }

    println!(
        "{}  [{} engine, {:.2} ms, {:.1} fps]",
        name, result.engine_name, result.latency_ms, result.throughput_fps
    );
    for (rank, candidate) in result.top5.iter().enumerate() {
        println!(
            "  {}. {:<40} {:>6.2}%",
            rank + 1,
            candidate.label,
            candidate.confidence * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_images_and_json() {
        let parsed = parse_args(&args(&["gavid-cli", "infer", "a.png", "--json", "b.jpg"])).unwrap();
        assert_eq!(parsed.images, vec![PathBuf::from("a.png"), PathBuf::from("b.jpg")]);
        assert!(parsed.json);
    }

    #[test]
    fn test_requires_an_image() {
        assert!(parse_args(&args(&["gavid-cli", "infer", "--json"])).is_err());
    }

    #[test]
    fn test_rejects_unknown_flag() {
        let err = parse_args(&args(&["gavid-cli", "infer", "a.png", "--stream"])).unwrap_err();
        assert!(err.contains("--stream"));
    }
}
