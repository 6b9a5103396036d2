//! ferry CLI entry point.
//!
//! Usage:
//!   ferry                          # Interactive REPL (python)
//!   ferry --kind sh                # Interactive REPL over /bin/sh
//!   ferry -c <code>                # Evaluate code and exit
//!   ferry script.py                # Run a file as one block

use std::env;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use ferry_kernel::{FerryConfig, InterpreterKind};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> ExitCode {
    // Respects RUST_LOG; logs go to stderr so they never mix with results
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::FAILURE
        }
    }
}

/// What the command line asked for.
#[derive(Debug, Default)]
struct Options {
    kind: Option<InterpreterKind>,
    timeout: Option<Duration>,
    command: Option<String>,
    script: Option<String>,
}

fn run() -> Result<ExitCode> {
    let args: Vec<String> = env::args().skip(1).collect();

    match args.first().map(|s| s.as_str()) {
        Some("--help" | "-h") => {
            print_help();
            return Ok(ExitCode::SUCCESS);
        }
        Some("--version" | "-V") => {
            println!(
                "ferry {} ({} {}, {})",
                env!("CARGO_PKG_VERSION"),
                env!("FERRY_GIT_HASH"),
                env!("FERRY_BUILD_DATE"),
                env!("FERRY_TARGET")
            );
            return Ok(ExitCode::SUCCESS);
        }
        _ => {}
    }

    let options = match parse_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e}");
            eprintln!("Run 'ferry --help' for usage.");
            return Ok(ExitCode::FAILURE);
        }
    };

    let config = FerryConfig::load().context("Failed to load configuration")?;
    let kind = options.kind.unwrap_or(InterpreterKind::Python);
    let mut repl = ferry_repl::Repl::new(kind, &config)?;
    if let Some(timeout) = options.timeout {
        repl.set_timeout(timeout);
    }

    let code = if let Some(code) = options.command {
        repl.run_once(&code)
    } else if let Some(path) = options.script {
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read script: {path}"))?;
        // Skip shebang if present
        let source = if source.starts_with("#!") {
            source.lines().skip(1).collect::<Vec<_>>().join("\n")
        } else {
            source
        };
        repl.run_once(&source)
    } else {
        ferry_repl::run(&mut repl)?;
        ExitCode::SUCCESS
    };

    repl.shutdown();
    Ok(code)
}

fn parse_options(args: &[String]) -> Result<Options> {
    let mut options = Options::default();
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag, Some(value.to_string())),
            _ => (arg.as_str(), None),
        };
        let mut value = |name: &str| -> Result<String> {
            match inline.clone() {
                Some(v) => Ok(v),
                None => iter
                    .next()
                    .cloned()
                    .with_context(|| format!("{name} requires a value")),
            }
        };

        match flag {
            "--kind" | "-k" => {
                let raw = value("--kind")?;
                options.kind = Some(raw.parse::<InterpreterKind>().map_err(anyhow::Error::msg)?);
            }
            "--timeout" | "-t" => {
                let raw = value("--timeout")?;
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("--timeout takes milliseconds, got {raw:?}"))?;
                options.timeout = Some(Duration::from_millis(ms));
            }
            "-c" => options.command = Some(value("-c")?),
            path if !path.starts_with('-') && options.script.is_none() => {
                options.script = Some(path.to_string());
            }
            unknown => bail!("Unknown option: {unknown}"),
        }
    }

    Ok(options)
}

fn print_help() {
    println!(
        r#"ferry v{}

Usage:
  ferry [OPTIONS]                Interactive REPL
  ferry [OPTIONS] -c <code>      Evaluate code and exit
  ferry [OPTIONS] <file>         Run a file as one block and exit

Options:
  -k, --kind <python|r|sh>       Interpreter to drive (default: python)
  -t, --timeout <ms>             Per-call timeout (default: from config, 30000)
  -c <code>                      Evaluate code and exit
  -h, --help                     Show this help
  -V, --version                  Show version

Configuration:
  $XDG_CONFIG_HOME/ferry/config.toml
  FERRY_TIMEOUT_MS overrides default_timeout_ms
  RUST_LOG controls diagnostics (e.g. RUST_LOG=ferry_kernel=debug)

Examples:
  ferry --kind sh -c 'echo hello'
  ferry -c '1 + 1'
  ferry --kind r analysis.R
"#,
        env!("CARGO_PKG_VERSION")
    );
}
