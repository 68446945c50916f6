//! Developer tasks for the tlsbridge workspace: `cargo xtask <task>`

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use std::process::Command;

const FMT: &[&str] = &["fmt", "--all", "--check"];
const CLIPPY: &[&str] = &["clippy", "--workspace", "--all-targets", "--all-features", "--", "-D", "warnings"];
const TESTS: &[&str] = &["test", "--workspace", "--all-features"];

#[derive(Parser)]
#[command(name = "xtask", about = "tlsbridge developer tasks")]
struct Cli {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Unit, integration and property tests
    Test,
    /// Clippy with warnings denied
    Lint,
    /// Verify rustfmt output
    Fmt,
    /// Formatting, lints and tests in CI order
    Ci,
    /// Criterion benchmarks
    Bench {
        /// Benchmark name filter
        filter: Option<String>,
    },
    /// Run a fuzz target (needs cargo-fuzz on nightly)
    Fuzz {
        /// session_ingress, credential_parse or setting_parse
        #[arg(default_value = "session_ingress")]
        target: String,
        /// Time limit in seconds
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
    /// Build API docs and open them
    Doc,
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().task {
        Task::Test => cargo(TESTS),
        Task::Lint => cargo(CLIPPY),
        Task::Fmt => cargo(FMT),
        Task::Ci => {
            for step in [FMT, CLIPPY, TESTS] {
                cargo(step)?;
            }
            println!("ci: ok");
            Ok(())
        }
        Task::Bench { filter } => {
            let mut args = vec!["bench", "--workspace"];
            if let Some(filter) = filter.as_deref() {
                args.extend(["--", filter]);
            }
            cargo(&args)
        }
        Task::Fuzz { target, seconds } => {
            let limit = format!("-max_total_time={seconds}");
            cargo(&["+nightly", "fuzz", "run", &target, "--", &limit])
        }
        Task::Doc => cargo(&["doc", "--workspace", "--no-deps", "--open"]),
    }
}

fn cargo(args: &[&str]) -> anyhow::Result<()> {
    let status = Command::new("cargo")
        .args(args)
        .status()
        .with_context(|| format!("spawning cargo {}", args.join(" ")))?;
    if !status.success() {
        bail!("cargo {} exited with {status}", args.join(" "));
    }
    Ok(())
}
