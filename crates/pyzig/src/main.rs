//! Pyzig CLI: compile a typed Python subset to native binaries via Zig.
//!
//! `pyzig script.py` compiles (if stale) and executes; `pyzig build` batch
//! compiles into an output directory.

use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use pyzig_core::ZigPipeline;

#[derive(Parser)]
#[command(
    name = "pyzig",
    about = "Python to Zig AOT compiler",
    version,
    args_conflicts_with_subcommands = true,
    after_help = "Examples:\n  \
        pyzig script.py              # Compile if needed, then execute\n  \
        pyzig build                  # Build all .py files recursively -> ./bin/\n  \
        pyzig build .                # Build current dir only (non-recursive)\n  \
        pyzig build examples/        # Build a directory -> ./bin/\n  \
        pyzig build script.py        # Build a single file\n  \
        pyzig script.py --show-ir    # Dump the generated Zig source\n\n\
        PYZIG_RELEASE=1 selects the release optimization mode.\n\
        PYZIG_CACHE=0 disables the build cache."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<CliCommand>,

    /// Python file to compile and run
    file: Option<PathBuf>,

    /// Output directory for the binary (default: alongside the source)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the generated Zig source before invoking the toolchain
    #[arg(long)]
    show_ir: bool,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Build Python files to binaries without running them
    Build {
        /// File or directory to build (default: everything, recursively)
        path: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "./bin")]
        output: PathBuf,

        /// Print the generated Zig source for each file
        #[arg(long)]
        show_ir: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Some(CliCommand::Build {
            path,
            output,
            show_ir,
        }) => cmd_build(path.as_deref(), &output, show_ir),
        None => match cli.file {
            Some(file) => cmd_run(&file, cli.output.as_deref(), cli.show_ir),
            None => {
                eprintln!("{} missing source file (try --help)", "error:".red());
                1
            }
        },
    };
    std::process::exit(exit_code);
}

/// Compile-if-stale and execute; the exit code is the child's.
fn cmd_run(source: &Path, output_dir: Option<&Path>, show_ir: bool) -> i32 {
    if !source.exists() {
        eprintln!("{} file not found: {}", "✗".red(), source.display());
        return 1;
    }

    let pipeline = ZigPipeline::new();
    let binary_path = output_dir.map(|dir| binary_path_for(source, dir));
    tracing::debug!(source = %source.display(), "run mode");

    if show_ir {
        if let Err(e) = dump_ir(&pipeline, source) {
            eprintln!("{} {e}", "✗".red());
            return 1;
        }
    }

    let binary = match pipeline.compile_file(source, binary_path.as_deref()) {
        Ok(binary) => binary,
        Err(e) => {
            eprintln!("{} error compiling {}: {e}", "✗".red(), source.display());
            return 1;
        }
    };

    match Command::new(&binary).status() {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("{} failed to run {}: {e}", "✗".red(), binary.display());
            1
        }
    }
}

/// Build one file or a directory tree into `output_dir`.
fn cmd_build(path: Option<&str>, output_dir: &Path, show_ir: bool) -> i32 {
    // A trailing slash or an explicit `.` limits the walk to one level
    let (root, recursive) = match path {
        None => (PathBuf::from("."), true),
        Some(raw) => {
            let recursive = !(raw == "." || raw.ends_with('/'));
            (PathBuf::from(raw.trim_end_matches('/')), recursive)
        }
    };

    let files = collect_python_files(&root, recursive);
    if files.is_empty() {
        eprintln!("{} No Python files found in {}", "✗".red(), root.display());
        return 1;
    }

    println!("Building {} file(s)...\n", files.len());
    let pipeline = ZigPipeline::new();
    let mut compiled = 0usize;
    let mut failed = 0usize;

    for source in &files {
        let binary = binary_path_for(source, output_dir);
        println!("  {:30} → {}", source.display().to_string(), binary.display());

        if show_ir {
            if let Err(e) = dump_ir(&pipeline, source) {
                eprintln!("{} {e}", "✗".red());
                failed += 1;
                continue;
            }
        }
        match pipeline.compile_file(source, Some(&binary)) {
            Ok(_) => compiled += 1,
            Err(e) => {
                eprintln!("{} error compiling {}: {e}", "✗".red(), source.display());
                failed += 1;
            }
        }
    }

    println!(
        "\n{} Build complete: {compiled} compiled, {failed} failed",
        if failed == 0 { "✓".green() } else { "✗".red() }
    );
    if failed > 0 {
        1
    } else {
        0
    }
}

fn dump_ir(pipeline: &ZigPipeline, source: &Path) -> Result<()> {
    let zig_code = pipeline
        .generate_file(source)
        .with_context(|| format!("generating Zig for {}", source.display()))?;
    println!("{}", "=".repeat(60));
    println!("Generated Zig code for {}:", source.display());
    println!("{}", "=".repeat(60));
    println!("{zig_code}");
    println!("{}", "=".repeat(60));
    Ok(())
}

fn binary_path_for(source: &Path, output_dir: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "a.out".to_string());
    output_dir.join(stem)
}

fn collect_python_files(path: &Path, recursive: bool) -> Vec<PathBuf> {
    if path.is_file() {
        return if path.extension().is_some_and(|ext| ext == "py") {
            vec![path.to_path_buf()]
        } else {
            Vec::new()
        };
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "py"))
        .collect();
    files.sort();
    files
}
