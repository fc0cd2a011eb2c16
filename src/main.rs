//! unarchive CLI
//!
//! Extracts one file recursively and prints progress lines as archives are
//! unpacked. Exit status: 0 on success (or when the file is not an archive),
//! 1 when the file itself could not be extracted, 2 when some nested archive
//! failed.

use clap::{ArgAction, Parser};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing_subscriber::EnvFilter;
use unarchive::{
    ErrorSummary, Event, ExtractionConfig, Extractor, RarBackendKind, RarConfig, ReportSummary,
};

const EXIT_ROOT_FAILED: u8 = 1;
const EXIT_NESTED_FAILED: u8 = 2;

#[derive(Parser)]
#[command(name = "unarchive")]
#[command(
    author,
    version,
    about = "Recursively extract archives, detected by content"
)]
#[command(long_about = "
Detects ZIP, tar (plain, gzip, bzip2, xz), gzip and RAR archives from their
bytes, extracts each into <name>_extracted next to it, and repeats for every
archive found inside, up to --max-depth levels deep.

Examples:
  unarchive download.tar.gz
  unarchive release.zip --max-bytes 10000000000
  unarchive movie.rar --unrar /usr/local/bin/unrar
  unarchive bundle.zip --json
")]
struct Cli {
    /// File to extract
    file_path: PathBuf,

    /// Maximum nesting depth below the file itself
    #[arg(long, default_value_t = 32)]
    max_depth: u32,

    /// Stop once this many bytes have been extracted in total
    #[arg(long, value_name = "BYTES")]
    max_bytes: Option<u64>,

    /// unrar binary to use for RAR archives
    #[arg(long, value_name = "PATH", conflicts_with = "no_rar")]
    unrar: Option<PathBuf>,

    /// Report RAR archives as unsupported instead of extracting them
    #[arg(long)]
    no_rar: bool,

    /// Print the final report as JSON (machine-readable)
    #[arg(short, long)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn config(&self) -> ExtractionConfig {
        let backend = if self.no_rar {
            RarBackendKind::Disabled
        } else if self.unrar.is_some() {
            RarBackendKind::Cli
        } else {
            RarBackendKind::Auto
        };

        ExtractionConfig {
            max_depth: self.max_depth,
            max_total_bytes: self.max_bytes,
            rar: RarConfig {
                backend,
                unrar_path: self.unrar.clone(),
                ..RarConfig::default()
            },
            ..ExtractionConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let extractor = match Extractor::new(cli.config()) {
        Ok(extractor) => extractor,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::from(EXIT_ROOT_FAILED);
        }
    };

    let printer = (!cli.json).then(|| tokio::spawn(print_progress(extractor.subscribe())));

    let result = unarchive::extract_until_signal(&extractor, cli.file_path.clone()).await;

    // Dropping the last sender closes the channel so the printer drains and exits
    drop(extractor);
    if let Some(printer) = printer {
        printer.await.ok();
    }

    match result {
        Ok(report) => {
            if cli.json {
                print_json(&ReportSummary::from(&report));
            }
            if report.is_complete() {
                ExitCode::SUCCESS
            } else {
                eprintln!(
                    "{} nested archive(s) could not be extracted",
                    report.failures.len()
                );
                ExitCode::from(EXIT_NESTED_FAILED)
            }
        }
        Err(e) => {
            if cli.json {
                print_json(&ErrorSummary::from(&e));
            }
            eprintln!("error: {e}");
            ExitCode::from(EXIT_ROOT_FAILED)
        }
    }
}

/// Log to stderr; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn print_progress(mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(Event::Extracted {
                kind, output_dir, ..
            }) => println!("Extracted {kind} file to {}", output_dir.display()),
            Ok(Event::NestedArchiveFound { path, .. }) => {
                println!("Found nested archive: {}", path.display())
            }
            // The root failure is reported once, from main
            Ok(Event::ExtractionFailed { path, depth, error }) if depth > 0 => {
                eprintln!("Failed to extract {}: {}", path.display(), error.message)
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "progress output fell behind, events dropped")
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("error: failed to serialize report: {e}"),
    }
}
