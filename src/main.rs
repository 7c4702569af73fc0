mod error;
mod splitter;

use anyhow::Result;
use clap::{ArgGroup, Parser};
use console::style;
use splitter::{Column, Splitter};
use tracing_subscriber::EnvFilter;

/// A simple CLI tool to split a sorted delimited file into one file per
/// value of a column.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("split_column").required(true).args(["column", "column_name"])))]
struct Args {
    /// The input file; Must be sorted by the split column
    #[arg(short, long)]
    input: String,

    /// The column to split on (1-n)
    #[arg(short = 'n', long)]
    column: Option<usize>,

    /// The name of the column to split on, looked up in the header
    #[arg(short = 'c', long)]
    column_name: Option<String>,

    /// The prefix of the output file names; May contain a directory path
    #[arg(long)]
    stub: String,

    /// The suffix of the output file names (i.e. .tsv)
    #[arg(long)]
    suffix: String,

    /// The field delimiter
    #[arg(short, long, default_value = "\t")]
    delimiter: char,

    /// Strip everything but [0-9A-Za-z_.-] from column values used in file names
    #[arg(long)]
    sanitize: bool,

    /// Log every closed output file
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("{} {}", style("error:").red().bold(), style(format!("{err:#}")).red());
        std::process::exit(1);
    }
}

fn setup_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(
            level,
            std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        ))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// `RUST_LOG` directives take precedence; `level` only applies when none
/// are given.
fn log_filter(level: tracing::Level, directives: Option<String>) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(directives.unwrap_or_default())
}

impl Args {
    fn split_column(&mut self) -> Column {
        match (self.column, self.column_name.take()) {
            (Some(idx), _) => Column::Index(idx),
            (None, Some(name)) => Column::Name(name),
            (None, None) => unreachable!("clap requires one of --column and --column-name"),
        }
    }
}

fn run(mut args: Args) -> Result<()> {
    let column = args.split_column();

    let splitter =
        Splitter::new(column, args.delimiter, args.stub, args.suffix).sanitize(args.sanitize);

    let summary = splitter.split_file(&args.input)?;

    if !summary.truncated.is_empty() {
        tracing::warn!(
            "{} keys were not contiguous and their files got truncated: {}",
            summary.truncated.len(),
            summary.truncated.join(", ")
        );
    }
    tracing::info!(
        "Wrote {} records to {} files",
        summary.records,
        summary.files
    );

    Ok(())
}
