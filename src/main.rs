//! Command-line front end for the pdfattach crate.
//!
//! Every subcommand opens the PDF in place; `add` and `remove` append one
//! incremental update to it.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pdfattach::{
    AttachConfig, AttachmentInput, CollectionView, DirectorySink, FileStorage, PdfDocument,
};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pdfattach", version, about = "Manage embedded-file attachments in PDF documents")]
struct Cli {
    /// Maximum entries per name-tree node
    #[arg(long, global = true, default_value_t = 32)]
    fan_out: usize,

    /// Rewrite the whole file instead of appending an incremental update
    #[arg(long, global = true)]
    rewrite: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attachments in name order
    List { file: PathBuf },

    /// Attach files; each INPUT is "path" or "path, description"
    Add {
        file: PathBuf,
        #[arg(required = true)]
        inputs: Vec<String>,
        /// Also turn the document into a portfolio with this initial view
        #[arg(long, value_enum)]
        portfolio: Option<View>,
    },

    /// Extract attachments (all when no NAME is given) into DIR
    Extract {
        file: PathBuf,
        dir: PathBuf,
        names: Vec<String>,
    },

    /// Remove attachments (all when no NAME is given)
    Remove { file: PathBuf, names: Vec<String> },

    /// Report structural problems without changing the file
    Validate { file: PathBuf },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum View {
    Details,
    Tile,
    Hidden,
}

impl From<View> for CollectionView {
    fn from(view: View) -> Self {
        match view {
            View::Details => CollectionView::Details,
            View::Tile => CollectionView::Tile,
            View::Hidden => CollectionView::Hidden,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = AttachConfig {
        fan_out: cli.fan_out,
        always_rewrite: cli.rewrite,
        ..Default::default()
    };
    let open = |file: &PathBuf| {
        PdfDocument::open(FileStorage::new(file), config.clone())
            .with_context(|| format!("failed to open {}", file.display()))
    };

    match cli.command {
        Command::List { file } => {
            let doc = open(&file)?;
            let entries = doc.list()?;
            if entries.is_empty() {
                println!("ℹ️  No embedded files found");
                return Ok(());
            }
            for entry in entries {
                match entry.description {
                    Some(desc) => println!("📄 {}  ({desc})", entry.name),
                    None => println!("📄 {}", entry.name),
                }
            }
        }

        Command::Add {
            file,
            inputs,
            portfolio,
        } => {
            let mut doc = open(&file)?;
            let inputs: Vec<AttachmentInput> = inputs.iter().map(|s| AttachmentInput::parse(s)).collect();
            let count = inputs.len();
            let written = match portfolio {
                Some(view) => doc.add_to_portfolio(inputs, view.into())?,
                None => doc.add(inputs)?,
            };
            match written {
                Some(rev) => println!(
                    "✅ Attached {count} file(s) as revision {} ({})",
                    rev.revision,
                    format_bytes((rev.range.end - rev.range.start) as usize)
                ),
                None => println!("ℹ️  Nothing to attach"),
            }
        }

        Command::Extract { file, dir, names } => {
            let doc = open(&file)?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let mut sink = DirectorySink::new(&dir);
            let report = doc.extract(&names, &mut sink)?;

            for path in sink.written() {
                println!("💾 {}", path.display());
            }
            for failure in &report.failures {
                println!("⚠️  {}: {}", failure.name, failure.error);
            }
            println!("📊 {} file(s) extracted to {}", report.count(), dir.display());
        }

        Command::Remove { file, names } => {
            let mut doc = open(&file)?;
            let names: Vec<&str> = names.iter().map(String::as_str).collect();
            let report = doc.remove(&names)?;
            for name in &report.removed {
                println!("🗑️  {name}");
            }
            for name in &report.not_found {
                println!("⚠️  {name}: not found");
            }
            println!("📊 {} attachment(s) removed", report.removed.len());
        }

        Command::Validate { file } => {
            let doc = open(&file)?;
            let report = doc.validate();
            if !report.is_valid() {
                println!("{report}");
                bail!("{} violation(s) found", report.violations.len());
            }
            println!("✅ No violations");
        }
    }

    Ok(())
}

fn format_bytes(bytes: usize) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}
