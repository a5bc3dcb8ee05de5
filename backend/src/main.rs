//! Billreport CLI - split billing exports into per-customer workbooks
//!
//! # Main Commands
//!
//! ```bash
//! billreport serve                          # Start HTTP server (port 3001)
//! billreport process azure invoice.xlsx    # Split an export into workbooks
//! billreport list all                       # List generated workbooks
//! billreport archive tencent -o out.zip     # Zip generated workbooks
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! billreport parse bill.csv                 # Just parse to JSON records
//! billreport rules tencent                  # Print built-in rules as JSON
//! ```

use billreport::{
    config::ServerConfig, parse_file, process_file, ArchiveSelector, FsOutputStore, OutputStore,
    Provider, ProviderRules, RuleSet,
};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "billreport")]
#[command(about = "Split Azure and Tencent billing exports into per-customer workbooks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server
    Serve {
        /// Port to listen on (default: $PORT or 3001)
        #[arg(short, long)]
        port: Option<u16>,

        /// Output directory for generated workbooks
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory of static files served at /
        #[arg(long)]
        static_dir: Option<PathBuf>,

        /// Directory with azure.json / tencent.json rule overrides
        #[arg(long)]
        rules_dir: Option<PathBuf>,
    },

    /// Process one export file and write per-group workbooks
    Process {
        /// Provider: azure or tencent
        provider: Provider,

        /// Input file (.xlsx, or .csv for tencent)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output_dir: PathBuf,

        /// Rules JSON file instead of the built-in rules
        #[arg(short, long)]
        rules: Option<PathBuf>,
    },

    /// Parse an xlsx/csv file and output JSON records
    Parse {
        /// Input file
        input: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List generated workbooks
    List {
        /// azure, tencent or all
        #[arg(default_value = "all")]
        selector: ArchiveSelector,

        /// Output directory
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Zip generated workbooks
    Archive {
        /// azure, tencent or all
        selector: ArchiveSelector,

        /// Zip file to write (default: <type>_reports_<date>.zip)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output directory
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },

    /// Show the built-in rules for a provider
    Rules {
        /// Provider: azure or tencent
        provider: Provider,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            port,
            output_dir,
            static_dir,
            rules_dir,
        } => cmd_serve(port, output_dir, static_dir, rules_dir).await,

        Commands::Process {
            provider,
            input,
            output_dir,
            rules,
        } => cmd_process(provider, &input, &output_dir, rules.as_deref()),

        Commands::Parse { input, output } => cmd_parse(&input, output.as_deref()),

        Commands::List {
            selector,
            output_dir,
        } => cmd_list(selector, &output_dir),

        Commands::Archive {
            selector,
            output,
            output_dir,
        } => cmd_archive(selector, output, &output_dir),

        Commands::Rules { provider } => cmd_rules(provider),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn cmd_serve(
    port: Option<u16>,
    output_dir: Option<PathBuf>,
    static_dir: Option<PathBuf>,
    rules_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = ServerConfig::from_env()?;
    if let Some(port) = port {
        config.port = port;
    }
    if let Some(dir) = output_dir {
        config.output_dir = dir;
    }
    if let Some(dir) = static_dir {
        config.static_dir = dir;
    }
    if rules_dir.is_some() {
        config.rules_dir = rules_dir;
    }

    billreport::server::start_server(config).await?;
    Ok(())
}

fn cmd_process(
    provider: Provider,
    input: &Path,
    output_dir: &Path,
    rules_path: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Processing {} export: {}", provider, input.display());

    let rules = match rules_path {
        Some(path) => {
            let rules = ProviderRules::load(path)?;
            if rules.provider != provider {
                return Err(format!(
                    "Rules file {} is for {}, not {}",
                    path.display(),
                    rules.provider,
                    provider
                )
                .into());
            }
            rules
        }
        None => RuleSet::builtin().get(provider).clone(),
    };

    let store = FsOutputStore::open(output_dir)?;
    let today = chrono::Local::now().date_naive();
    let outcome = process_file(provider, input, &rules, &store, today)?;

    eprintln!("\n📦 {} workbook(s):", outcome.files.len());
    for file in &outcome.files {
        println!(
            "  {:<50} {:>6} rows  {:>14.2}",
            file.name, file.record_count, file.total
        );
    }
    eprintln!(
        "\n✨ Done! {} rows kept, {} dropped, total {:.2}",
        outcome.total_records, outcome.dropped_records, outcome.total_amount
    );
    eprintln!("   Written to: {}", store.provider_dir(provider).display());
    Ok(())
}

fn cmd_parse(input: &Path, output: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📄 Parsing: {}", input.display());

    let result = parse_file(input)?;

    if let Some(ref encoding) = result.encoding {
        eprintln!("   Encoding: {}", encoding);
    }
    if let Some(delimiter) = result.delimiter {
        eprintln!("   Delimiter: '{}'", format_delimiter(delimiter));
    }
    eprintln!("   Columns: {}", result.headers.join(", "));
    eprintln!("✅ Parsed {} records", result.records.len());

    let json = serde_json::to_string_pretty(&result.records)?;
    write_output(&json, output)?;
    Ok(())
}

fn cmd_list(selector: ArchiveSelector, output_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsOutputStore::open(output_dir)?;

    for provider in selector.providers() {
        let files = store.list(provider)?;
        println!("📁 {} ({}):", provider.display_name(), files.len());
        for file in files {
            println!(
                "  {:<50} {:>10} bytes  {}",
                file.name,
                file.size,
                file.created_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }
    Ok(())
}

fn cmd_archive(
    selector: ArchiveSelector,
    output: Option<PathBuf>,
    output_dir: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = FsOutputStore::open(output_dir)?;
    let bytes = store.archive(selector)?;

    let path = output.unwrap_or_else(|| {
        PathBuf::from(format!(
            "{}_reports_{}.zip",
            selector.as_str(),
            chrono::Local::now().date_naive().format("%Y-%m-%d")
        ))
    });
    fs::write(&path, &bytes)?;
    eprintln!("🗜️  Archive written to: {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn cmd_rules(provider: Provider) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", RuleSet::builtin().get(provider).to_json()?);
    Ok(())
}

fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

fn write_output(content: &str, path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}
