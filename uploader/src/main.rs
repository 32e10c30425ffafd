//! Listload CLI - Upload large contact lists in chunks
//!
//! # Main Commands
//!
//! ```bash
//! listload upload contatos.txt --campaign-id 42   # Preview, confirm, upload
//! listload serve                                  # Start HTTP server (port 3000)
//! ```
//!
//! # Inspection Commands
//!
//! ```bash
//! listload preview contatos.csv    # Separator, headers and sample rows
//! listload plan contatos.txt       # Chunk sizes, without uploading
//! ```

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use listload::api::logs::LOG_BROADCASTER;
use listload::{
    plan_chunks, preview_file, read_path, HttpIngestClient, JobState, Orchestrator, PlanSummary,
    Preview, RawFile, UploadJob, UploadParams, UploadSummary, UploaderConfig,
};
use std::fs;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Exit code when the job ended with failed chunks or was cancelled.
const EXIT_INCOMPLETE: i32 = 2;

#[derive(Parser)]
#[command(name = "listload")]
#[command(about = "Upload large contact lists to the ingestion API in chunks", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected separator, headers and a few sample rows
    Preview {
        /// Input file (.txt, .csv or .tsv)
        input: PathBuf,
    },

    /// Show how a file would be split into chunks
    Plan {
        /// Input file (.txt or .csv)
        input: PathBuf,
    },

    /// Preview, confirm and upload a contact list
    Upload(UploadArgs),

    /// Start HTTP server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
}

#[derive(Args)]
struct UploadArgs {
    /// Input file (.txt or .csv)
    input: PathBuf,

    /// Campaign the contacts belong to
    #[arg(long)]
    campaign_id: Option<String>,

    /// Country hint for phone normalization
    #[arg(long, default_value = "auto")]
    country: String,

    /// The file has a name column
    #[arg(long)]
    include_name: bool,

    /// API base URL (overrides LISTLOAD_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token (overrides LISTLOAD_API_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// Timeout of a single chunk request, in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Pause between chunks, in milliseconds
    #[arg(long)]
    pause_ms: Option<u64>,

    /// Retries per failed chunk
    #[arg(long)]
    max_retries: Option<u32>,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    yes: bool,

    /// Write the final summary as JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Preview { input } => cmd_preview(&input).await.map(|_| 0),
        Commands::Plan { input } => cmd_plan(&input).await.map(|_| 0),
        Commands::Upload(args) => cmd_upload(args).await,
        Commands::Serve { port } => cmd_serve(port).await.map(|_| 0),
    };

    match result {
        Ok(0) => {}
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("❌ Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn cmd_preview(input: &Path) -> CliResult {
    eprintln!("📄 Preview: {}", input.display());

    let file = RawFile::open(input).await?;
    let preview = preview_file(&file)?;
    print_preview(&preview);

    Ok(())
}

async fn cmd_plan(input: &Path) -> CliResult {
    eprintln!("📄 Planning: {}", input.display());

    let (_, lines) = read_path(input).await?;
    let plan = plan_chunks(&lines);
    print_plan(&plan.summary());

    for chunk in plan.iter() {
        println!(
            "   #{:04}  lines {:>7} - {:>7}  ({} lines)",
            chunk.index + 1,
            chunk.offset + 1,
            chunk.offset + chunk.size(),
            chunk.size()
        );
    }

    Ok(())
}

async fn cmd_upload(args: UploadArgs) -> CliResult<i32> {
    let config = upload_config(&args)?;

    eprintln!("📄 Processing: {}", args.input.display());
    let mut job = UploadJob::new(RawFile::open(&args.input).await?);
    let preview = job.prepare()?.clone();
    print_preview(&preview);

    let plan = job.plan()?.summary();
    print_plan(&plan);
    eprintln!("   Endpoint: {}", config.upload_url());

    if !args.yes && !confirm("\nStart the upload? [y/N] ")? {
        eprintln!("Upload aborted.");
        return Ok(0);
    }

    let orchestrator = Orchestrator::new(HttpIngestClient::new(&config)?, &config);
    let params = UploadParams {
        campaign_id: args.campaign_id.clone(),
        country: args.country.clone(),
        include_name: args.include_name,
        file_name: job.file().name().to_string(),
    };

    let cancel = CancellationToken::new();
    let bar = progress_bar(plan.total_lines as u64);
    LOG_BROADCASTER.set_echo(bar.is_hidden());

    let ctrlc_task = {
        let cancel = cancel.clone();
        let bar = bar.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                bar.println("⏹  Cancelling after the current chunk...");
                cancel.cancel();
            }
        })
    };

    let bar_task = {
        let mut snapshots = job.subscribe();
        let bar = bar.clone();
        tokio::spawn(async move {
            while snapshots.changed().await.is_ok() {
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(summary) = snapshot.summary {
                    bar.set_position(summary.processed_lines as u64);
                    bar.set_message(summary.status_message);
                }
            }
        })
    };

    let result = job.upload(&orchestrator, &params, &cancel).await;

    ctrlc_task.abort();
    bar_task.abort();
    bar.finish_and_clear();
    LOG_BROADCASTER.set_echo(true);

    let summary = result?;
    print_summary(&summary);

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&summary)?;
        write_output(&json, path)?;
    }

    Ok(match summary.state {
        JobState::Succeeded => 0,
        _ => EXIT_INCOMPLETE,
    })
}

async fn cmd_serve(port: u16) -> CliResult {
    let config = UploaderConfig::from_env()?;
    listload::server::start_server(port, config).await
}

/// Environment configuration with command line overrides applied.
fn upload_config(args: &UploadArgs) -> CliResult<UploaderConfig> {
    let mut config = UploaderConfig::from_env()?;

    if let Some(url) = &args.api_url {
        config.api_url = url.clone();
    }
    if let Some(token) = &args.token {
        config.api_token = Some(token.clone());
    }
    if let Some(secs) = args.timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }
    if let Some(ms) = args.pause_ms {
        config.chunk_pause = Duration::from_millis(ms);
    }
    if let Some(retries) = args.max_retries {
        config.retry.max_retries = retries;
    }

    config.validate()?;
    Ok(config)
}

fn print_preview(preview: &Preview) {
    eprintln!("   Separator: '{}'", preview.separator.label());
    eprintln!("   Columns: {}", preview.headers.join(", "));
    eprintln!("   Rows: {}", preview.total_rows);
    eprintln!();

    println!("   {}", preview.headers.join(" | "));
    for row in &preview.sample_rows {
        println!("   {}", row.join(" | "));
    }
    if preview.total_rows > preview.sample_rows.len() {
        println!("   ... {} more", preview.total_rows - preview.sample_rows.len());
    }
}

fn print_plan(plan: &PlanSummary) {
    eprintln!("\n📦 Plan:");
    eprintln!("   Lines: {}", plan.total_lines);
    eprintln!("   Chunk size: {}", plan.chunk_size);
    eprintln!(
        "   Chunks: {} (last holds {} lines)",
        plan.total_chunks, plan.last_chunk_size
    );
}

fn print_summary(summary: &UploadSummary) {
    println!("\n{}", "=".repeat(70));
    println!("📊 SUMMARY");
    println!("{}", "=".repeat(70));
    println!("   Total lines:    {}", summary.total_lines);
    println!("   Processed:      {}", summary.processed_lines);
    println!("   Valid:          {}", summary.valid_total);
    println!("   Invalid:        {}", summary.invalid_total);
    println!("   Duplicates:     {}", summary.duplicate_total);
    println!("   Success rate:   {:.1}%", summary.success_rate());
    println!(
        "   Chunks:         {}/{} ({} failed)",
        summary.chunks_done, summary.total_chunks, summary.failed_chunks
    );
    println!("   Status:         {}", summary.state);
    println!("{}\n", "=".repeat(70));

    match summary.state {
        JobState::Succeeded => eprintln!("✨ Done!"),
        JobState::PartiallyFailed => eprintln!("⚠️  {}", summary.status_message),
        _ => eprintln!("⏹  {}", summary.status_message),
    }
}

fn progress_bar(total: u64) -> ProgressBar {
    if !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} lines ({percent:>3}%) | {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn confirm(prompt: &str) -> io::Result<bool> {
    eprint!("{}", prompt);
    io::stderr().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(matches!(
        input.trim().to_ascii_lowercase().as_str(),
        "y" | "yes" | "s" | "sim"
    ))
}

fn write_output(content: &str, path: &Path) -> CliResult {
    fs::write(path, content)?;
    eprintln!("💾 Summary written to: {}", path.display());
    Ok(())
}
