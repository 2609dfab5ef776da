mod clarifier;
mod config;
mod dates;
mod document;
mod financial;
mod generator;
mod llm;
mod normalise;
mod orchestrator;
mod render;
mod schema;
mod storage;
mod validator;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use config::{BusinessUpdate, Config, DEFAULT_CONFIG_PATH};
use document::Document;
use financial::agent::{FinancialAgent, ProcessingResult, collect_images};
use financial::report::{format_currency, summary_report};
use financial::store::{FinancialStore, StoredDocument};
use financial::{parse_indian_date, validate_utr};
use llm::{ChatClient, LlmClient, LlmError, resolve_endpoint};
use orchestrator::{ConversationContext, Orchestrator, Outcome};
use serde_json::{Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "vyapaar", version)]
#[command(about = "Hinglish commands to GST invoices, bills, quotations and receipts")]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a document from a command; starts interactive mode without one
    Doc {
        /// Render a PDF for every completed document
        #[arg(long)]
        pdf: bool,

        /// The command, e.g. "Rahul ko 50 bag cement ka pakka bill, 380 per bag"
        words: Vec<String>,
    },
    /// Extract data from a UPI screenshot, bill or handwritten note
    Scan {
        image: PathBuf,

        /// Also save the extraction to the database
        #[arg(long)]
        store: bool,
    },
    /// Extract data from several images
    Batch {
        /// Directory containing images
        #[arg(short, long, conflicts_with = "images", required_unless_present = "images")]
        directory: Option<PathBuf>,

        /// List of image paths
        #[arg(short, long, num_args = 1..)]
        images: Vec<PathBuf>,

        /// Also save successful extractions to the database
        #[arg(long)]
        store: bool,
    },
    /// Show statistics for stored financial documents
    Stats,
    /// Look up stored financial documents; lists them all without a filter
    Find(FindArgs),
    /// Remove a stored financial document
    Delete { id: i64 },
}

#[derive(Args, Debug)]
struct FindArgs {
    #[arg(long, conflicts_with_all = ["utr", "invoice", "vendor", "from"])]
    id: Option<i64>,

    /// UPI transaction reference
    #[arg(long, conflicts_with_all = ["invoice", "vendor", "from"])]
    utr: Option<String>,

    #[arg(long, conflicts_with_all = ["vendor", "from"])]
    invoice: Option<String>,

    /// Case-insensitive part of the vendor name
    #[arg(long, conflicts_with = "from")]
    vendor: Option<String>,

    /// Start of a date range, e.g. 01/02/2026 or 2026-02-01
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// End of the date range, inclusive
    #[arg(long, requires = "from")]
    to: Option<String>,

    #[arg(long, default_value_t = 100)]
    limit: i64,

    #[arg(long, default_value_t = 0)]
    offset: i64,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load_or_default(&cli.config)?;

    match cli.command {
        Command::Stats => stats(&config),
        Command::Find(args) => {
            let store = open_store(&config)?;
            let found = find_documents(&store, &args)?;
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Delete { id } => {
            let deleted = open_store(&config)?.delete(id)?;
            println!("{}", serde_json::to_string_pretty(&json!({"id": id, "deleted": deleted}))?);
            Ok(exit_code(deleted))
        }
        Command::Doc { pdf, words } => {
            let Some(llm) = connect(&config).await? else {
                return Ok(ExitCode::FAILURE);
            };
            let orchestrator = Orchestrator::new(llm, &config);
            if words.is_empty() {
                interactive(&orchestrator, &mut config, &cli.config, pdf).await
            } else {
                single(&orchestrator, &config, &words.join(" "), pdf).await
            }
        }
        Command::Scan { image, store } => {
            let Some(llm) = connect(&config).await? else {
                return Ok(ExitCode::FAILURE);
            };
            let agent = FinancialAgent::new(llm, config.financial.clone());
            let result = agent.process_image(&image).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if store && result.is_success() {
                store_results(&config, &[(image, result.clone())])?;
            }
            Ok(exit_code(result.is_success()))
        }
        Command::Batch {
            directory,
            images,
            store,
        } => {
            let images = match directory {
                Some(dir) => {
                    anyhow::ensure!(dir.is_dir(), "{} is not a valid directory", dir.display());
                    collect_images(&dir, &config.financial.supported_formats)
                        .with_context(|| format!("failed to list {}", dir.display()))?
                }
                None => images,
            };
            if images.is_empty() {
                eprintln!("No images found to process");
                return Ok(ExitCode::FAILURE);
            }

            let Some(llm) = connect(&config).await? else {
                return Ok(ExitCode::FAILURE);
            };
            let agent = FinancialAgent::new(llm, config.financial.clone());
            let run = agent.batch_process(&images).await?;
            println!("{}", summary_report(&run.results));
            println!("Batch results saved to {}", run.log_path.display());
            if store {
                let pairs: Vec<_> = images.into_iter().zip(run.results).collect();
                store_results(&config, &pairs)?;
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Resolve and health-check the model endpoint. A missing credential is
/// reported as JSON on stdout and yields `None`.
async fn connect(config: &Config) -> Result<Option<Arc<dyn LlmClient>>> {
    let endpoint = match resolve_endpoint(&config.llm, |key| std::env::var(key).ok()) {
        Ok(endpoint) => endpoint,
        Err(LlmError::MissingApiKey) => {
            let report = json!({
                "error": "GEMINI_API_KEY not found in environment",
                "help": "Set GEMINI_API_KEY (or LLM_API_KEY) in your environment or a .env file, or switch [llm] backend to ollama",
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let client = ChatClient::new(endpoint, Duration::from_secs(config.llm.timeout_secs))?;
    client.ensure_ready().await?;
    info!(model = %client.endpoint().model, "Model ready");
    Ok(Some(Arc::new(client)))
}

async fn single(orchestrator: &Orchestrator, config: &Config, command: &str, pdf: bool) -> Result<ExitCode> {
    let outcome = orchestrator.process(command, None).await;
    let mut report = serde_json::to_value(&outcome)?;
    if let (true, Outcome::Complete { document, .. }) = (pdf, &outcome) {
        attach_pdf(&mut report, document, config);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(!matches!(outcome, Outcome::Error { .. })))
}

async fn interactive(
    orchestrator: &Orchestrator,
    config: &mut Config,
    config_path: &Path,
    always_pdf: bool,
) -> Result<ExitCode> {
    println!("Vyapaar document assistant. Type a command, 'config' to set business details, or 'quit' to exit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut context: Option<ConversationContext> = None;

    while let Some(input) = prompt(&mut lines, "> ").await? {
        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        match input.to_lowercase().as_str() {
            "quit" | "exit" | "q" => break,
            "config" => {
                configure_business(&mut lines, config, config_path).await?;
                continue;
            }
            _ => {}
        }

        let merged = match &context {
            Some(ctx) => ctx.merge(input),
            None => input.to_string(),
        };
        let outcome = orchestrator.process(input, context.as_ref()).await;
        println!("{}", serde_json::to_string_pretty(&outcome)?);

        context = ConversationContext::from_outcome(&merged, &outcome);
        match &outcome {
            Outcome::NeedsClarification {
                clarification_questions,
                ..
            } => {
                for question in clarification_questions {
                    println!("? {question}");
                }
            }
            Outcome::Complete { document, json_path } => {
                println!("Saved {}", json_path.display());
                let wants_pdf = always_pdf
                    || prompt(&mut lines, "Generate PDF? (y/n): ")
                        .await?
                        .is_some_and(|a| a.trim().eq_ignore_ascii_case("y"));
                if wants_pdf {
                    match render_document(document, config) {
                        Ok(path) => println!("PDF saved to {}", path.display()),
                        Err(e) => warn!(error = %e, "PDF generation failed"),
                    }
                }
            }
            Outcome::Error { message } => println!("Error: {message}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn prompt(lines: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?)
}

async fn configure_business(
    lines: &mut Lines<BufReader<Stdin>>,
    config: &mut Config,
    config_path: &Path,
) -> Result<()> {
    let business = &config.business;
    let update = BusinessUpdate {
        name: ask(lines, "Business name", &business.name).await?,
        address: ask(lines, "Address", &business.address).await?,
        gstin: ask(lines, "GSTIN", &business.gstin).await?,
        phone: ask(lines, "Phone", &business.phone).await?,
        email: ask(lines, "Email", &business.email).await?,
    };
    Config::update_business(config_path, &update)?;
    config.business.apply(&update);
    println!("Business details saved to {}", config_path.display());
    Ok(())
}

/// Blank answers keep the current value.
async fn ask(lines: &mut Lines<BufReader<Stdin>>, label: &str, current: &str) -> Result<Option<String>> {
    let answer = prompt(lines, &format!("{label} [{current}]: ")).await?;
    Ok(answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()))
}

fn render_document(document: &Document, config: &Config) -> Result<PathBuf> {
    let normalized = normalise::normalize(document);
    let path = render::render_pdf(&normalized, &config.business, config.output.dir.join("pdf"))?;
    Ok(path)
}

/// Render a completed document and note the PDF path, or why there is none,
/// on the printed report. The JSON is already saved either way.
fn attach_pdf(report: &mut Value, document: &Document, config: &Config) {
    match render_document(document, config) {
        Ok(path) => report["pdf_path"] = Value::String(path.display().to_string()),
        Err(e) => {
            warn!(error = %e, "PDF generation failed");
            report["pdf_error"] = Value::String(format!("{e:#}"));
        }
    }
}

fn open_store(config: &Config) -> Result<FinancialStore> {
    FinancialStore::new(&config.financial.db_path)
        .with_context(|| format!("failed to open {}", config.financial.db_path.display()))
}

fn find_documents(store: &FinancialStore, args: &FindArgs) -> Result<Vec<StoredDocument>> {
    if let Some(id) = args.id {
        return Ok(store.get_by_id(id)?.into_iter().collect());
    }
    if let Some(utr) = &args.utr {
        anyhow::ensure!(validate_utr(utr), "'{utr}' is not a UTR (10-20 letters or digits)");
        let utr = utr.replace(' ', "").to_uppercase();
        return Ok(store.get_by_utr(&utr)?.into_iter().collect());
    }
    if let Some(number) = &args.invoice {
        return Ok(store.get_by_invoice_number(number)?.into_iter().collect());
    }
    if let Some(vendor) = &args.vendor {
        return Ok(store.get_by_vendor(vendor)?);
    }
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        let start = parse_indian_date(from).with_context(|| format!("unrecognised date '{from}'"))?;
        let end = parse_indian_date(to).with_context(|| format!("unrecognised date '{to}'"))?;
        return Ok(store.get_by_date_range(&start, &end)?);
    }
    Ok(store.get_all(args.limit, args.offset)?)
}

fn store_results(config: &Config, results: &[(PathBuf, ProcessingResult)]) -> Result<()> {
    let store = open_store(config)?;
    for (path, result) in results {
        let Some(data) = result.data.as_ref().filter(|_| result.is_success()) else {
            continue;
        };
        let image = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        match store.save_extraction(
            &image,
            data,
            Some(&path.display().to_string()),
            result.confidence_score,
        ) {
            Ok(id) => info!(id, path = %path.display(), "Stored extraction"),
            Err(e) => warn!(error = %e, path = %path.display(), "Could not store extraction"),
        }
    }
    Ok(())
}

fn stats(config: &Config) -> Result<ExitCode> {
    let stats = open_store(config)?.statistics()?;
    let report = json!({
        "total_documents": stats.total_documents,
        "by_type": stats.by_type,
        "total_amount": stats.total_amount,
        "total_amount_formatted": format_currency(stats.total_amount),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(ExitCode::SUCCESS)
}

fn exit_code(success: bool) -> ExitCode {
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
