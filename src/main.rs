mod categorizer;
mod config;
mod contacts;
mod db;
mod enrich;
mod error;
mod export;
mod extractor;
mod fetcher;
mod models;
mod pipeline;
mod portals;
mod profile;
mod rate_limit;
mod registry;

#[cfg(feature = "browser")]
mod browser;

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use config::Settings;
use db::Database;
use models::{JobType, Keywords, Market, PostingFilter, RunLog, RunParameters, SourceFilter};
use pipeline::{CancelToken, Orchestrator};
use registry::SourceRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobsweep")]
#[command(about = "Sweep job boards for fresh postings, enrich the companies, and find who to talk to")]
struct Cli {
    /// Path to a settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and register the built-in sources
    Init,

    /// Manage job sources
    Sources {
        #[command(subcommand)]
        command: SourceCommands,
    },

    /// Run a sweep across the active sources
    Run {
        /// Comma-separated keywords. Defaults to a suggested list.
        #[arg(short, long)]
        keywords: Option<String>,

        /// Market to search (USA, UK)
        #[arg(short, long, default_value = "USA")]
        market: Market,

        /// Job type to record, or "all" to infer it per posting
        #[arg(short, long, default_value = "all")]
        job_type: String,

        /// Treat ambiguous postings as technical (default)
        #[arg(long, conflicts_with = "non_technical")]
        technical: bool,

        /// Treat ambiguous postings as non-technical
        #[arg(long)]
        non_technical: bool,

        /// Only keep postings from the last N hours
        #[arg(long, default_value = "24")]
        hours_back: u32,

        /// Source name, or "All"
        #[arg(short, long, default_value = "All")]
        source: SourceFilter,

        /// Render pages through a WebDriver server at this URL
        /// (requires the `browser` feature)
        #[arg(long)]
        webdriver: Option<String>,
    },

    /// List recent runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show the status of a run
    Status {
        /// Run ID
        id: i64,
    },

    /// List stored postings
    List {
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show a posting with its company and contacts
    Show {
        /// Posting ID
        id: i64,
    },

    /// Export postings and contacts to CSV
    Export {
        /// Output file
        #[arg(short, long)]
        out: PathBuf,

        /// Write one file per market and category
        #[arg(long)]
        split: bool,

        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Categorize a job title as technical or non-technical
    Categorize {
        /// Job title
        title: String,

        /// Optional description text
        #[arg(short, long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum SourceCommands {
    /// List sources with their activation state
    List,

    /// Write the built-in and configured sources to the database
    Sync,

    /// Include a source in runs
    Enable {
        /// Source name
        name: String,
    },

    /// Exclude a source from runs
    Disable {
        /// Source name
        name: String,
    },
}

#[derive(clap::Args)]
struct FilterArgs {
    /// Filter by market (USA, UK)
    #[arg(short, long)]
    market: Option<Market>,

    /// Only technical postings
    #[arg(long, conflicts_with = "non_technical")]
    technical: bool,

    /// Only non-technical postings
    #[arg(long)]
    non_technical: bool,

    /// Filter by source name
    #[arg(short, long)]
    source: Option<String>,

    /// Only postings dated on or after this day (YYYY-MM-DD)
    #[arg(long)]
    since: Option<NaiveDate>,

    /// Maximum number of postings
    #[arg(short, long)]
    limit: Option<usize>,
}

impl FilterArgs {
    fn to_filter(&self) -> PostingFilter {
        PostingFilter {
            market: self.market,
            is_technical: match (self.technical, self.non_technical) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            },
            source: self.source.clone(),
            posted_since: self.since,
            limit: self.limit,
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "jobsweep=debug" } else { "jobsweep=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_database(settings: &Settings) -> Result<Database> {
    let path = settings.database_path();
    Database::open_at(&path).with_context(|| format!("Failed to open database at {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let settings = Settings::load(cli.config.as_deref())?;
    let db = open_database(&settings)?;

    match cli.command {
        Commands::Init => {
            db.init()?;
            let mut registry = SourceRegistry::from_settings(&settings)?;
            registry.sync(&db)?;
            println!("Database initialized at {}", db.path().display());
            println!("{} sources registered.", registry.sources().len());
        }

        Commands::Sources { command } => {
            db.ensure_initialized()?;
            match command {
                SourceCommands::List => {
                    let sources = db.list_sources()?;
                    if sources.is_empty() {
                        println!("No sources stored. Run `jobsweep sources sync` first.");
                    } else {
                        println!("{:<5} {:<8} {:<24} {:<40} {:>8}", "ID", "ACTIVE", "NAME", "BASE URL", "POSTINGS");
                        println!("{}", "-".repeat(89));
                        for source in sources {
                            println!(
                                "{:<5} {:<8} {:<24} {:<40} {:>8}",
                                source.id,
                                if source.active { "yes" } else { "no" },
                                truncate(&source.name, 22),
                                truncate(&source.base_url, 38),
                                source.postings
                            );
                        }
                    }
                }

                SourceCommands::Sync => {
                    let mut registry = SourceRegistry::from_settings(&settings)?;
                    registry.sync(&db)?;
                    let active = registry.sources().iter().filter(|s| s.active).count();
                    println!(
                        "Synced {} sources ({} active).",
                        registry.sources().len(),
                        active
                    );
                }

                SourceCommands::Enable { name } => set_active(&db, &settings, &name, true)?,
                SourceCommands::Disable { name } => set_active(&db, &settings, &name, false)?,
            }
        }

        Commands::Run {
            keywords,
            market,
            job_type,
            technical: _,
            non_technical,
            hours_back,
            source,
            webdriver,
        } => {
            db.ensure_initialized()?;

            let is_technical = !non_technical;
            let job_type = if job_type.trim().eq_ignore_ascii_case("all") {
                None
            } else {
                Some(job_type.parse::<JobType>()?)
            };
            let keywords = match keywords {
                Some(k) => Keywords::One(k),
                None => {
                    let suggested = categorizer::suggested_keywords(is_technical);
                    println!("No keywords given, using: {}", suggested.join(", "));
                    Keywords::Many(suggested.iter().map(|s| s.to_string()).collect())
                }
            };
            let params = RunParameters {
                keywords,
                market,
                job_type,
                is_technical,
                hours_back,
                source_filter: source,
            };

            let db = Arc::new(Mutex::new(db));
            #[cfg(feature = "browser")]
            let orchestrator = match webdriver {
                Some(server) => Orchestrator::with_transport(
                    &settings,
                    db,
                    Arc::new(browser::BrowserTransport::new(server)),
                )?,
                None => Orchestrator::from_settings(&settings, db)?,
            };
            #[cfg(not(feature = "browser"))]
            let orchestrator = match webdriver {
                Some(_) => return Err(anyhow!("--webdriver needs a build with the `browser` feature")),
                None => Orchestrator::from_settings(&settings, db)?,
            };

            let cancel = CancelToken::new();
            {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        eprintln!("Interrupted, finishing in-flight work...");
                        cancel.cancel("interrupted by operator");
                    }
                });
            }

            println!(
                "Sweeping {} for the last {} hours...",
                market.label(),
                hours_back
            );
            let run = orchestrator.run(params, cancel).await?;
            print_run(&run);
        }

        Commands::Runs { limit } => {
            db.ensure_initialized()?;
            let runs = db.list_runs(limit)?;
            if runs.is_empty() {
                println!("No runs yet.");
            } else {
                println!(
                    "{:<5} {:<12} {:<20} {:>9} {:>10} {:>9} {:>9}",
                    "ID", "STATUS", "STARTED", "POSTINGS", "COMPANIES", "CONTACTS", "UNITS"
                );
                println!("{}", "-".repeat(80));
                for run in runs {
                    println!(
                        "{:<5} {:<12} {:<20} {:>9} {:>10} {:>9} {:>9}",
                        run.id,
                        run.status.as_str(),
                        truncate(&run.started_at, 19),
                        run.postings_found,
                        run.companies_found,
                        run.contacts_found,
                        format!("{}/{}", run.units_done, run.units_total)
                    );
                }
            }
        }

        Commands::Status { id } => {
            db.ensure_initialized()?;
            match db.get_run(id)? {
                Some(run) => print_run(&run),
                None => println!("Run #{} not found.", id),
            }
        }

        Commands::List { filter } => {
            db.ensure_initialized()?;
            let postings = db.list_postings(&filter.to_filter())?;
            if postings.is_empty() {
                println!("No postings found.");
            } else {
                println!(
                    "{:<6} {:<10} {:<5} {:<30} {:<20} {:<16} {:<4}",
                    "ID", "POSTED", "MKT", "TITLE", "COMPANY", "SOURCE", "TECH"
                );
                println!("{}", "-".repeat(97));
                for posting in postings {
                    println!(
                        "{:<6} {:<10} {:<5} {:<30} {:<20} {:<16} {:<4}",
                        posting.id,
                        posting.posted_date.format("%Y-%m-%d"),
                        posting.market.label(),
                        truncate(&posting.title, 28),
                        truncate(&posting.company_name, 18),
                        truncate(&posting.source_name, 14),
                        if posting.is_technical { "yes" } else { "no" }
                    );
                }
            }
        }

        Commands::Show { id } => {
            db.ensure_initialized()?;
            match db.get_posting(id)? {
                Some(posting) => {
                    println!("Posting #{}", posting.id);
                    println!("Title: {}", posting.title);
                    println!("Company: {}", posting.company_name);
                    if let Some(url) = &posting.company_url {
                        println!("Company URL: {}", url);
                    }
                    if let Some(size) = posting.company_size {
                        println!("Company size: {} employees", size.label());
                    }
                    println!("Market: {}", posting.market.label());
                    println!("Source: {}", posting.source_name);
                    println!("Link: {}", posting.link);
                    println!(
                        "Posted: {} ({})",
                        posting.posted_date.format("%Y-%m-%d"),
                        posting.posted_date_provenance
                    );
                    if let Some(location) = &posting.location {
                        println!("Location: {}", location);
                    }
                    println!("Job type: {}", posting.job_type);
                    println!(
                        "Category: {} ({:.2})",
                        if posting.is_technical { "Technical" } else { "Non-Technical" },
                        posting.category_confidence
                    );
                    if let Some(salary) = &posting.salary {
                        println!("Salary: {}", salary);
                    }
                    if let Some(company) = db.get_company(posting.company_id)? {
                        if let Some(industry) = &company.industry {
                            println!("Industry: {} ({})", industry, company.provenance);
                        }
                    }

                    let contacts = db.decision_makers_for(posting.company_id)?;
                    if !contacts.is_empty() {
                        println!("\nContacts ({}):", contacts.len());
                        for dm in contacts {
                            let marker = if dm.is_primary { "*" } else { " " };
                            println!("  {} {} - {} [{}]", marker, dm.name, dm.title, dm.provenance);
                            for detail in [&dm.email, &dm.phone, &dm.linkedin].into_iter().flatten() {
                                println!("      {}", detail);
                            }
                        }
                    }

                    if let Some(description) = &posting.description {
                        println!("\n--- Description ---");
                        for line in textwrap::wrap(description, 80) {
                            println!("{}", line);
                        }
                    }
                }
                None => {
                    println!("Posting #{} not found.", id);
                }
            }
        }

        Commands::Export { out, split, filter } => {
            db.ensure_initialized()?;
            let filter = filter.to_filter();
            if split {
                for (path, rows) in export::export_split(&db, &filter, &out)? {
                    println!("Wrote {} rows to {}", rows, path.display());
                }
            } else {
                let rows = export::export_to_path(&db, &filter, &out)?;
                println!("Wrote {} rows to {}", rows, out.display());
            }
        }

        Commands::Categorize { title, description } => {
            let category = categorizer::categorize(&title, description.as_deref());
            println!("{} (confidence {:.2})", category.label(), category.confidence);
        }
    }

    Ok(())
}

fn set_active(db: &Database, settings: &Settings, name: &str, active: bool) -> Result<()> {
    if db.set_source_active(name, active)? {
        println!("{} '{}'.", if active { "Enabled" } else { "Disabled" }, name);
        return Ok(());
    }
    let registry = SourceRegistry::from_settings(settings)?;
    match registry.suggest(name) {
        Some(suggestion) => Err(anyhow!("Unknown source '{}' (did you mean '{}'?)", name, suggestion)),
        None => Err(anyhow!(
            "Unknown source '{}'. Run `jobsweep sources sync` to register the built-in sources.",
            name
        )),
    }
}

fn print_run(run: &RunLog) {
    println!("Run #{}: {}", run.id, run.status);
    println!("  Started:   {}", run.started_at);
    if let Some(finished) = &run.finished_at {
        println!("  Finished:  {}", finished);
    }
    println!("  Units:     {}/{} done", run.units_done, run.units_total);
    if run.units_blocked > 0 || run.units_failed > 0 {
        println!("  Blocked:   {}", run.units_blocked);
        println!("  Failed:    {}", run.units_failed);
    }
    println!("  Postings:  {}", run.postings_found);
    println!("  Companies: {}", run.companies_found);
    println!("  Contacts:  {}", run.contacts_found);
    if let Some(error) = &run.error {
        println!("  Error:     {}", error);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
