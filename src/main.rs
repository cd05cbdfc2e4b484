mod db;
mod fetch;
mod monitor;
mod notifier;
mod parser;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand};

use fetch::{FetchOptions, HttpSource, PageSource};
use monitor::Poller;
use notifier::{LogNotifier, Notifier, SmtpNotifier};
use parser::{html, sections, Classifier};
use settings::Settings;

#[derive(Parser)]
#[command(name = "apson", about = "Facilities service-interruption monitor")]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, env = "CONFIG_PATH", default_value = settings::DEFAULT_CONFIG_PATH, global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the interruptions page and notify about new relevant notices
    Run {
        /// Run a single cycle and exit
        #[arg(long)]
        once: bool,
    },
    /// Fetch once and list relevant notices (state is not touched)
    Check {
        /// Print as JSON
        #[arg(long)]
        json: bool,
        /// Show a progress bar while fetching notices
        #[arg(long)]
        progress: bool,
    },
    /// Fetch a single notice page and explain the relevance decision
    Classify {
        /// Absolute URL of the notice page
        url: String,
    },
    /// List notices that have already been notified
    Notified {
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },
    /// Drop a link from the notified state so it is reported again
    Forget {
        /// Link exactly as stored
        link: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    let result = match cli.command {
        Commands::Run { once } => {
            let conn = db::connect(&settings.state_path)?;
            db::init_schema(&conn)?;
            let poller = Poller::new(
                http_source(&settings)?,
                classifier(&settings),
                settings.source_url.clone(),
                fetch_options(&settings, false),
            );
            let notifier = build_notifier(&settings)?;

            println!("APSON service starting...");
            println!("Monitoring buildings: {}", settings.buildings.join(", "));
            if once {
                let s = poller.poll_once(&conn, &notifier).await?;
                println!(
                    "{} notices: {} relevant, {} skipped, {} new",
                    s.scanned, s.relevant, s.skipped, s.new
                );
                Ok(())
            } else {
                monitor::run_forever(&poller, &conn, &notifier, settings.poll_interval()).await
            }
        }
        Commands::Check { json, progress } => {
            let poller = Poller::new(
                http_source(&settings)?,
                classifier(&settings),
                settings.source_url.clone(),
                fetch_options(&settings, progress),
            );
            let found = poller.fetch_announcements().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&found)?);
                return Ok(());
            }
            if found.is_empty() {
                println!("No relevant announcements.");
                return Ok(());
            }
            println!("{:>3} | {:<60} | {}", "#", "Title", "Link");
            println!("{}", "-".repeat(100));
            for (i, a) in found.iter().enumerate() {
                println!("{:>3} | {:<60} | {}", i + 1, truncate(&a.title, 60), a.link);
            }
            println!("\n{} relevant announcements", found.len());
            Ok(())
        }
        Commands::Classify { url } => {
            let source = http_source(&settings)?;
            let page = source.get(&url).await?;
            if page.status != 200 {
                anyhow::bail!("{} returned status {}", url, page.status);
            }
            let classifier = classifier(&settings);
            let title = html::notice_title(&page.body);
            let kw = classifier.keywords();
            let bld = classifier.buildings();

            println!("Title:     {}", title);
            println!(
                "           keyword: {}  building: {}",
                yes_no(kw.has_keyword(&title)),
                yes_no(bld.matches(&title))
            );
            for (kind, text) in sections::extract_sections(&page.body) {
                println!("{:<10} {}", format!("{}:", kind), text.trim());
                println!(
                    "           keyword: {}  building: {}",
                    yes_no(kw.has_keyword(&text)),
                    yes_no(bld.matches(&text))
                );
            }
            match classifier.classify(&title, &page.body) {
                Some(reason) => println!("Relevant ({}) for {}", reason, bld.targets().join(", ")),
                None => println!("Not relevant for {}", bld.targets().join(", ")),
            }
            Ok(())
        }
        Commands::Notified { limit } => {
            let conn = db::connect(&settings.state_path)?;
            db::init_schema(&conn)?;
            let rows = db::fetch_notified(&conn, Some(limit))?;
            if rows.is_empty() {
                println!("Nothing notified yet.");
                return Ok(());
            }
            println!("{:<19} | {:<48} | {}", "Notified at", "Title", "Link");
            println!("{}", "-".repeat(100));
            for r in &rows {
                println!("{:<19} | {:<48} | {}", r.notified_at, truncate(&r.title, 48), r.link);
            }
            Ok(())
        }
        Commands::Forget { link } => {
            let conn = db::connect(&settings.state_path)?;
            db::init_schema(&conn)?;
            if db::forget(&conn, &link)? {
                println!("Forgot {}", link);
            } else {
                println!("{} was not in the notified state", link);
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn http_source(settings: &Settings) -> anyhow::Result<HttpSource> {
    HttpSource::new(&settings.user_agent, settings.request_timeout())
        .context("Failed to build HTTP client")
}

/// SMTP when an `email` section is configured, otherwise log only.
fn build_notifier(settings: &Settings) -> anyhow::Result<Arc<dyn Notifier>> {
    match &settings.email {
        Some(email) => {
            let smtp = SmtpNotifier::new(email, settings.source_url.clone())
                .context("Invalid email settings")?;
            println!(
                "Email notifications to: {} via {}:{}",
                email.recipients.join(", "),
                email.smtp_server,
                email.smtp_port
            );
            Ok(Arc::new(smtp))
        }
        None => {
            println!("No email section configured; notices are only logged");
            Ok(Arc::new(LogNotifier::new(settings.source_url.clone())))
        }
    }
}

fn classifier(settings: &Settings) -> Classifier {
    Classifier::for_buildings(&settings.buildings)
}

fn fetch_options(settings: &Settings, progress: bool) -> FetchOptions {
    FetchOptions {
        concurrency: settings.max_concurrent_fetches,
        progress,
    }
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
