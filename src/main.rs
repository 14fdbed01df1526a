use analytics_bot::agent::Agent;
use analytics_bot::config::Settings;
use analytics_bot::db::Database;
use analytics_bot::format::render::Renderer;
use analytics_bot::llm::LlmClient;
use analytics_bot::row::rows_from_json;
use analytics_bot::sql_guard::{guard_sql, strip_leading_comments};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "analytics-bot")]
#[command(about = "Sales analytics assistant: guarded SQL and Telegram-ready HTML reports")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a query and print it with the bonus-client filter applied
    Guard {
        sql: String,
    },
    /// Render a JSON array of row objects as a chat message
    Render {
        rows: PathBuf,

        #[arg(short, long)]
        title: Option<String>,
    },
    /// Guard, execute against DATABASE_URL and render the result
    Sql {
        sql: String,

        #[arg(short, long)]
        title: Option<String>,
    },
    /// Run the full assistant pipeline for one chat message
    Ask {
        chat_id: i64,

        question: String,

        /// Print the whole reply as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let settings = Settings::from_env()?;

    match args.command {
        Commands::Guard { sql } => {
            let guarded = guard_sql(strip_leading_comments(&sql))?;
            println!("{}", guarded);
            Ok(())
        }
        Commands::Render { rows, title } => render_file(&settings, rows, bold(title)),
        Commands::Sql { sql, title } => run_sql(&settings, &sql, bold(title)).await,
        Commands::Ask {
            chat_id,
            question,
            json,
        } => ask(&settings, chat_id, &question, json).await,
    }
}

/// Titles given on the command line are plain text; the renderer expects `<b>…</b>`.
fn bold(title: Option<String>) -> Option<String> {
    title.map(|t| {
        if t.trim_start().starts_with("<b>") {
            t
        } else {
            format!("<b>{}</b>", t.trim())
        }
    })
}

fn render_file(settings: &Settings, path: PathBuf, title: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&raw)?;
    let rows = rows_from_json(&json);
    info!("Rendering {} rows from {}", rows.len(), path.display());

    let renderer = Renderer::new(settings.char_budget);
    println!("{}", renderer.render(&rows, title.as_deref()));
    Ok(())
}

async fn run_sql(settings: &Settings, sql: &str, title: Option<String>) -> Result<()> {
    let db = Database::connect(settings).await?;
    let (guarded, rows) = db.execute_guarded(sql).await?;
    info!("Executed: {}", guarded);

    let renderer = Renderer::new(settings.char_budget);
    println!("{}", renderer.render(&rows, title.as_deref()));
    Ok(())
}

async fn ask(settings: &Settings, chat_id: i64, question: &str, json: bool) -> Result<()> {
    let db = Database::connect(settings).await?;
    if !db.is_authorized_chat(chat_id).await {
        println!("❌ У вас нет доступа к этому боту");
        return Ok(());
    }

    let llm = LlmClient::from_settings(settings)?;
    let agent = Agent::new(Arc::new(llm), Arc::new(db.clone()), settings);
    let result = agent.answer(chat_id, question).await;
    db.log_interaction(chat_id, None, None, question, &result.output, &settings.bot_id)
        .await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.output);
        if result.send_excel {
            let count = result.table_data.as_ref().map_or(0, Vec::len);
            println!("\n[excel: {} rows]", count);
        }
    }
    Ok(())
}
