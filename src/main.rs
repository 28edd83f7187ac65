use edu_query::config::AppConfig;
use edu_query::dataset::DatasetGenerator;
use edu_query::db::{Database, QueryResult};
use edu_query::query_templates::QUICK_QUERIES;
use edu_query::security::{build_filter_clause, FilterStrategy, ScopeFilter, UserDirectory};
use edu_query::{QueryAssistant, QueryOutcome};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edu-query")]
#[command(about = "Scoped natural-language queries over school data")]
#[command(version)]
struct Args {
    /// Directory holding the dataset CSV files (or set EDU_DATA_DIR)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// SQLite database file (or set EDU_DATABASE_PATH)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the synthetic CSV dataset
    Generate {
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Reference date (YYYY-MM-DD, default: today)
        #[arg(long)]
        today: Option<String>,
    },
    /// Load the CSV dataset into the SQLite database
    Load,
    /// List users and their roles
    Users,
    /// Show the access scope of a user
    Scope { username: String },
    /// Print the SQL a user would actually run, without executing it
    Inject {
        username: String,
        sql: String,

        /// textual or ast (default: EDU_FILTER_STRATEGY or textual)
        #[arg(long)]
        strategy: Option<FilterStrategy>,
    },
    /// Ask a question in natural language
    Ask {
        username: String,
        question: String,

        /// OpenAI API key (or set OPENAI_API_KEY env var)
        #[arg(long)]
        api_key: Option<String>,

        /// Print the result table as CSV instead of a text table
        #[arg(long)]
        csv: bool,
    },
    /// Run a quick query by name, or list them when no name is given
    Quick {
        username: String,
        name: Option<String>,

        /// Print the result table as CSV instead of a text table
        #[arg(long)]
        csv: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = AppConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(path) = args.database {
        config.database_path = path;
    }

    match args.command {
        Commands::Generate { seed, today } => {
            let today = match today {
                Some(raw) => NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .with_context(|| format!("invalid --today '{}'", raw))?,
                None => chrono::Local::now().date_naive(),
            };
            let dataset = DatasetGenerator::new(seed).generate(today);
            for path in dataset.write_csv(&config.data_dir)? {
                println!("wrote {}", path.display());
            }
        }
        Commands::Load => {
            let mut db = Database::open(&config.database_path)?;
            for load in db.load_csv_dir(&config.data_dir)? {
                println!("{:<12} {:>6} rows  {:>2} columns", load.table, load.rows, load.columns);
            }
            info!("Database ready at {}", config.database_path.display());
        }
        Commands::Users => {
            let users = UserDirectory::from_csv_path(config.admin_users_path())?;
            for user in users.list() {
                println!(
                    "{:<22} {:<18} {:<24} grades={} sections={} regions={}",
                    user.username,
                    user.role,
                    user.full_name,
                    user.assigned_grades,
                    user.assigned_sections,
                    user.assigned_regions
                );
            }
        }
        Commands::Scope { username } => {
            let users = UserDirectory::from_csv_path(config.admin_users_path())?;
            let scope = users.resolve(&username)?;
            match build_filter_clause(&scope, None) {
                Some(filter) => println!("{}: {}", username, filter),
                None => println!("{}: unrestricted", username),
            }
        }
        Commands::Inject { username, sql, strategy } => {
            let users = UserDirectory::from_csv_path(config.admin_users_path())?;
            let scope = users.resolve(&username)?;
            let filter = ScopeFilter::new(
                strategy.unwrap_or(config.filter_strategy),
                config.qualification.clone(),
            );
            println!("{}", filter.apply(&sql, &scope)?);
        }
        Commands::Ask { username, question, api_key, csv } => {
            if api_key.is_some() {
                config.openai_api_key = api_key;
            }
            let assistant = QueryAssistant::from_config(&config)?;
            let outcome = assistant.ask(&question, &username).await?;
            print_outcome(&outcome, csv)?;
        }
        Commands::Quick { username, name, csv } => match name {
            Some(name) => {
                let assistant = QueryAssistant::from_config(&config)?;
                let outcome = assistant.run_quick_query(&name, &username)?;
                print_outcome(&outcome, csv)?;
            }
            None => {
                for query in QUICK_QUERIES {
                    println!("{:<24} {}", query.name, query.title);
                }
            }
        },
    }

    Ok(())
}

/// With `csv`, only the result table is printed.
fn print_outcome(outcome: &QueryOutcome, csv: bool) -> Result<()> {
    if csv {
        print!("{}", outcome.result.to_csv()?);
        return Ok(());
    }
    println!("User: {} ({})", outcome.user, outcome.role);
    println!("Question: {}", outcome.question);
    println!("SQL: {}", outcome.secured_sql);
    println!();
    print_table(&outcome.result, 50);
    Ok(())
}

fn print_table(result: &QueryResult, max_rows: usize) {
    let cell = |v: &serde_json::Value| match v {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    };

    let rendered: Vec<Vec<String>> = result
        .rows
        .iter()
        .take(max_rows)
        .map(|row| row.iter().map(cell).collect())
        .collect();

    let widths: Vec<usize> = result
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            rendered
                .iter()
                .filter_map(|row| row.get(i).map(String::len))
                .chain(std::iter::once(name.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = w))
            .collect::<Vec<_>>()
            .join(" | ")
    };

    println!("{}", line(&result.columns[..]));
    println!("{}", widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("-+-"));
    for row in &rendered {
        println!("{}", line(&row[..]));
    }
    if result.row_count() > max_rows {
        println!("... {} more rows", result.row_count() - max_rows);
    }
    println!("({} rows)", result.row_count());
}
