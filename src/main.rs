use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use userworks_store::db::{self, DbState};
use userworks_store::{Settings, StoreError, StoreResult};

/// Maintenance tool for the userworks database
#[derive(Parser, Debug)]
#[command(name = "userworks", version, about)]
struct Cli {
    /// Database file, overrides USERWORKS_DB_PATH
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database if needed and apply pending migrations
    Init,
    /// Delete the database file and recreate an empty schema
    Reset,
    /// Print the schema DDL
    Schema,
    /// Print the applied migration version
    Version,
    /// Run a single SQL statement and print the result as JSON
    Sql {
        statement: String,
        /// Positional parameters as a JSON array, e.g. '["ada", 3]'
        #[arg(long)]
        params: Option<String>,
    },
}

fn parse_params(raw: Option<&str>) -> StoreResult<Option<Vec<JsonValue>>> {
    match raw {
        None => Ok(None),
        Some(raw) => match serde_json::from_str::<JsonValue>(raw)? {
            JsonValue::Array(values) => Ok(Some(values)),
            other => Err(StoreError::invalid_input(format!(
                "--params must be a JSON array, got {}",
                other
            ))),
        },
    }
}

fn run(cli: Cli) -> StoreResult<()> {
    let dotenv_file = Settings::load_dotenv();
    let mut settings = Settings::from_env()?;
    if let Some(path) = cli.db {
        settings = settings.with_db_path(path);
    }

    env_logger::Builder::new()
        .parse_filters(&settings.log_level)
        .init();

    match dotenv_file {
        Some(path) => log::debug!("[settings] Loaded {:?}", path),
        None => log::debug!("[settings] No .env file loaded"),
    }

    let open = || -> StoreResult<DbState> {
        let state = DbState::new(db::initialize_database(&settings)?);
        log::info!("[setup] Database ready at {:?}", settings.db_path);
        Ok(state)
    };

    match cli.command {
        Command::Schema => {
            println!("{}", db::schema_sql());
        }
        Command::Init => {
            open()?;
            println!("Database initialized at {}", settings.db_path.display());
        }
        Command::Reset => {
            db::reset_database(&open()?, &settings)?;
            println!("Database reset at {}", settings.db_path.display());
        }
        Command::Version => {
            println!("{}", db::schema_version(&open()?)?);
        }
        Command::Sql { statement, params } => {
            let params = parse_params(params.as_deref())?;
            let result = db::execute_sql(&open()?, &statement, params)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
    }

    Ok(())
}

/// 2 when the database rejected the write, 1 for anything else.
fn exit_code(err: &StoreError) -> i32 {
    if err.is_constraint_violation() {
        2
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("[userworks] {}", e);
        std::process::exit(exit_code(&e));
    }
}
