use std::{error::Error, io::Write, sync::Arc, time::Duration};

use clap::{Args, Parser, Subcommand};
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    style::Print,
    terminal,
    terminal::ClearType,
};
use engine::{Engine, PlaidClient, PlaidEnvironment};
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};

#[derive(Parser, Debug)]
#[command(name = "budgee_admin")]
#[command(about = "Admin utilities for Budgee (users, syncs, rules)")]
struct Cli {
    /// Database connection string (also read from `DATABASE_URL`).
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "sqlite:./budgee.db?mode=rwc"
    )]
    database_url: String,

    #[command(flatten)]
    plaid: PlaidArgs,

    #[command(subcommand)]
    command: Command,
}

/// Aggregator credentials, only needed by commands that reach Plaid.
#[derive(Args, Debug)]
struct PlaidArgs {
    #[arg(long, env = "PLAID_ENV", default_value = "sandbox", value_parser = parse_environment)]
    plaid_env: PlaidEnvironment,
    #[arg(long, env = "PLAID_CLIENT_ID", default_value = "")]
    plaid_client_id: String,
    #[arg(long, env = "PLAID_SECRET", default_value = "", hide_env_values = true)]
    plaid_secret: String,
    #[arg(long, default_value_t = 30)]
    plaid_timeout_secs: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    User(User),
    Items(Items),
    Sync(Sync),
    Rules(Rules),
    /// Re-derives expense/income flags of every transaction.
    Recategorize,
}

#[derive(Args, Debug)]
struct User {
    #[command(subcommand)]
    command: UserCommand,
}

#[derive(Subcommand, Debug)]
enum UserCommand {
    Create(UserCreateArgs),
}

#[derive(Args, Debug)]
struct UserCreateArgs {
    #[arg(long)]
    username: String,
}

#[derive(Args, Debug)]
struct Items {
    #[command(subcommand)]
    command: ItemsCommand,
}

#[derive(Subcommand, Debug)]
enum ItemsCommand {
    /// Lists every linked item.
    List,
    /// Pulls fresh balances of one item.
    RefreshBalances(ItemArgs),
}

#[derive(Args, Debug)]
struct Sync {
    #[command(subcommand)]
    command: SyncCommand,
}

#[derive(Subcommand, Debug)]
enum SyncCommand {
    Item(ItemArgs),
    All,
}

#[derive(Args, Debug)]
struct ItemArgs {
    #[arg(long)]
    item_id: i32,
}

#[derive(Args, Debug)]
struct Rules {
    #[command(subcommand)]
    command: RulesCommand,
}

#[derive(Subcommand, Debug)]
enum RulesCommand {
    Apply(RulesApplyArgs),
}

#[derive(Args, Debug)]
struct RulesApplyArgs {
    #[arg(long)]
    username: String,
}

fn parse_environment(raw: &str) -> Result<PlaidEnvironment, String> {
    PlaidEnvironment::try_from(raw)
}

struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> Result<Self, Box<dyn Error + Send + std::marker::Sync>> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

fn prompt_password(prompt: &str) -> Result<String, Box<dyn Error + Send + std::marker::Sync>> {
    let _raw = RawModeGuard::enter()?;

    let mut out = std::io::stderr();
    execute!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(ClearType::CurrentLine),
        Print(prompt)
    )?;
    out.flush()?;

    let mut buf = String::new();
    loop {
        let Event::Key(KeyEvent {
            code, modifiers, ..
        }) = event::read()?
        else {
            continue;
        };

        match code {
            KeyCode::Enter => {
                execute!(out, Print("\r\n"))?;
                out.flush()?;
                break;
            }
            KeyCode::Backspace => {
                if buf.pop().is_some() {
                    execute!(out, cursor::MoveLeft(1), Print(" "), cursor::MoveLeft(1))?;
                    out.flush()?;
                }
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                execute!(out, Print("\r\n"))?;
                out.flush()?;
                return Err("interrupted".into());
            }
            KeyCode::Char(ch) if !modifiers.contains(KeyModifiers::CONTROL) => {
                buf.push(ch);
                execute!(out, Print("*"))?;
                out.flush()?;
            }
            _ => {}
        }
    }

    Ok(buf)
}

fn prompt_password_twice() -> Result<String, Box<dyn Error + Send + std::marker::Sync>> {
    let mut out = std::io::stderr();
    for _ in 0..3 {
        let p1 = prompt_password("Password: ")?;
        if p1.is_empty() {
            execute!(
                out,
                cursor::MoveToColumn(0),
                terminal::Clear(ClearType::CurrentLine),
                Print("Password must not be empty.\r\n")
            )?;
            continue;
        }

        let p2 = prompt_password("Confirm password: ")?;
        if p1 == p2 {
            return Ok(p1);
        }

        execute!(
            out,
            cursor::MoveToColumn(0),
            terminal::Clear(ClearType::CurrentLine),
            Print("Passwords do not match. Try again.\r\n")
        )?;
    }

    Err("too many attempts".into())
}

async fn connect_db(
    database_url: &str,
) -> Result<DatabaseConnection, Box<dyn Error + Send + std::marker::Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

async fn build_engine(
    db: DatabaseConnection,
    plaid: &PlaidArgs,
) -> Result<Engine, Box<dyn Error + Send + std::marker::Sync>> {
    let client = PlaidClient::new(
        plaid.plaid_env,
        plaid.plaid_client_id.clone(),
        plaid.plaid_secret.clone(),
        Duration::from_secs(plaid.plaid_timeout_secs),
    )?;
    Ok(Engine::builder()
        .database(db)
        .aggregator(Arc::new(client))
        .build()
        .await?)
}

fn require_credentials(plaid: &PlaidArgs) {
    if plaid.plaid_client_id.is_empty() || plaid.plaid_secret.is_empty() {
        eprintln!("PLAID_CLIENT_ID and PLAID_SECRET are required for this command");
        std::process::exit(2);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + std::marker::Sync>> {
    let cli = Cli::parse();

    let db = connect_db(&cli.database_url).await?;
    let engine = build_engine(db, &cli.plaid).await?;

    match cli.command {
        Command::User(User {
            command: UserCommand::Create(args),
        }) => {
            if engine.user_by_username(&args.username).await?.is_some() {
                eprintln!("user already exists: {}", args.username);
                std::process::exit(1);
            }

            let password = prompt_password_twice()?;
            let user = engine.create_user(&args.username, &password).await?;
            println!("created user: {} ({})", user.username, user.id);
        }
        Command::Items(Items {
            command: ItemsCommand::List,
        }) => {
            for item in engine.list_all_items().await? {
                println!(
                    "{}\tuser={}\t{}\t{}\tsynced={}",
                    item.id,
                    item.user_id,
                    item.external_item_id,
                    item.institution_name.as_deref().unwrap_or("-"),
                    item.has_cursor
                );
            }
        }
        Command::Items(Items {
            command: ItemsCommand::RefreshBalances(args),
        }) => {
            require_credentials(&cli.plaid);
            let changed = engine.refresh_balances(args.item_id).await?;
            println!("updated balances of {changed} account(s)");
        }
        Command::Sync(Sync {
            command: SyncCommand::Item(args),
        }) => {
            require_credentials(&cli.plaid);
            let counts = engine.sync_item(args.item_id).await?;
            println!(
                "item {}: added={} modified={} removed={}",
                args.item_id, counts.added, counts.modified, counts.removed
            );
        }
        Command::Sync(Sync {
            command: SyncCommand::All,
        }) => {
            require_credentials(&cli.plaid);
            let mut failed = 0;
            for outcome in engine.sync_all().await? {
                match outcome.result {
                    Ok(counts) => println!(
                        "item {}: added={} modified={} removed={}",
                        outcome.item_id, counts.added, counts.modified, counts.removed
                    ),
                    Err(err) => {
                        failed += 1;
                        eprintln!("item {}: {err}", outcome.item_id);
                    }
                }
            }
            if failed > 0 {
                std::process::exit(1);
            }
        }
        Command::Rules(Rules {
            command: RulesCommand::Apply(args),
        }) => {
            let Some(user) = engine.user_by_username(&args.username).await? else {
                eprintln!("user not found: {}", args.username);
                std::process::exit(1);
            };

            let report = engine.apply_rules(user.id).await?;
            for change in &report.changes {
                println!(
                    "transaction {}: {} -> {} (rule {})",
                    change.transaction_id,
                    change.from.as_deref().unwrap_or("-"),
                    change.to,
                    change.rule_id
                );
            }
            for rule_id in &report.skipped_rules {
                eprintln!("skipped malformed rule {rule_id}");
            }
            println!(
                "evaluated {} transaction(s), changed {}",
                report.evaluated,
                report.changes.len()
            );
        }
        Command::Recategorize => {
            let changed = engine.recategorize_all().await?;
            println!("reclassified {changed} transaction(s)");
        }
    }

    Ok(())
}
