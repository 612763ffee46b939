#![forbid(unsafe_code)]

use std::io::{self, IsTerminal, Read};

use clap::{Parser, Subcommand};
use lexmarket_engines::api_client::ApiClient;
use lexmarket_engines::device_vault::DeviceVault;
use lexmarket_engines::realtime::RealtimeConfig;
use lexmarket_engines::realtime_pusher::PusherConnector;
use lexmarket_kernel_contracts::case::{CaseId, FileId, QuoteId};
use lexmarket_kernel_contracts::route::AppRoute;
use lexmarket_kernel_contracts::session::SignupInput;
use lexmarket_os::payment_watch::PaymentWatchConfig;
use lexmarket_os::session::SessionContext;
use lexmarket_tools::case_cli::{
    execute_accept_quote, execute_create_case, execute_file_url, execute_submit_quote,
    load_marketplace_case, render_case, render_cases, render_marketplace,
    render_marketplace_case, render_quotes,
};
use lexmarket_tools::payment_cli::{execute_watch_payment, guard_watch_payment};
use lexmarket_tools::session_cli::{
    execute_login, execute_logout, execute_route, execute_signup, execute_whoami, require_access,
};
use tokio::sync::watch;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Command-line client for the legal services marketplace.
#[derive(Parser, Debug)]
#[command(name = "lexmarket")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sign in; the password is prompted for, or read from stdin when piped
    Login { email: String },

    /// Create an account and sign in
    Signup {
        email: String,
        name: String,
        /// client or lawyer
        #[arg(long, default_value = "client")]
        role: String,
        #[arg(long)]
        jurisdiction: Option<String>,
        #[arg(long)]
        bar_number: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show the signed-in user and their navigation
    Whoami,

    /// List my cases (clients)
    Cases,

    /// Show one of my cases with its quotes and files (clients)
    Case { id: String },

    /// Open a new case (clients)
    CreateCase {
        title: String,
        category: String,
        #[arg(long, default_value = "")]
        description: String,
    },

    /// Accept a quote and print the payment link (clients)
    AcceptQuote { case_id: String, quote_id: String },

    /// Print a download link for a case file
    FileUrl { id: String },

    /// List open marketplace cases (lawyers)
    Marketplace,

    /// Show a marketplace case and my quote on it (lawyers)
    MarketplaceCase { id: String },

    /// Submit a quote, or update mine while the case allows it (lawyers)
    Quote {
        case_id: String,
        #[arg(long)]
        amount: f64,
        #[arg(long)]
        days: u32,
        #[arg(long, default_value = "")]
        note: String,
    },

    /// List my submitted quotes (lawyers)
    Quotes,

    /// Wait for payment confirmation for a processing-screen location
    WatchPayment { location: String },

    /// Resolve a location and show what the route guard decides
    Route { location: String },
}

fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_writer(io::stderr))
        .init();

    match run(cli.command) {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(2);
        }
    }
}

fn run(command: Commands) -> Result<String, String> {
    let api = ApiClient::from_env();
    let vault = DeviceVault::default_local();
    tracing::debug!(
        base_url = %api.config().base_url,
        vault = %vault.vault_path().display(),
        "lexmarket starting"
    );
    let mut ctx = SessionContext::new(Box::new(vault));

    match command {
        Commands::Login { email } => {
            let password = read_password()?;
            execute_login(&mut ctx, &api, &email, &password)
        }
        Commands::Signup {
            email,
            name,
            role,
            jurisdiction,
            bar_number,
        } => {
            let password = read_password()?;
            let input = match role.trim().to_ascii_lowercase().as_str() {
                "client" => SignupInput::client_v1(email, password, name),
                "lawyer" => SignupInput::lawyer_v1(
                    email,
                    password,
                    name,
                    jurisdiction.unwrap_or_default(),
                    bar_number.unwrap_or_default(),
                ),
                other => return Err(format!("unknown role '{other}'. expected: client, lawyer")),
            }
            .map_err(|e| e.to_string())?;
            execute_signup(&mut ctx, &api, &input)
        }
        Commands::Logout => execute_logout(&mut ctx),
        Commands::Whoami => {
            ctx.init(&api);
            Ok(execute_whoami(&ctx))
        }
        Commands::Route { location } => {
            ctx.init(&api);
            Ok(execute_route(&ctx, &location))
        }
        Commands::Cases => {
            ctx.init(&api);
            let token = require_access(&ctx, &AppRoute::ClientDashboard)?;
            let cases = api.get_my_cases(token).map_err(|e| e.to_string())?;
            Ok(render_cases(&cases))
        }
        Commands::Case { id } => {
            ctx.init(&api);
            let case_id = CaseId::new(id).map_err(|e| e.to_string())?;
            let token = require_access(&ctx, &AppRoute::ClientCase(case_id.clone()))?;
            let case = api.get_case(token, &case_id).map_err(|e| e.to_string())?;
            Ok(render_case(&case))
        }
        Commands::CreateCase {
            title,
            category,
            description,
        } => {
            ctx.init(&api);
            let token = require_access(&ctx, &AppRoute::ClientCaseNew)?;
            execute_create_case(&api, token, &title, &category, &description)
        }
        Commands::FileUrl { id } => {
            ctx.init(&api);
            let file_id = FileId::new(id).map_err(|e| e.to_string())?;
            let token = ctx
                .token()
                .ok_or_else(|| "not signed in; run `lexmarket login` first".to_string())?;
            execute_file_url(&api, token, &file_id)
        }
        Commands::AcceptQuote { case_id, quote_id } => {
            ctx.init(&api);
            let case_id = CaseId::new(case_id).map_err(|e| e.to_string())?;
            let quote_id = QuoteId::new(quote_id).map_err(|e| e.to_string())?;
            let token = require_access(&ctx, &AppRoute::ClientCase(case_id.clone()))?;
            let case = api.get_case(token, &case_id).map_err(|e| e.to_string())?;
            execute_accept_quote(&api, token, &case, &quote_id)
        }
        Commands::Marketplace => {
            ctx.init(&api);
            let token = require_access(&ctx, &AppRoute::LawyerMarketplace)?;
            let cases = api.get_marketplace_cases(token).map_err(|e| e.to_string())?;
            Ok(render_marketplace(&cases))
        }
        Commands::MarketplaceCase { id } => {
            ctx.init(&api);
            let case_id = CaseId::new(id).map_err(|e| e.to_string())?;
            let token = require_access(&ctx, &AppRoute::LawyerMarketplaceCase(case_id.clone()))?;
            let view = load_marketplace_case(&api, token, &case_id)?;
            Ok(render_marketplace_case(&view))
        }
        Commands::Quote {
            case_id,
            amount,
            days,
            note,
        } => {
            ctx.init(&api);
            let case_id = CaseId::new(case_id).map_err(|e| e.to_string())?;
            let token = require_access(&ctx, &AppRoute::LawyerMarketplaceCase(case_id.clone()))?;
            execute_submit_quote(&api, token, &case_id, amount, days, &note)
        }
        Commands::Quotes => {
            ctx.init(&api);
            let token = require_access(&ctx, &AppRoute::LawyerMyQuotes)?;
            let quotes = api.get_my_quotes(token).map_err(|e| e.to_string())?;
            Ok(render_quotes(&quotes))
        }
        Commands::WatchPayment { location } => {
            ctx.init(&api);
            guard_watch_payment(&ctx, &location)?;
            watch_payment(&location)
        }
    }
}

fn watch_payment(location: &str) -> Result<String, String> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to start runtime: {e}"))?;
    let realtime = RealtimeConfig::from_env();
    let config = PaymentWatchConfig::from_env();

    runtime.block_on(async {
        let (unmount_tx, unmount_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = unmount_tx.send(true);
            }
        });
        execute_watch_payment(location, realtime.as_ref(), &PusherConnector, config, unmount_rx).await
    })
}

fn read_password() -> Result<String, String> {
    if io::stdin().is_terminal() {
        let value = rpassword::prompt_password("Password: ").map_err(|e| e.to_string())?;
        if value.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(value)
    } else {
        let mut input = String::new();
        io::stdin()
            .read_to_string(&mut input)
            .map_err(|e| e.to_string())?;
        let trimmed = input.trim_end_matches(['\r', '\n']).to_string();
        if trimmed.is_empty() {
            return Err("password must not be empty".to_string());
        }
        Ok(trimmed)
    }
}
