//! Token Sequencer - command line driver for the taxed / soulbound token
//! workflow
//!
//! Every action prints its result object as JSON on stdout; the activity
//! log is printed on stderr when the command finishes.
//!
//! ## Modes
//!
//! - **RPC** (default): talks to the configured endpoint and signs with the
//!   configured keypair
//! - **Simulation** (`--simulate`): runs against an in-memory ledger that
//!   lives for the duration of the command

// Compiler warning configuration
#![deny(unused_imports)]
#![deny(unused_mut)]
#![deny(unused_variables)]
#![warn(dead_code)]
#![warn(unused_must_use)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use solana_sdk::{pubkey::Pubkey, signature::Keypair, signer::Signer};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taxed_token_sequencer::config::Config;
use taxed_token_sequencer::rpc_manager::{LedgerTransport, RpcTransport};
use taxed_token_sequencer::simulation::LedgerSimulator;
use taxed_token_sequencer::tx_builder::codec::{parse_address, parse_amount};
use taxed_token_sequencer::types::{ActionDetail, ActionReport, CreateMintParams};
use taxed_token_sequencer::wallet::{KeypairAgent, WalletManager};
use taxed_token_sequencer::{ErrorKind, Sequencer, WorkflowError};

type ActionResult = Result<ActionDetail, WorkflowError>;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Run against an in-memory ledger instead of the RPC endpoint
    #[arg(long, global = true)]
    simulate: bool,

    /// Adopt an existing mint before running the command
    #[arg(long, global = true)]
    mint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a mint that withholds a fee on every transfer
    CreateTaxed {
        #[arg(long, default_value_t = 6)]
        decimals: u8,
        #[arg(long, default_value_t = 100)]
        fee_bps: u16,
        #[arg(long, default_value = "1000000")]
        max_fee: String,
        /// Fee-withdraw authority (defaults to the wallet)
        #[arg(long)]
        withdraw_authority: Option<String>,
    },
    /// Create a non-transferable mint
    CreateSoulbound {
        #[arg(long, default_value_t = 6)]
        decimals: u8,
    },
    /// Create the associated account of an owner (defaults to the wallet)
    EnsureAccount {
        #[arg(long)]
        owner: Option<String>,
    },
    /// Mint base units to the wallet's associated account
    Mint { amount: String },
    /// Transfer base units from the wallet to a recipient
    Transfer { recipient: String, amount: String },
    /// Show balance and withheld amount of a token account
    Inspect { address: String },
    /// Harvest and withdraw withheld fees (destination defaults to the wallet)
    Withdraw {
        #[arg(long)]
        destination: Option<String>,
    },
    /// Run a complete workflow end to end
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum ScenarioKind {
    /// Create taxed mint, fund, transfer, inspect, withdraw fees
    Taxed,
    /// Create soulbound mint, fund, attempt a transfer that must fail
    Soulbound,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let (config, found) = load_config(&args.config)?;

    // Initialize logging
    init_logging(args.verbose, config.log.json)?;
    if !found {
        warn!("Config file '{}' not found, using defaults", args.config);
    }
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let (sequencer, payer) = build_sequencer(&config, args.simulate)?;

    let mut results = Vec::new();
    if let Some(mint) = &args.mint {
        let selected = match parse_address(mint) {
            Ok(address) => sequencer.select_mint(address).await,
            Err(e) => Err(e),
        };
        results.push(selected);
    }

    let expectation_met = if results.iter().all(|r| r.is_ok()) {
        let (outcomes, met) = run_command(&sequencer, payer, args.command).await;
        results.extend(outcomes);
        met
    } else {
        false
    };

    for result in &results {
        let report = ActionReport::from(result);
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    for entry in sequencer.log().snapshot() {
        eprintln!(
            "{} {:>5} {}",
            entry.timestamp.format("%H:%M:%S%.3f"),
            format!("{:?}", entry.level).to_uppercase(),
            entry.message
        );
    }

    Ok(if expectation_met {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Initialize logging subsystem
fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let env_filter = if verbose {
        "taxed_token_sequencer=debug,token_sequencer=debug,info"
    } else {
        "taxed_token_sequencer=info,token_sequencer=info,warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
        }))
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<(Config, bool)> {
    if std::path::Path::new(path).exists() {
        let config = Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))?;
        Ok((config, true))
    } else {
        dotenvy::dotenv().ok();
        let mut config = Config::default();
        config.apply_env();
        config.validate()?;
        Ok((config, false))
    }
}

fn expand_home(path: &str) -> String {
    match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home, rest),
        _ => path.to_string(),
    }
}

/// Wire transport, wallet and agent into a connected sequencer
fn build_sequencer(config: &Config, simulate: bool) -> Result<(Sequencer, Pubkey)> {
    let program_ids = config.program_ids()?;
    let keypair_path = expand_home(&config.wallet.keypair_path);

    let transport: Arc<dyn LedgerTransport> = if simulate {
        info!("Operating mode: simulation (in-memory ledger)");
        Arc::new(LedgerSimulator::new(program_ids))
    } else {
        let rpc = RpcTransport::new(
            config.rpc.url.clone(),
            config.rpc_timeout(),
            config.commitment()?,
            config.poll_interval(),
            config.confirmation.max_attempts,
        );
        info!("Operating mode: rpc ({})", rpc.url());
        Arc::new(rpc)
    };

    let wallet = if simulate && !std::path::Path::new(&keypair_path).exists() {
        warn!("Keypair file '{}' not found, using an ephemeral keypair", keypair_path);
        WalletManager::from_keypair(Keypair::new())
    } else {
        info!("Initializing wallet from: {}", keypair_path);
        WalletManager::from_file(&keypair_path).context("Failed to load wallet")?
    };
    let payer = wallet.pubkey();
    info!("Wallet address: {}", payer);

    let sequencer = Sequencer::new(transport.clone(), program_ids, config.log.capacity);
    sequencer.connect(Arc::new(KeypairAgent::new(wallet, transport)));
    Ok((sequencer, payer))
}

fn optional_address(input: Option<String>, fallback: Pubkey) -> Result<Pubkey, WorkflowError> {
    input.map_or(Ok(fallback), |s| parse_address(&s))
}

/// Run one subcommand; returns its results and whether they match what the
/// command expects
async fn run_command(
    sequencer: &Sequencer,
    payer: Pubkey,
    command: Command,
) -> (Vec<ActionResult>, bool) {
    match command {
        Command::Scenario { kind } => run_scenario(sequencer, payer, kind).await,
        other => {
            let results = match run_action(sequencer, payer, other).await {
                Ok(results) => results,
                Err(e) => vec![Err(e)],
            };
            let ok = results.iter().all(|r| r.is_ok());
            (results, ok)
        }
    }
}

/// Parse inputs, then run the action (preceded by the wallet's account
/// when the action needs it)
async fn run_action(
    sequencer: &Sequencer,
    payer: Pubkey,
    command: Command,
) -> Result<Vec<ActionResult>, WorkflowError> {
    let results = match command {
        Command::CreateTaxed {
            decimals,
            fee_bps,
            max_fee,
            withdraw_authority,
        } => {
            let mut params = CreateMintParams::taxed(decimals, fee_bps, parse_amount(&max_fee)?);
            if let Some(authority) = withdraw_authority {
                params = params.with_fee_withdraw_authority(parse_address(&authority)?);
            }
            vec![sequencer.create_mint(params).await]
        }
        Command::CreateSoulbound { decimals } => {
            vec![sequencer.create_mint(CreateMintParams::soulbound(decimals)).await]
        }
        Command::EnsureAccount { owner } => {
            let owner = optional_address(owner, payer)?;
            vec![sequencer.ensure_associated_account(owner).await]
        }
        Command::Mint { amount } => {
            let amount = parse_amount(&amount)?;
            vec![
                sequencer.ensure_associated_account(payer).await,
                sequencer.mint_tokens(amount).await,
            ]
        }
        Command::Transfer { recipient, amount } => {
            let recipient = parse_address(&recipient)?;
            let amount = parse_amount(&amount)?;
            vec![
                sequencer.ensure_associated_account(payer).await,
                sequencer.transfer_with_fee(recipient, amount).await,
            ]
        }
        Command::Inspect { address } => {
            vec![sequencer.inspect_account(parse_address(&address)?).await]
        }
        Command::Withdraw { destination } => {
            let destination = optional_address(destination, payer)?;
            vec![
                sequencer.ensure_associated_account(destination).await,
                sequencer.withdraw_withheld_fees(destination).await,
            ]
        }
        Command::Scenario { kind } => run_scenario(sequencer, payer, kind).await.0,
    };
    Ok(results)
}

async fn run_scenario(
    sequencer: &Sequencer,
    payer: Pubkey,
    kind: ScenarioKind,
) -> (Vec<ActionResult>, bool) {
    const DECIMALS: u8 = 6;
    const MINTED: u64 = 1_000_000;
    const TRANSFERRED: u64 = 100_000;

    let recipient = Keypair::new().pubkey();
    let params = match kind {
        ScenarioKind::Taxed => CreateMintParams::taxed(DECIMALS, 100, 1_000_000),
        ScenarioKind::Soulbound => CreateMintParams::soulbound(DECIMALS),
    };

    let mut results = vec![
        sequencer.create_mint(params).await,
        sequencer.ensure_associated_account(payer).await,
        sequencer.mint_tokens(MINTED).await,
    ];
    let transfer = sequencer.transfer_with_fee(recipient, TRANSFERRED).await;

    let met = match kind {
        ScenarioKind::Taxed => {
            let verified = matches!(
                transfer,
                Ok(ActionDetail::Transferred {
                    fee_verified: true,
                    ..
                })
            );
            results.push(transfer);
            if let Ok(address) = sequencer.associated_address(&recipient) {
                results.push(sequencer.inspect_account(address).await);
            }
            results.push(sequencer.withdraw_withheld_fees(payer).await);
            verified && results.iter().all(|r| r.is_ok())
        }
        ScenarioKind::Soulbound => {
            let rejected = matches!(&transfer, Err(e) if e.kind() == ErrorKind::SubmissionRejected);
            results.push(transfer);
            let unchanged = match sequencer.associated_address(&payer) {
                Ok(address) => {
                    let inspected = sequencer.inspect_account(address).await;
                    let unchanged = matches!(
                        &inspected,
                        Ok(ActionDetail::Inspected { state, .. }) if state.amount == MINTED
                    );
                    results.push(inspected);
                    unchanged
                }
                Err(_) => false,
            };
            rejected && unchanged && results[..3].iter().all(|r| r.is_ok())
        }
    };

    (results, met)
}
