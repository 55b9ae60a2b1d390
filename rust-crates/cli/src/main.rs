use chain_sync::{
    orchestrator::{
        Operation,
        PurchaseRequest,
    },
    units::parse_units,
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
    ValueEnum,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use deployments::{
    DEPLOYMENTS_ROOT,
    NetworkEnv,
    NetworkStore,
    resolve_profile,
};
use game_abi::{
    Address,
    GameId,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod client;
mod render;

use crate::client::{
    Client,
    Writer,
};

#[derive(Parser, Debug)]
#[command(
    name = "lottery-cli",
    about = "Follow the elimination game and send buys, votes and admin actions",
    version,
    group(
        ArgGroup::new("network")
            .args(["testnet", "mainnet", "local"])
            .required(true)
    )
)]
struct Args {
    /// Use Arbitrum Sepolia
    #[arg(long)]
    testnet: bool,

    /// Use Arbitrum One
    #[arg(long)]
    mainnet: bool,

    /// Use a local development node
    #[arg(long)]
    local: bool,

    /// Override the node RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// JSON-RPC endpoint that signs for the account (defaults to the node RPC)
    #[arg(long)]
    wallet_rpc: Option<String>,

    /// Directory holding per-network profile files
    #[arg(long, default_value = DEPLOYMENTS_ROOT)]
    config_dir: String,

    /// Also write logs to daily files in this directory
    #[arg(long)]
    log_dir: Option<String>,

    /// Account whose position `status` and `watch` show
    #[arg(long)]
    account: Option<Address>,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn network(&self) -> NetworkEnv {
        if self.mainnet {
            NetworkEnv::Mainnet
        } else if self.local {
            NetworkEnv::Local
        } else {
            NetworkEnv::Testnet
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current game once
    Status,
    /// Follow the current game block by block until interrupted
    Watch,
    /// Buy shares in the current game, approving the token spend first if needed
    Buy {
        #[arg(long)]
        shares: u64,
        /// Where prizes are paid (defaults to the buying account)
        #[arg(long)]
        prize_address: Option<Address>,
    },
    /// Vote in the current elimination round
    Vote {
        #[arg(value_enum)]
        decision: Decision,
    },
    /// Operator and owner actions
    Admin {
        /// Game to act on (defaults to the current game)
        #[arg(long)]
        game: Option<GameId>,
        #[command(subcommand)]
        action: AdminCommand,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Decision {
    Continue,
    Stop,
}

#[derive(Subcommand, Debug)]
enum AdminCommand {
    RequestRandomness,
    ProcessVotes,
    DistributeFinal,
    DistributeConsolation {
        #[arg(long = "winner", required = true)]
        winners: Vec<Address>,
        /// Token amounts, one per winner, e.g. `12.5`
        #[arg(long = "amount", required = true)]
        amounts: Vec<String>,
        #[arg(long, default_value_t = 50)]
        batch_size: u64,
    },
    SetOperator {
        operator: Address,
        /// Remove the operator instead of adding it
        #[arg(long)]
        revoke: bool,
    },
    Pause,
    Unpause,
    SetFeeWallet {
        wallet: Address,
    },
}

/// Logs go to stderr; with `log_dir` also to a daily file. Keep the guard alive.
fn init_tracing(log_dir: Option<&str>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr);
    match log_dir {
        Some(dir) => {
            let dir = shellexpand::tilde(dir).into_owned();
            let (writer, guard) = tracing_appender::non_blocking(
                tracing_appender::rolling::daily(dir, "lottery-cli.log"),
            );
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .try_init()
                .wrap_err("installing log subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .try_init()
                .wrap_err("installing log subscriber")?;
            Ok(None)
        }
    }
}

async fn handle_interrupt() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received interrupt, exiting"),
        Err(err) => tracing::warn!(%err, "Received interrupt error, exiting anyway"),
    }
}

async fn admin_operation(
    client: &Client,
    game: Option<GameId>,
    action: AdminCommand,
) -> Result<Operation> {
    let game_id = match game {
        Some(game_id) => game_id,
        None => client.current_game().await?,
    };
    let op = match action {
        AdminCommand::RequestRandomness => Operation::RequestRandomness { game_id },
        AdminCommand::ProcessVotes => Operation::ProcessVotingResults { game_id },
        AdminCommand::DistributeFinal => Operation::DistributeFinalPrize { game_id },
        AdminCommand::DistributeConsolation {
            winners,
            amounts,
            batch_size,
        } => {
            if winners.len() != amounts.len() {
                return Err(eyre!(
                    "{} winners but {} amounts; give one --amount per --winner",
                    winners.len(),
                    amounts.len()
                ));
            }
            let decimals = client.token_decimals().await?;
            let amounts = amounts
                .iter()
                .map(|raw| {
                    parse_units(raw, decimals).wrap_err_with(|| format!("parsing amount {raw:?}"))
                })
                .collect::<Result<Vec<_>>>()?;
            Operation::DistributeConsolationPrizes {
                game_id,
                winners,
                amounts,
                batch_size,
            }
        }
        AdminCommand::SetOperator { operator, revoke } => Operation::SetOperator {
            operator,
            authorized: !revoke,
        },
        AdminCommand::Pause => Operation::PauseGame,
        AdminCommand::Unpause => Operation::UnpauseGame,
        AdminCommand::SetFeeWallet { wallet } => Operation::SetPlatformFeeWallet { wallet },
    };
    Ok(op)
}

async fn writer(client: &Client, wallet_rpc: Option<&str>) -> Result<Writer> {
    let url = wallet_rpc.unwrap_or(client.profile().rpc_url.as_str()).to_string();
    let writer = client.connect(&url).await?;
    tracing::info!(account = %writer.account, "signing as");
    Ok(writer)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let _log_guard = init_tracing(args.log_dir.as_deref())?;

    let env = args.network();
    let root = shellexpand::tilde(&args.config_dir).into_owned();
    let store = NetworkStore::new_in(&root, env).map_err(|e| eyre!(e))?;
    let mut profile = resolve_profile(env, &store).map_err(|e| eyre!(e))?;
    if let Some(url) = &args.rpc_url {
        profile.rpc_url = url.clone();
        profile.validate().map_err(|e| eyre!(e))?;
    }
    tracing::info!(
        network = %profile.name,
        chain_id = profile.chain_id,
        rpc = %profile.rpc_url,
        game = %profile.game_contract,
        "using network"
    );

    let client = Client::new(profile)?;
    client.check_chain().await?;

    match args.command {
        Command::Status => {
            let view = client.game_view(args.account).await?;
            for line in render::render_status(&view, chain_sync::view::unix_now()) {
                println!("{line}");
            }
        }
        Command::Watch => client.watch(args.account, handle_interrupt()).await?,
        Command::Buy {
            shares,
            prize_address,
        } => {
            let writer = writer(&client, args.wallet_rpc.as_deref()).await?;
            client
                .buy(
                    &writer,
                    PurchaseRequest {
                        shares,
                        prize_address,
                    },
                )
                .await?;
        }
        Command::Vote { decision } => {
            let writer = writer(&client, args.wallet_rpc.as_deref()).await?;
            client
                .vote(&writer, matches!(decision, Decision::Continue))
                .await?;
        }
        Command::Admin { game, action } => {
            let op = admin_operation(&client, game, action).await?;
            let writer = writer(&client, args.wallet_rpc.as_deref()).await?;
            client.admin(&writer, op).await?;
        }
    }
    Ok(())
}
