use std::path::PathBuf;

use clap::{Parser, Subcommand};
use malmo_env::Env;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "malmo-service")]
#[command(about = "Control a MalmoEnv Minecraft service")]
struct Cli {
    /// Mission XML the experiment runs (needed to build the token)
    #[arg(long)]
    mission: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    server: String,

    #[arg(long, default_value_t = 9000)]
    port: u16,

    #[arg(long)]
    server2: Option<String>,

    #[arg(long)]
    port2: Option<u16>,

    #[arg(long, default_value_t = 0)]
    role: usize,

    #[arg(long, default_value = "test1")]
    experiment_id: String,

    /// Episode counter used in the token
    #[arg(long, default_value_t = 0)]
    episode: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ping a node
    Status {
        /// Ping the head node instead of the role's node
        #[arg(long)]
        head: bool,
    },
    /// Make the role's Minecraft instance exit
    Exit,
    /// Wait until head and role nodes answer
    Resync,
    /// Reset the head node's episode counter for the token
    Reinit,
    /// Release the token on the head node
    Close,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let xml = std::fs::read_to_string(&cli.mission)?;

    let mut builder = Env::builder(xml, cli.port)
        .server(cli.server)
        .role(cli.role)
        .exp_uid(cli.experiment_id)
        .episode(cli.episode);
    if let Some(server2) = cli.server2 {
        builder = builder.server2(server2);
    }
    if let Some(port2) = cli.port2 {
        builder = builder.port2(port2);
    }
    let mut env = builder.build()?;

    match cli.command {
        Commands::Status { head } => {
            let status = env.status(head).await?;
            println!("{}", status);
        }
        Commands::Exit => {
            let ok = env.exit().await?;
            println!("exit acknowledged: {}", ok);
        }
        Commands::Resync => {
            env.resync().await?;
            println!("service reachable");
        }
        Commands::Reinit => {
            let ok = env.reinit().await?;
            println!("reinit acknowledged: {}", ok);
        }
        Commands::Close => {
            env.close().await;
            println!("closed {}", env.token());
        }
    }
    Ok(())
}
