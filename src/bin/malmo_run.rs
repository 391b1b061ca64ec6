//! Run episodes of a mission with a random agent
//!
//! Run with: cargo run --bin malmo-run -- --mission missions/mobchase.xml --port 9000

use std::path::PathBuf;

use clap::Parser;
use malmo_env::{Env, EnvConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "malmo-run")]
#[command(about = "Run MalmoEnv episodes with uniformly random actions")]
struct Args {
    /// Mission XML file
    #[arg(long)]
    mission: PathBuf,

    /// Head node command port [default: 9000]
    #[arg(long)]
    port: Option<u16>,

    /// Head node address [default: localhost]
    #[arg(long)]
    server: Option<String>,

    /// Address of the node serving this role (defaults to --server)
    #[arg(long)]
    server2: Option<String>,

    /// Port of the node serving this role (defaults to --port + role)
    #[arg(long)]
    port2: Option<u16>,

    #[arg(long)]
    role: Option<usize>,

    #[arg(long, default_value_t = 1)]
    episodes: u64,

    /// Stop an episode after this many steps (0 = run until done)
    #[arg(long, default_value_t = 0)]
    episode_max_steps: u64,

    /// Restart Minecraft every N resets (0 = never)
    #[arg(long)]
    resync: Option<u64>,

    /// Experiment id shared by all agents (random when unset)
    #[arg(long)]
    experiment_id: Option<String>,

    /// JSON file with an EnvConfig; command-line options override it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    /// Apply the options given on the command line on top of `base`.
    fn overlay(&self, base: EnvConfig) -> EnvConfig {
        EnvConfig {
            server: self.server.clone().unwrap_or(base.server),
            port: self.port.unwrap_or(base.port),
            server2: self.server2.clone().or(base.server2),
            port2: self.port2.or(base.port2),
            role: self.role.unwrap_or(base.role),
            exp_uid: self.experiment_id.clone().or(base.exp_uid),
            resync_period: self.resync.unwrap_or(base.resync_period),
            ..base
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let xml = std::fs::read_to_string(&args.mission)?;

    let base = match &args.config {
        Some(path) => EnvConfig::from_json_file(path)?,
        None => EnvConfig::default(),
    };
    let config = args.overlay(base);

    let mut env = Env::builder(xml, config.port).config(config).build()?;
    tracing::info!(
        actions = ?env.action_space().iter().collect::<Vec<_>>(),
        shape = ?env.observation_space().shape(),
        "environment ready"
    );

    let mut rng = rand::thread_rng();
    for episode in 0..args.episodes {
        tracing::info!(episode, "reset");
        let obs = env.reset().await?;
        tracing::debug!(len = obs.len(), "first observation");

        let mut steps = 0u64;
        let mut total_reward = 0.0;
        loop {
            let Some(action) = env.action_space().sample(&mut rng) else {
                tracing::warn!("action space is empty, nothing to do");
                break;
            };
            let result = env.step(action).await?;
            steps += 1;
            total_reward += result.reward;
            tracing::debug!(
                steps,
                action = env.action_space().get(action).unwrap_or_default(),
                reward = result.reward,
                done = result.done,
                info = result.info.as_deref().unwrap_or(""),
                "step"
            );
            if result.done || (args.episode_max_steps > 0 && steps >= args.episode_max_steps) {
                break;
            }
        }
        tracing::info!(episode, steps, total_reward, "episode finished");
    }

    env.close().await;
    Ok(())
}
