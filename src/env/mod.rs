//! Gym-style environment driving one agent role of a Malmo mission.
//!
//! An [`Env`] owns one persistent command connection to the Minecraft
//! instance serving its role. Episodes follow `reset` -> `step`* -> done;
//! service operations in [`service`] open their own short-lived connections.

pub mod config;
pub mod service;
pub mod spaces;
pub mod turn;

use std::sync::Arc;

use bytes::Bytes;

use crate::error::{Error, Result};
use crate::mission::{CommandParser, MissionInit, MissionSpec};
use crate::protocol::{decode_peek_done, decode_u32, Request, StepOptions, StepReply, Transport};

pub use config::{
    Endpoint, EnvBuilder, EnvConfig, ErrorSink, RetryConfig, RetryLimit, RetryPolicy,
    RetryState, TracingErrorSink, MAX_WAIT,
};
pub use spaces::{ActionSpace, Layout, Observation, ObservationSpace};
pub use turn::TurnMode;

/// Outcome of one `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub done: bool,
    /// Raw info JSON, when the step options ask for it.
    pub info: Option<String>,
}

impl StepResult {
    /// Parse the info string. `None` when no (or an empty) info string was sent.
    pub fn info_json(&self) -> Option<serde_json::Result<serde_json::Value>> {
        self.info
            .as_deref()
            .filter(|info| !info.trim().is_empty())
            .map(serde_json::from_str)
    }
}

pub struct Env {
    config: EnvConfig,
    mission: MissionSpec,
    mission_init: MissionInit,
    action_space: ActionSpace,
    observation_space: ObservationSpace,
    step_options: StepOptions,
    exp_uid: String,
    head: Endpoint,
    node: Endpoint,
    resets: u64,
    turn: TurnMode,
    done: bool,
    integrated_server_port: u16,
    client: Option<Transport>,
    error_sink: Arc<dyn ErrorSink>,
}

impl Env {
    pub fn builder(xml: impl Into<String>, port: u16) -> EnvBuilder {
        EnvBuilder::new(xml, port)
    }

    /// Parse the mission and prepare this role. No connection is made until `reset`.
    pub fn init(xml: &str, config: EnvConfig, error_sink: Arc<dyn ErrorSink>) -> Result<Self> {
        let mission = MissionSpec::parse(xml)?;
        let agent = mission.agent(config.role)?;

        let action_space = match &config.actions {
            Some(actions) => ActionSpace::new(actions.clone()),
            None => {
                let parser = match &config.action_filter {
                    Some(filter) => CommandParser::new(filter.iter().cloned()),
                    None => CommandParser::default(),
                };
                ActionSpace::new(parser.actions(&agent.handlers)?)
            }
        };

        let layout = if config.reshape { Layout::Hwc } else { Layout::Flat };
        let observation_space = ObservationSpace::new(agent.video, layout);

        let exp_uid = config.exp_uid.clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let step_options = config.step_options.unwrap_or(if mission.is_turn_based() {
            StepOptions::OMIT_TURN_KEY
        } else {
            StepOptions::FULL
        });

        let mut mission_init = MissionInit::new(mission.xml(), exp_uid.clone(), config.role);
        if config.role != 0 && mission.agent_count() > 1 {
            mission_init = mission_init.with_server_connection(config.server.clone());
        }

        let head = config.head_endpoint();
        let node = config.role_endpoint()?;
        tracing::debug!(
            role = config.role,
            agents = mission.agent_count(),
            actions = action_space.n(),
            turn_based = mission.is_turn_based(),
            "environment initialised"
        );

        Ok(Self {
            resets: config.episode,
            config,
            mission,
            mission_init,
            action_space,
            observation_space,
            step_options,
            exp_uid,
            head,
            node,
            turn: TurnMode::None,
            done: true,
            integrated_server_port: 0,
            client: None,
            error_sink,
        })
    }

    pub fn action_space(&self) -> &ActionSpace {
        &self.action_space
    }

    pub fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    pub fn mission(&self) -> &MissionSpec {
        &self.mission
    }

    pub fn role(&self) -> usize {
        self.config.role
    }

    pub fn agent_count(&self) -> usize {
        self.mission.agent_count()
    }

    pub fn exp_uid(&self) -> &str {
        &self.exp_uid
    }

    /// Number of resets so far, counting from the configured starting episode.
    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn turn_mode(&self) -> &TurnMode {
        &self.turn
    }

    pub fn step_options(&self) -> StepOptions {
        self.step_options
    }

    pub fn head_endpoint(&self) -> &Endpoint {
        &self.head
    }

    pub fn role_endpoint(&self) -> &Endpoint {
        &self.node
    }

    /// Port of the mission's integrated server, once found.
    pub fn integrated_server_port(&self) -> u16 {
        self.integrated_server_port
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// `{exp_uid}:{role}:{resets}`, identifying this episode attempt.
    pub fn token(&self) -> String {
        format!("{}:{}:{}", self.exp_uid, self.config.role, self.resets)
    }

    /// Start a new episode and return its first observation.
    pub async fn reset(&mut self) -> Result<Observation> {
        let period = self.config.resync_period;
        if period > 0 && (self.resets + 1) % period == 0 {
            self.exit_resync().await?;
        }

        let mut attempts = self.config.retry.quit.start();
        while !self.done {
            if self.client.is_none() {
                tracing::debug!(role = self.config.role, "no live connection, skipping quit");
                self.done = true;
                break;
            }
            self.done = self.quit_episode().await?;
            if !self.done {
                if attempts.exhausted() {
                    return Err(Error::Env("server never confirmed quitting the episode".into()));
                }
                attempts.wait().await;
            }
        }

        self.start_up().await
    }

    async fn start_up(&mut self) -> Result<Observation> {
        self.resets += 1;
        if self.config.role != 0 {
            self.find_server().await?;
        }
        if self.client.is_none() {
            let client = Transport::open(&self.node.host, self.node.port).await?;
            self.client = Some(client);
        }
        self.init_mission().await?;
        self.done = false;
        tracing::info!(role = self.config.role, token = %self.token(), "episode started");
        self.peek_obs().await
    }

    /// Take the command connection for one request/reply exchange.
    ///
    /// It goes back into `self.client` only after every reply frame has been
    /// read. An exchange that fails or is cancelled part way drops the
    /// socket, so the next `reset` reconnects instead of reading stale replies.
    fn take_client(&mut self) -> Result<Transport> {
        self.client.take().ok_or(Error::NotConnected)
    }

    async fn drop_client(&mut self) {
        if let Some(client) = self.client.take() {
            client.shutdown().await;
        }
    }

    /// Send the mission and token until the server accepts them.
    async fn init_mission(&mut self) -> Result<()> {
        let mut attempts = self.config.retry.init.start();
        loop {
            let xml = self.mission_init.render();
            let token = format!("{}:{}", self.token(), self.mission.agent_count());

            let mut client = self.take_client()?;
            let (ok, key) = init_exchange(&mut client, &xml, &token).await?;
            self.client = Some(client);

            self.turn = TurnMode::from_key(key);
            if ok == 1 {
                return Ok(());
            }
            tracing::debug!(%token, failures = attempts.failures(), "mission init not accepted yet");
            if attempts.exhausted() {
                return Err(Error::MissionInit("mission init was never accepted".into()));
            }
            attempts.wait().await;
        }
    }

    /// Poll until the first frame of the episode arrives.
    async fn peek_obs(&mut self) -> Result<Observation> {
        let mut attempts = self.config.retry.peek.start();
        let mut frame = Bytes::new();
        while !self.done && frame.is_empty() {
            let mut client = self.take_client()?;
            let (peeked, done) = peek_exchange(&mut client).await?;
            self.client = Some(client);
            frame = peeked;
            self.done = done;

            if frame.is_empty() {
                if attempts.exhausted() {
                    self.drop_client().await;
                    return Err(Error::MissionInit("too long waiting for first observation".into()));
                }
                attempts.wait().await;
            }
        }
        self.observation_space.observation(frame)
    }

    /// Ask the server to abandon the current episode. True once it has.
    async fn quit_episode(&mut self) -> Result<bool> {
        let mut client = self.take_client()?;
        client.request(&Request::Quit).await?;
        let ok = decode_u32("quit", &client.recv_required("quit").await?)?;
        self.client = Some(client);
        tracing::debug!(ok, "quit reply");
        Ok(ok != 0)
    }

    /// Ask the head node for the integrated server port of this mission.
    async fn find_server(&mut self) -> Result<()> {
        let token = self.token();
        let mut head = Transport::open(&self.head.host, self.head.port).await?;
        let mut attempts = self.config.retry.find_server.start();
        let port = loop {
            head.request(&Request::Find(&token)).await?;
            let port = decode_u32("find", &head.recv_required("find").await?)?;
            if port != 0 {
                break port;
            }
            if attempts.exhausted() {
                head.shutdown().await;
                self.drop_client().await;
                return Err(Error::MissionInit("too long finding mission to join".into()));
            }
            attempts.wait().await;
        };
        head.shutdown().await;

        let port = u16::try_from(port)
            .map_err(|_| Error::Env(format!("find returned invalid port {}", port)))?;
        tracing::debug!(port, "found integrated server");
        self.integrated_server_port = port;
        self.mission_init.set_server_port(port);
        Ok(())
    }

    /// Take one action by index into the action space.
    pub async fn step(&mut self, action: usize) -> Result<StepResult> {
        let command = self.action_space.command(action)?.to_string();
        self.step_command(&command).await
    }

    /// Take one action given as raw command text.
    ///
    /// The command is resubmitted until the server reports it applied, the
    /// turn is granted and a frame is available, or the episode ends. Once
    /// done, no further exchanges happen.
    pub async fn step_command(&mut self, command: &str) -> Result<StepResult> {
        let with_turn_key = self.step_options.with_turn_key();
        let with_info = self.step_options.with_info();
        let request = Request::Step { options: self.step_options, action: command }.encode();

        let mut frame = Bytes::new();
        let mut reward = 0.0;
        let mut info: Option<String> = None;
        let mut turn = true;
        let mut attempts = self.config.retry.step.start();

        while !self.done && (frame.is_empty() || (with_info && info.is_none()) || turn) {
            let key = with_turn_key.then(|| self.turn.key().to_string());
            let mut client = self.take_client()?;
            let exchange = step_exchange(&mut client, &request, key.as_deref(), with_info).await?;
            self.client = Some(client);

            frame = exchange.frame;
            info = exchange.info;
            reward = exchange.reply.reward;
            self.done = exchange.reply.done;
            match TurnMode::from_key(exchange.key) {
                gated @ TurnMode::Gated(_) => {
                    if exchange.reply.sent {
                        turn = false;
                    }
                    self.turn = gated;
                }
                TurnMode::None => turn = !exchange.reply.sent,
            }

            if !self.done && (frame.is_empty() || turn) {
                if attempts.exhausted() {
                    return Err(Error::Env(format!("step {:?} was never applied", command)));
                }
                attempts.wait().await;
            }
        }

        Ok(StepResult {
            observation: self.observation_space.observation(frame)?,
            reward,
            done: self.done,
            info,
        })
    }

    /// Rendering happens inside Minecraft; nothing to do here.
    pub fn render(&self) {}

    /// Worlds are seeded by the mission XML; nothing to do here.
    pub fn seed(&mut self, _seed: u64) {}
}

async fn init_exchange(client: &mut Transport, xml: &str, token: &str) -> Result<(u32, String)> {
    client.send(xml.as_bytes()).await?;
    client.send(token.as_bytes()).await?;
    let ok = decode_u32("mission init", &client.recv_required("mission init").await?)?;
    let key = client.recv_string("mission init").await?;
    Ok((ok, key))
}

async fn peek_exchange(client: &mut Transport) -> Result<(Bytes, bool)> {
    client.request(&Request::Peek).await?;
    let frame = client.recv_required("peek").await?;
    let done = decode_peek_done(&client.recv_required("peek").await?)?;
    Ok((frame, done))
}

/// Reply frames of one `<StepK>` exchange.
struct StepExchange {
    frame: Bytes,
    reply: StepReply,
    info: Option<String>,
    /// Empty when the exchange carries no turn key.
    key: String,
}

async fn step_exchange(
    client: &mut Transport,
    request: &str,
    turn_key: Option<&str>,
    with_info: bool,
) -> Result<StepExchange> {
    client.send(request.as_bytes()).await?;
    if let Some(key) = turn_key {
        client.send(key.as_bytes()).await?;
    }
    let frame = client.recv_required("step").await?;
    let reply = StepReply::decode(&client.recv_required("step").await?)?;
    let info = if with_info {
        Some(client.recv_string("step").await?)
    } else {
        None
    };
    let key = match turn_key {
        Some(_) => client.recv_string("step").await?,
        None => String::new(),
    };
    Ok(StepExchange { frame, reply, info, key })
}
