use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::env::Env;
use crate::error::{Error, Result};
use crate::protocol::StepOptions;

/// Ceiling for waits that depend on the remote mission starting.
pub const MAX_WAIT: Duration = Duration::from_secs(180);

/// When to give up on a poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryLimit {
    Unbounded,
    /// Give up once this much wall-clock time has passed since the first attempt.
    Deadline(Duration),
    MaxAttempts(u32),
}

/// Backoff interval plus limit for one poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub limit: RetryLimit,
}

impl RetryPolicy {
    pub const fn unbounded(interval: Duration) -> Self {
        Self { interval, limit: RetryLimit::Unbounded }
    }

    pub const fn deadline(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, limit: RetryLimit::Deadline(max_wait) }
    }

    pub const fn max_attempts(interval: Duration, attempts: u32) -> Self {
        Self { interval, limit: RetryLimit::MaxAttempts(attempts) }
    }

    pub fn start(&self) -> RetryState {
        RetryState { policy: *self, started: Instant::now(), failures: 0 }
    }
}

/// Progress through one run of a [`RetryPolicy`].
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    started: Instant,
    failures: u32,
}

impl RetryState {
    /// Record an unsuccessful attempt. Returns true once the policy allows no more.
    pub fn exhausted(&mut self) -> bool {
        self.failures += 1;
        match self.policy.limit {
            RetryLimit::Unbounded => false,
            RetryLimit::Deadline(max_wait) => self.started.elapsed() > max_wait,
            RetryLimit::MaxAttempts(max) => self.failures >= max,
        }
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub async fn wait(&self) {
        tokio::time::sleep(self.policy.interval).await;
    }
}

/// Retry policy for every wait loop in the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Mission-init handshake until the server answers ok.
    pub init: RetryPolicy,
    /// `<Find>` polling for the integrated server port.
    pub find_server: RetryPolicy,
    /// `<Peek/>` polling for the first observation.
    pub peek: RetryPolicy,
    /// `<Quit/>` polling when abandoning an unfinished episode.
    pub quit: RetryPolicy,
    /// Step resubmission until the command is applied.
    pub step: RetryPolicy,
    /// `<Status/>` pings per endpoint during resync.
    pub resync: RetryPolicy,
    /// Pause after `<Exit>` for the old process to die and a new one to start.
    pub exit_pause: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            init: RetryPolicy::unbounded(Duration::from_secs(1)),
            find_server: RetryPolicy::deadline(Duration::from_secs(1), MAX_WAIT),
            peek: RetryPolicy::deadline(Duration::from_millis(100), MAX_WAIT),
            quit: RetryPolicy::unbounded(Duration::from_millis(100)),
            step: RetryPolicy::unbounded(Duration::from_millis(100)),
            resync: RetryPolicy::max_attempts(Duration::from_secs(10), 30),
            exit_pause: Duration::from_secs(60),
        }
    }
}

/// A host/port pair for a MalmoEnv command server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Environment configuration.
///
/// `server`/`port` name the head node; `server2`/`port2` name the node that
/// serves this role and default to `server` and `port + role`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvConfig {
    pub server: String,
    pub port: u16,
    pub server2: Option<String>,
    pub port2: Option<u16>,
    pub role: usize,
    /// Experiment id shared by every role; a random UUID when unset.
    pub exp_uid: Option<String>,
    /// Starting value of the reset counter.
    pub episode: u64,
    /// Command names kept in the action space.
    pub action_filter: Option<Vec<String>>,
    /// Explicit action list replacing the one derived from the mission.
    pub actions: Option<Vec<String>>,
    /// Restart the Minecraft process every this many resets; 0 disables.
    pub resync_period: u64,
    /// Defaults to 0, or 2 for turn-based missions.
    pub step_options: Option<StepOptions>,
    /// Report observations as height x width x depth instead of flat.
    pub reshape: bool,
    pub retry: RetryConfig,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            server: "localhost".to_string(),
            port: 9000,
            server2: None,
            port2: None,
            role: 0,
            exp_uid: None,
            episode: 0,
            action_filter: None,
            actions: None,
            resync_period: 0,
            step_options: None,
            reshape: false,
            retry: RetryConfig::default(),
        }
    }
}

impl EnvConfig {
    pub fn new(port: u16) -> Self {
        Self { port, ..Self::default() }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("{}: {}", path.display(), e)))?;
        serde_json::from_str(&text)
            .map_err(|e| Error::Env(format!("invalid config {}: {}", path.display(), e)))
    }

    pub fn head_endpoint(&self) -> Endpoint {
        Endpoint { host: self.server.clone(), port: self.port }
    }

    pub fn role_endpoint(&self) -> Result<Endpoint> {
        let host = self.server2.clone().unwrap_or_else(|| self.server.clone());
        let port = match self.port2 {
            Some(port) => port,
            None => u16::try_from(self.role)
                .ok()
                .and_then(|role| self.port.checked_add(role))
                .ok_or_else(|| Error::Env(format!(
                    "port {} + role {} is not a valid port", self.port, self.role
                )))?,
        };
        Ok(Endpoint { host, port })
    }
}

/// Receives errors that teardown operations swallow.
pub trait ErrorSink: Send + Sync {
    fn log_error(&self, operation: &'static str, error: &Error);
}

/// Default sink: a `warn` event per swallowed error.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorSink;

impl ErrorSink for TracingErrorSink {
    fn log_error(&self, operation: &'static str, error: &Error) {
        tracing::warn!(operation, %error, "ignored error");
    }
}

/// Builder for [`Env`].
pub struct EnvBuilder {
    xml: String,
    config: EnvConfig,
    error_sink: Arc<dyn ErrorSink>,
}

impl EnvBuilder {
    pub fn new(xml: impl Into<String>, port: u16) -> Self {
        Self {
            xml: xml.into(),
            config: EnvConfig::new(port),
            error_sink: Arc::new(TracingErrorSink),
        }
    }

    pub fn config(mut self, config: EnvConfig) -> Self {
        self.config = config;
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.config.server = server.into();
        self
    }

    pub fn server2(mut self, server2: impl Into<String>) -> Self {
        self.config.server2 = Some(server2.into());
        self
    }

    pub fn port2(mut self, port2: u16) -> Self {
        self.config.port2 = Some(port2);
        self
    }

    pub fn role(mut self, role: usize) -> Self {
        self.config.role = role;
        self
    }

    pub fn exp_uid(mut self, exp_uid: impl Into<String>) -> Self {
        self.config.exp_uid = Some(exp_uid.into());
        self
    }

    pub fn episode(mut self, episode: u64) -> Self {
        self.config.episode = episode;
        self
    }

    pub fn action_filter<I, S>(mut self, filter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.action_filter = Some(filter.into_iter().map(Into::into).collect());
        self
    }

    pub fn actions<I, S>(mut self, actions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.actions = Some(actions.into_iter().map(Into::into).collect());
        self
    }

    pub fn resync(mut self, period: u64) -> Self {
        self.config.resync_period = period;
        self
    }

    pub fn step_options(mut self, options: StepOptions) -> Self {
        self.config.step_options = Some(options);
        self
    }

    pub fn reshape(mut self, reshape: bool) -> Self {
        self.config.reshape = reshape;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.error_sink = sink;
        self
    }

    pub fn build(self) -> Result<Env> {
        Env::init(&self.xml, self.config, self.error_sink)
    }
}
