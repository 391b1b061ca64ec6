//! MalmoEnv client
//!
//! Drives Minecraft reinforcement-learning missions through the MalmoEnv
//! socket protocol: length-prefixed frames to a command port embedded in
//! each Minecraft instance, with gym-style `reset`/`step`/`close`.

pub mod env;
pub mod error;
pub mod mission;
pub mod multiagent;
pub mod protocol;

pub use error::{Error, Result};
pub use env::{
    ActionSpace, Endpoint, Env, EnvBuilder, EnvConfig, ErrorSink, Layout, Observation,
    ObservationSpace, RetryConfig, RetryLimit, RetryPolicy, StepResult, TracingErrorSink,
    TurnMode, MAX_WAIT,
};
pub use mission::{CommandParser, MissionInit, MissionSpec, VideoGeometry};
pub use multiagent::{AgentConfig, AllDoneChecker, MultiAgentStep, TurnBasedMultiAgentEnv, ALL_AGENTS};
pub use protocol::{Request, StepOptions, StepReply, Transport, MALMO_VERSION};
