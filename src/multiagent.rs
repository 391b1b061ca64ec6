//! Turn-based multi-agent wrapper.
//!
//! Composes one [`Env`] per agent role behind an RLlib-style interface keyed
//! by agent id. Resets run concurrently because the server's mission-init
//! barrier holds every role until all have reset; steps run one agent at a
//! time in role order because turn ownership is explicit.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::env::{Env, EnvConfig, ErrorSink, Observation, TracingErrorSink};
use crate::error::{Error, Result};

/// Key in [`MultiAgentStep::dones`] carrying the aggregate done flag.
pub const ALL_AGENTS: &str = "__all__";

/// One agent of a multi-agent mission.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub id: String,
    pub config: EnvConfig,
}

impl AgentConfig {
    pub fn new(id: impl Into<String>, config: EnvConfig) -> Self {
        Self { id: id.into(), config }
    }
}

/// Per-agent results of a multi-agent step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiAgentStep {
    pub observations: BTreeMap<String, Observation>,
    pub rewards: BTreeMap<String, f64>,
    /// Per-agent done flags plus the aggregate under [`ALL_AGENTS`].
    pub dones: BTreeMap<String, bool>,
    pub infos: BTreeMap<String, Option<String>>,
}

impl MultiAgentStep {
    pub fn all_done(&self) -> bool {
        self.dones.get(ALL_AGENTS).copied().unwrap_or(false)
    }

    /// True if any individual agent reported done.
    pub fn any_agent_done(&self) -> bool {
        self.dones.iter().any(|(id, done)| id != ALL_AGENTS && *done)
    }
}

/// Decides the aggregate done flag from the per-agent results.
pub type AllDoneChecker = Box<dyn Fn(&MultiAgentStep) -> bool + Send + Sync>;

struct AgentState {
    env: Env,
    last_observation: Option<Observation>,
}

struct Agent {
    id: String,
    state: Arc<Mutex<AgentState>>,
}

pub struct TurnBasedMultiAgentEnv {
    agents: Vec<Agent>,
    all_done_checker: AllDoneChecker,
    episode_done: bool,
}

impl TurnBasedMultiAgentEnv {
    /// Build one environment per agent. Agents are ordered by role and must
    /// share one experiment id; a random one is assigned when none is set.
    pub fn new(xml: &str, agents: Vec<AgentConfig>) -> Result<Self> {
        Self::with_error_sink(xml, agents, Arc::new(TracingErrorSink))
    }

    pub fn with_error_sink(
        xml: &str,
        mut agents: Vec<AgentConfig>,
        error_sink: Arc<dyn ErrorSink>,
    ) -> Result<Self> {
        if agents.is_empty() {
            return Err(Error::Env("multi-agent environment needs at least one agent".into()));
        }
        agents.sort_by_key(|a| a.config.role);
        for pair in agents.windows(2) {
            if pair[0].config.role == pair[1].config.role {
                return Err(Error::Env(format!(
                    "agents {} and {} share role {}", pair[0].id, pair[1].id, pair[0].config.role
                )));
            }
        }
        if agents[0].config.role != 0 {
            return Err(Error::Env("no agent has role 0 (the host)".into()));
        }

        let exp_uid = agents.iter()
            .find_map(|a| a.config.exp_uid.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut built = Vec::with_capacity(agents.len());
        for agent in agents {
            let config = EnvConfig { exp_uid: Some(exp_uid.clone()), ..agent.config };
            let env = Env::init(xml, config, error_sink.clone())?;
            built.push(Agent {
                id: agent.id,
                state: Arc::new(Mutex::new(AgentState { env, last_observation: None })),
            });
        }

        Ok(Self {
            agents: built,
            all_done_checker: Box::new(|step| step.any_agent_done()),
            episode_done: true,
        })
    }

    pub fn set_all_done_checker(&mut self, checker: AllDoneChecker) {
        self.all_done_checker = checker;
    }

    /// Agent ids in role order.
    pub fn agent_ids(&self) -> impl Iterator<Item = &str> {
        self.agents.iter().map(|a| a.id.as_str())
    }

    /// Reset every agent concurrently.
    ///
    /// Fails with the first error any agent reports; the remaining resets
    /// are cancelled, which drops their half-initialised connections. Until
    /// a reset succeeds the episode counts as done.
    pub async fn reset(&mut self) -> Result<BTreeMap<String, Observation>> {
        self.episode_done = true;
        let mut tasks = JoinSet::new();
        for agent in &self.agents {
            let id = agent.id.clone();
            let state = agent.state.clone();
            tasks.spawn(async move {
                let mut state = state.lock().await;
                let result = state.env.reset().await;
                if let Ok(obs) = &result {
                    state.last_observation = Some(obs.clone());
                }
                (id, result)
            });
        }

        let mut observations = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok((id, Ok(obs))) => Ok((id, obs)),
                Ok((id, Err(e))) => {
                    tracing::warn!(agent = %id, error = %e, "agent reset failed");
                    Err(e)
                }
                Err(e) => Err(Error::TaskFailed(e.to_string())),
            };
            match outcome {
                Ok((id, obs)) => {
                    observations.insert(id, obs);
                }
                Err(e) => {
                    tasks.shutdown().await;
                    return Err(e);
                }
            }
        }

        self.episode_done = false;
        Ok(observations)
    }

    /// Step each agent named in `actions`, in role order.
    ///
    /// Once any agent is done, the rest are not contacted: they get their
    /// last observation, zero reward and done.
    pub async fn step(&mut self, actions: &BTreeMap<String, usize>) -> Result<MultiAgentStep> {
        let mut result = MultiAgentStep::default();
        for agent in &self.agents {
            let Some(&action) = actions.get(&agent.id) else {
                continue;
            };
            let mut state = agent.state.lock().await;

            if self.episode_done {
                let obs = match &state.last_observation {
                    Some(obs) => obs.clone(),
                    None => state.env.observation_space().zeros(),
                };
                result.observations.insert(agent.id.clone(), obs);
                result.rewards.insert(agent.id.clone(), 0.0);
                result.dones.insert(agent.id.clone(), true);
                result.infos.insert(agent.id.clone(), None);
                continue;
            }

            let step = state.env.step(action).await?;
            state.last_observation = Some(step.observation.clone());
            if step.done {
                tracing::debug!(agent = %agent.id, "agent done, remaining agents skip this step");
                self.episode_done = true;
            }
            result.observations.insert(agent.id.clone(), step.observation);
            result.rewards.insert(agent.id.clone(), step.reward);
            result.dones.insert(agent.id.clone(), step.done);
            result.infos.insert(agent.id.clone(), step.info);
        }

        let all_done = (self.all_done_checker)(&result);
        result.dones.insert(ALL_AGENTS.to_string(), all_done);
        Ok(result)
    }

    /// Close every agent's environment.
    pub async fn close(&mut self) {
        for agent in &self.agents {
            agent.state.lock().await.env.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mission::xml::tests::TWO_AGENT_MISSION;

    fn agents() -> Vec<AgentConfig> {
        vec![
            AgentConfig::new("beta", EnvConfig { role: 1, ..EnvConfig::new(9000) }),
            AgentConfig::new("alpha", EnvConfig::new(9000)),
        ]
    }

    #[tokio::test]
    async fn test_agents_sorted_by_role_with_shared_uid() {
        let env = TurnBasedMultiAgentEnv::new(TWO_AGENT_MISSION, agents()).unwrap();
        assert_eq!(env.agent_ids().collect::<Vec<_>>(), vec!["alpha", "beta"]);

        let first = env.agents[0].state.lock().await.env.exp_uid().to_string();
        let second = env.agents[1].state.lock().await.env.exp_uid().to_string();
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_roles_rejected() {
        let agents = vec![
            AgentConfig::new("a", EnvConfig::new(9000)),
            AgentConfig::new("b", EnvConfig::new(9000)),
        ];
        assert!(TurnBasedMultiAgentEnv::new(TWO_AGENT_MISSION, agents).is_err());
    }

    #[test]
    fn test_missing_host_rejected() {
        let agents = vec![AgentConfig::new("b", EnvConfig { role: 1, ..EnvConfig::new(9000) })];
        assert!(TurnBasedMultiAgentEnv::new(TWO_AGENT_MISSION, agents).is_err());
    }

    #[tokio::test]
    async fn test_step_before_reset_is_all_noop() {
        let mut env = TurnBasedMultiAgentEnv::new(TWO_AGENT_MISSION, agents()).unwrap();
        let actions = BTreeMap::from([("alpha".to_string(), 0), ("beta".to_string(), 1)]);
        let step = env.step(&actions).await.unwrap();
        assert_eq!(step.rewards["alpha"], 0.0);
        assert_eq!(step.observations["beta"].len(), 64 * 32 * 4);
        assert!(step.all_done());
    }

    #[tokio::test]
    async fn test_custom_all_done_checker() {
        let mut env = TurnBasedMultiAgentEnv::new(TWO_AGENT_MISSION, agents()).unwrap();
        env.set_all_done_checker(Box::new(|_| false));
        let actions = BTreeMap::from([("alpha".to_string(), 0)]);
        let step = env.step(&actions).await.unwrap();
        assert!(!step.all_done());
        assert!(step.any_agent_done());
        assert!(!step.observations.contains_key("beta"));
    }
}
