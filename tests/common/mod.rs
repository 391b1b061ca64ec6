//! Scripted stand-in for the Minecraft-side MalmoEnv command server.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use malmo_env::protocol::{encode_u32, recv_frame, send_frame, StepReply};
use malmo_env::{RetryConfig, RetryPolicy};
use tokio::net::{TcpListener, TcpStream};

pub const FRAME_LEN: usize = 4 * 2 * 3;

pub const MAZE_MISSION: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<Mission xmlns="http://ProjectMalmo.microsoft.com">
  <About><Summary>Walk south to the marked square</Summary></About>
  <ServerSection><ServerHandlers><FlatWorldGenerator/></ServerHandlers></ServerSection>
  <AgentSection mode="Survival">
    <Name>Walker</Name>
    <AgentStart/>
    <AgentHandlers>
      <DiscreteMovementCommands/>
      <VideoProducer want_depth="false"><Width>4</Width><Height>2</Height></VideoProducer>
    </AgentHandlers>
  </AgentSection>
</Mission>"#;

pub const DUEL_MISSION: &str = r#"<Mission xmlns="http://ProjectMalmo.microsoft.com">
  <About><Summary>Take turns</Summary></About>
  <ServerSection><ServerHandlers><FlatWorldGenerator/></ServerHandlers></ServerSection>
  <AgentSection mode="Survival">
    <Name>First</Name>
    <AgentStart/>
    <AgentHandlers>
      <TurnBasedCommands requestedPosition="1"><DiscreteMovementCommands/></TurnBasedCommands>
      <VideoProducer><Width>4</Width><Height>2</Height></VideoProducer>
    </AgentHandlers>
  </AgentSection>
  <AgentSection mode="Survival">
    <Name>Second</Name>
    <AgentStart/>
    <AgentHandlers>
      <TurnBasedCommands requestedPosition="2"><DiscreteMovementCommands/></TurnBasedCommands>
      <VideoProducer><Width>4</Width><Height>2</Height></VideoProducer>
    </AgentHandlers>
  </AgentSection>
</Mission>"#;

/// Retry policy with millisecond waits.
pub fn fast_retry() -> RetryConfig {
    let ms = Duration::from_millis;
    RetryConfig {
        init: RetryPolicy::unbounded(ms(5)),
        find_server: RetryPolicy::deadline(ms(5), ms(200)),
        peek: RetryPolicy::deadline(ms(5), ms(200)),
        quit: RetryPolicy::unbounded(ms(5)),
        step: RetryPolicy::unbounded(ms(5)),
        resync: RetryPolicy::max_attempts(ms(5), 3),
        exit_pause: ms(10),
    }
}

/// Turn rotation shared by all agents of a mission.
#[derive(Debug, Default)]
pub struct Turns {
    pub agents: usize,
    pub current: usize,
    pub counter: u64,
    /// `(role, key)` for every step the server applied.
    pub accepted: Vec<(usize, String)>,
}

impl Turns {
    pub fn key(&self) -> String {
        format!("key-{}", self.counter)
    }
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Every request tag received, in order.
    pub requests: Vec<String>,
    /// Tokens sent with each mission init.
    pub init_tokens: Vec<String>,
    pub init_xml: Vec<String>,
    pub closed: Vec<String>,
    /// Mission inits answered with ok = 0 before accepting.
    pub refuse_init: u32,
    /// `<Find>` replies of 0 before returning `find_port`.
    pub find_zero: u32,
    /// 0 means never found.
    pub find_port: u32,
    /// Peeks answered with an empty frame; `u32::MAX` means forever.
    pub empty_peeks: u32,
    /// Steps answered with sent = 0 before one is applied (ungated missions).
    pub unsent_steps: u32,
    /// Square the walker must reach; each applied `movesouth 1` advances one square.
    pub goal: Option<u32>,
    pub position: u32,
    /// Applied steps until the mission ends.
    pub steps_until_done: Option<u32>,
    pub turns: Option<Turns>,
    pub done: bool,
    /// `<Quit/>` requests answered with ok = 0 before one is honoured.
    pub refuse_quit: u32,
    /// Step requests, applied or not, until the mission ends.
    pub end_after_step_requests: Option<u32>,
    /// Send a truncated step reply to the next step request.
    pub truncate_next_step_reply: bool,
    /// Hold the replies to the next request starting with this tag.
    pub stall: Option<(&'static str, Duration)>,
}

impl MockState {
    fn frame(&self) -> Vec<u8> {
        vec![self.position as u8 + 1; FRAME_LEN]
    }
}

pub struct MockServer {
    pub addr: SocketAddr,
    pub state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub async fn start(state: MockState) -> Self {
        Self::start_shared(Arc::new(Mutex::new(state))).await
    }

    /// Start another node sharing mission state with an existing one.
    pub async fn start_shared(state: Arc<Mutex<MockState>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone()));
            }
        });
        Self { addr, state }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn requests(&self) -> Vec<String> {
        self.with(|s| s.requests.clone())
    }
}

/// A port with nothing listening on it.
pub async fn dead_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<MockState>>) {
    let mut role = 0usize;
    while let Ok(Some(frame)) = recv_frame(&mut stream).await {
        let text = String::from_utf8_lossy(&frame).to_string();
        let replies = if text.starts_with("<MissionInit") {
            let token = match recv_frame(&mut stream).await {
                Ok(Some(token)) => String::from_utf8_lossy(&token).to_string(),
                _ => return,
            };
            role = token.split(':').nth(1).and_then(|r| r.parse().ok()).unwrap_or(0);
            mission_init(&state, text.clone(), token)
        } else if text.starts_with("<Step") {
            let code: u8 = text[5..6].parse().unwrap_or(0);
            let key = if code < 2 {
                match recv_frame(&mut stream).await {
                    Ok(Some(key)) => Some(String::from_utf8_lossy(&key).to_string()),
                    _ => return,
                }
            } else {
                None
            };
            step(&state, role, &text, code, key)
        } else {
            request(&state, &text)
        };
        let stall = {
            let mut s = state.lock().unwrap();
            if s.stall.is_some_and(|(tag, _)| text.starts_with(tag)) {
                s.stall.take().map(|(_, delay)| delay)
            } else {
                None
            }
        };
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        for reply in replies {
            if send_frame(&mut stream, &reply).await.is_err() {
                return;
            }
        }
    }
}

fn mission_init(state: &Mutex<MockState>, xml: String, token: String) -> Vec<Vec<u8>> {
    let mut s = state.lock().unwrap();
    s.requests.push("<MissionInit>".to_string());
    s.init_xml.push(xml);
    s.init_tokens.push(token);
    let ok = if s.refuse_init > 0 {
        s.refuse_init -= 1;
        0
    } else {
        s.done = false;
        s.position = 0;
        1
    };
    let key = s.turns.as_ref().map(Turns::key).unwrap_or_default();
    vec![encode_u32(ok), key.into_bytes()]
}

fn request(state: &Mutex<MockState>, text: &str) -> Vec<Vec<u8>> {
    let mut s = state.lock().unwrap();
    s.requests.push(text.to_string());
    if text.starts_with("<MalmoEnv") {
        Vec::new()
    } else if text == "<Peek/>" {
        let frame = if s.empty_peeks > 0 {
            if s.empty_peeks != u32::MAX {
                s.empty_peeks -= 1;
            }
            Vec::new()
        } else {
            s.frame()
        };
        vec![frame, vec![s.done as u8]]
    } else if text == "<Quit/>" {
        if s.refuse_quit > 0 {
            s.refuse_quit -= 1;
            return vec![encode_u32(0)];
        }
        s.done = true;
        vec![encode_u32(1)]
    } else if text.starts_with("<Find>") {
        let port = if s.find_zero > 0 {
            s.find_zero -= 1;
            0
        } else {
            s.find_port
        };
        vec![encode_u32(port)]
    } else if let Some(token) = text.strip_prefix("<Close>") {
        s.closed.push(token.trim_end_matches("</Close>").to_string());
        vec![encode_u32(1)]
    } else if text.starts_with("<Init>") || text.starts_with("<Exit>") {
        vec![encode_u32(1)]
    } else if text == "<Status/>" {
        vec![b"ok".to_vec()]
    } else {
        panic!("mock server got unexpected request {:?}", text);
    }
}

fn step(state: &Mutex<MockState>, role: usize, text: &str, code: u8, key: Option<String>) -> Vec<Vec<u8>> {
    let mut s = state.lock().unwrap();
    s.requests.push(text.to_string());

    if let Some(remaining) = s.end_after_step_requests.as_mut() {
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            s.done = true;
        }
    }

    let sent = if s.done {
        false
    } else if let Some(turns) = s.turns.as_mut() {
        let presented = key.clone().unwrap_or_default();
        if role == turns.current && presented == turns.key() {
            turns.accepted.push((role, presented));
            turns.counter += 1;
            turns.current = (turns.current + 1) % turns.agents;
            true
        } else {
            false
        }
    } else if s.unsent_steps > 0 {
        s.unsent_steps -= 1;
        false
    } else {
        true
    };

    let mut reward = 0.0;
    if sent {
        if let Some(goal) = s.goal {
            if text.contains(">movesouth 1<") {
                s.position += 1;
            }
            if s.position == goal {
                reward = 100.0;
                s.done = true;
            } else if s.position > goal {
                reward = -1000.0;
                s.done = true;
            }
        }
        if let Some(remaining) = s.steps_until_done.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                s.done = true;
            }
        }
    }

    let mut reply = StepReply { reward, done: s.done, sent }.encode();
    if s.truncate_next_step_reply {
        s.truncate_next_step_reply = false;
        reply.truncate(StepReply::SIZE - 1);
    }
    let mut frames = vec![s.frame(), reply];
    if code == 0 || code == 2 {
        frames.push(format!(r#"{{"position": {}}}"#, s.position).into_bytes());
    }
    if code < 2 {
        let key = s.turns.as_ref().map(Turns::key).unwrap_or_default();
        frames.push(key.into_bytes());
    }
    frames
}
