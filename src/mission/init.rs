use crate::mission::xml::{escape, MALMO_NAMESPACE};
use crate::protocol::MALMO_VERSION;

/// Address of the mission's integrated Minecraft server, injected for
/// secondary roles so they join the host's world.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConnection {
    pub address: String,
    /// 0 until discovered with `<Find>`.
    pub port: u16,
}

/// The `MissionInit` document sent at the start of every episode.
#[derive(Debug, Clone)]
pub struct MissionInit {
    mission_xml: String,
    exp_uid: String,
    role: usize,
    server_connection: Option<ServerConnection>,
}

impl MissionInit {
    pub fn new(mission_xml: impl Into<String>, exp_uid: impl Into<String>, role: usize) -> Self {
        Self {
            mission_xml: mission_xml.into(),
            exp_uid: exp_uid.into(),
            role,
            server_connection: None,
        }
    }

    pub fn with_server_connection(mut self, address: impl Into<String>) -> Self {
        self.server_connection = Some(ServerConnection { address: address.into(), port: 0 });
        self
    }

    pub fn server_connection(&self) -> Option<&ServerConnection> {
        self.server_connection.as_ref()
    }

    /// Record the integrated server port. No-op for roles without a server connection.
    pub fn set_server_port(&mut self, port: u16) {
        if let Some(conn) = self.server_connection.as_mut() {
            conn.port = port;
        }
    }

    pub fn render(&self) -> String {
        let mut xml = String::with_capacity(self.mission_xml.len() + 1024);
        xml.push_str(&format!(
            "<MissionInit xmlns=\"{}\" xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\" \
             SchemaVersion=\"\" PlatformVersion=\"{}\">",
            MALMO_NAMESPACE, MALMO_VERSION
        ));
        xml.push_str(&self.mission_xml);
        xml.push_str(&format!("<ExperimentUID>{}</ExperimentUID>", escape(&self.exp_uid)));
        if let Some(conn) = &self.server_connection {
            xml.push_str(&format!(
                "<MinecraftServerConnection address=\"{}\" port=\"{}\"/>",
                escape(&conn.address), conn.port
            ));
        }
        xml.push_str(&format!("<ClientRole>{}</ClientRole>", self.role));
        xml.push_str(concat!(
            "<ClientAgentConnection>",
            "<ClientIPAddress>127.0.0.1</ClientIPAddress>",
            "<ClientMissionControlPort>0</ClientMissionControlPort>",
            "<ClientCommandsPort>0</ClientCommandsPort>",
            "<AgentIPAddress>127.0.0.1</AgentIPAddress>",
            "<AgentMissionControlPort>0</AgentMissionControlPort>",
            "<AgentVideoPort>0</AgentVideoPort>",
            "<AgentDepthPort>0</AgentDepthPort>",
            "<AgentLuminancePort>0</AgentLuminancePort>",
            "<AgentObservationsPort>0</AgentObservationsPort>",
            "<AgentRewardsPort>0</AgentRewardsPort>",
            "<AgentColourMapPort>0</AgentColourMapPort>",
            "</ClientAgentConnection>",
        ));
        xml.push_str("</MissionInit>");
        xml
    }
}
