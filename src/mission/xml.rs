//! Mission descriptor parsing.
//!
//! Only the parts the client needs are extracted: how many agents take part,
//! whether the mission is turn based, each agent's video geometry, and each
//! agent's command handlers.

use roxmltree::{Document, Node};

use crate::error::{Error, Result};
use crate::mission::commands::CommandHandler;

/// Namespace of the Malmo mission schema.
pub const MALMO_NAMESPACE: &str = "http://ProjectMalmo.microsoft.com";

/// Frame geometry produced by an agent's `VideoProducer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoGeometry {
    pub width: usize,
    pub height: usize,
    /// 3 for RGB, 4 when depth is requested.
    pub depth: usize,
}

impl VideoGeometry {
    pub fn frame_len(&self) -> usize {
        self.width * self.height * self.depth
    }
}

#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: Option<String>,
    pub video: VideoGeometry,
    pub handlers: Vec<CommandHandler>,
}

/// A parsed mission descriptor together with its source text.
#[derive(Debug, Clone)]
pub struct MissionSpec {
    xml: String,
    agents: Vec<AgentSpec>,
    turn_based: bool,
}

impl MissionSpec {
    /// Parse mission XML. Anything before the `<Mission` element (an XML
    /// declaration, comments) is dropped.
    pub fn parse(xml: &str) -> Result<Self> {
        let start = find_mission_start(xml)
            .ok_or_else(|| Error::Env("mission xml must contain a <Mission> element".into()))?;
        let xml = xml[start..].trim_end().to_string();

        let (agents, turn_based) = parse_document(&xml)?;
        Ok(Self { xml, agents, turn_based })
    }

    /// The `<Mission>` element text, as it will be embedded in `MissionInit`.
    pub fn xml(&self) -> &str {
        &self.xml
    }

    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    pub fn is_turn_based(&self) -> bool {
        self.turn_based
    }

    pub fn agent(&self, role: usize) -> Result<&AgentSpec> {
        self.agents.get(role).ok_or_else(|| Error::MissionXml(format!(
            "role {} out of range for a {}-agent mission", role, self.agents.len()
        )))
    }

    pub fn agents(&self) -> &[AgentSpec] {
        &self.agents
    }
}

fn parse_document(xml: &str) -> Result<(Vec<AgentSpec>, bool)> {
    let doc = Document::parse(xml)
        .map_err(|e| Error::MissionXml(e.to_string()))?;
    let root = doc.root_element();
    if root.tag_name().name() != "Mission" {
        return Err(Error::MissionXml(format!(
            "root element is <{}>, expected <Mission>", root.tag_name().name()
        )));
    }

    let turn_based = root.descendants().any(|n| is_element(&n, "TurnBasedCommands"));

    let sections: Vec<Node> = root.children()
        .filter(|n| is_element(n, "AgentSection"))
        .collect();
    let producers: Vec<Node> = root.descendants()
        .filter(|n| is_element(n, "VideoProducer"))
        .collect();
    if sections.is_empty() {
        return Err(Error::MissionXml("mission has no AgentSection".into()));
    }
    if producers.len() != sections.len() {
        return Err(Error::MissionXml(format!(
            "{} agent sections but {} video producers", sections.len(), producers.len()
        )));
    }

    let mut agents = Vec::with_capacity(sections.len());
    for (section, producer) in sections.iter().zip(producers.iter()) {
        let name = child(section, "Name")
            .and_then(|n| n.text())
            .map(|s| s.trim().to_string());
        let handlers = match child(section, "AgentHandlers") {
            Some(node) => CommandHandler::parse_all(&node)?,
            None => Vec::new(),
        };
        agents.push(AgentSpec {
            name,
            video: parse_video_producer(producer)?,
            handlers,
        });
    }
    Ok((agents, turn_based))
}

fn find_mission_start(xml: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(pos) = xml[offset..].find("<Mission") {
        let start = offset + pos;
        let after = start + "<Mission".len();
        match xml[after..].chars().next() {
            Some(c) if c.is_whitespace() || c == '>' || c == '/' => return Some(start),
            None => return None,
            _ => offset = after,
        }
    }
    None
}

fn parse_video_producer(node: &Node) -> Result<VideoGeometry> {
    let width = parse_dimension(node, "Width")?;
    let height = parse_dimension(node, "Height")?;
    let depth = match node.attribute("want_depth") {
        Some("true") | Some("1") => 4,
        _ => 3,
    };
    Ok(VideoGeometry { width, height, depth })
}

fn parse_dimension(node: &Node, name: &str) -> Result<usize> {
    let text = child(node, name)
        .and_then(|n| n.text())
        .ok_or_else(|| Error::MissionXml(format!("VideoProducer is missing <{}>", name)))?;
    text.trim().parse()
        .map_err(|_| Error::MissionXml(format!("VideoProducer <{}> is not a number: {:?}", name, text)))
}

pub(crate) fn is_element(node: &Node, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

pub(crate) fn child<'a, 'input>(node: &Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| is_element(n, name))
}

/// Escape text for inclusion in element content or a double-quoted attribute.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const TWO_AGENT_MISSION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no" ?>
<Mission xmlns="http://ProjectMalmo.microsoft.com" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <About><Summary>Two agents</Summary></About>
  <ServerSection><ServerHandlers><FlatWorldGenerator/></ServerHandlers></ServerSection>
  <AgentSection mode="Survival">
    <Name>Alpha</Name>
    <AgentStart/>
    <AgentHandlers>
      <TurnBasedCommands requestedPosition="1">
        <DiscreteMovementCommands/>
      </TurnBasedCommands>
      <VideoProducer want_depth="false">
        <Width>84</Width>
        <Height>84</Height>
      </VideoProducer>
    </AgentHandlers>
  </AgentSection>
  <AgentSection mode="Survival">
    <Name>Beta</Name>
    <AgentStart/>
    <AgentHandlers>
      <TurnBasedCommands requestedPosition="2">
        <DiscreteMovementCommands/>
      </TurnBasedCommands>
      <VideoProducer want_depth="1">
        <Width>64</Width>
        <Height>32</Height>
      </VideoProducer>
    </AgentHandlers>
  </AgentSection>
</Mission>"#;

    #[test]
    fn test_parse_two_agent_mission() {
        let mission = MissionSpec::parse(TWO_AGENT_MISSION).unwrap();
        assert_eq!(mission.agent_count(), 2);
        assert!(mission.is_turn_based());
        assert!(mission.xml().starts_with("<Mission"));

        let alpha = mission.agent(0).unwrap();
        assert_eq!(alpha.name.as_deref(), Some("Alpha"));
        assert_eq!(alpha.video, VideoGeometry { width: 84, height: 84, depth: 3 });

        let beta = mission.agent(1).unwrap();
        assert_eq!(beta.video, VideoGeometry { width: 64, height: 32, depth: 4 });
        assert_eq!(beta.video.frame_len(), 64 * 32 * 4);
        assert!(mission.agent(2).is_err());
    }

    #[test]
    fn test_missing_mission_element() {
        let err = MissionSpec::parse("<MissionInit/>").unwrap_err();
        assert!(matches!(err, Error::Env(_)));
    }

    #[test]
    fn test_video_producer_count_must_match_agents() {
        let xml = r#"<Mission><AgentSection><AgentHandlers/></AgentSection></Mission>"#;
        let err = MissionSpec::parse(xml).unwrap_err();
        assert!(matches!(err, Error::MissionXml(_)));
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape(r#"a<b&"c""#), "a&lt;b&amp;&quot;c&quot;");
    }
}
