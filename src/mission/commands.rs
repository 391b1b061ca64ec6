//! Command handler parsing.
//!
//! Turns an agent's `*Commands` handlers into the ordered list of command
//! strings that make up its discrete action space.

use std::collections::BTreeSet;

use roxmltree::Node;

use crate::error::{Error, Result};
use crate::mission::xml::{child, is_element};

/// Commands used when no action filter is given.
pub const DEFAULT_ACTION_FILTER: [&str; 4] = ["move", "turn", "use", "attack"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    ContinuousMovement,
    DiscreteMovement,
    AbsoluteMovement,
    Inventory,
    Chat,
    SimpleCraft,
    NearbyCraft,
    NearbySmelt,
    MissionQuit,
    HumanLevel,
}

const HOTBAR: [&str; 9] = [
    "hotbar.1", "hotbar.2", "hotbar.3", "hotbar.4", "hotbar.5",
    "hotbar.6", "hotbar.7", "hotbar.8", "hotbar.9",
];

impl HandlerKind {
    pub fn from_element(name: &str) -> Option<Self> {
        Some(match name {
            "ContinuousMovementCommands" => Self::ContinuousMovement,
            "DiscreteMovementCommands" => Self::DiscreteMovement,
            "AbsoluteMovementCommands" => Self::AbsoluteMovement,
            "InventoryCommands" => Self::Inventory,
            "ChatCommands" => Self::Chat,
            "SimpleCraftCommands" => Self::SimpleCraft,
            "NearbyCraftCommands" => Self::NearbyCraft,
            "NearbySmeltCommands" => Self::NearbySmelt,
            "MissionQuitCommands" => Self::MissionQuit,
            "HumanLevelCommands" => Self::HumanLevel,
            _ => return None,
        })
    }

    /// Every command the handler understands, in schema order.
    pub fn commands(self) -> Vec<&'static str> {
        match self {
            Self::ContinuousMovement => vec![
                "move", "strafe", "pitch", "turn", "jump", "crouch", "attack", "use",
            ],
            Self::DiscreteMovement => vec![
                "move", "jumpmove", "strafe", "jumpstrafe", "turn",
                "movenorth", "moveeast", "movesouth", "movewest",
                "jumpnorth", "jumpeast", "jumpsouth", "jumpwest",
                "jump", "look", "attack", "use", "jumpuse",
            ],
            Self::AbsoluteMovement => vec!["tpx", "tpy", "tpz", "tp", "setYaw", "setPitch"],
            Self::Inventory => {
                let mut commands = vec!["swapInventoryItems", "combineInventoryItems", "discardCurrentItem"];
                commands.extend(HOTBAR);
                commands
            }
            Self::Chat => vec!["chat"],
            Self::SimpleCraft => vec!["craft"],
            Self::NearbyCraft => vec!["nearbyCraft"],
            Self::NearbySmelt => vec!["nearbySmelt"],
            Self::MissionQuit => vec!["quit"],
            Self::HumanLevel => {
                let mut commands = vec![
                    "forward", "left", "right", "back", "jump", "sneak", "sprint",
                    "inventory", "swapHands", "drop", "use", "attack", "pickItem",
                ];
                commands.extend(HOTBAR);
                commands
            }
        }
    }

    /// Expand one command into the concrete action strings sent to the server.
    fn expand(self, command: &str) -> Result<Vec<String>> {
        let signed = || vec![format!("{} 1", command), format!("{} -1", command)];
        let toggle = || vec![format!("{} 1", command), format!("{} 0", command)];
        let once = || vec![format!("{} 1", command)];

        let actions = match self {
            Self::ContinuousMovement => match command {
                "move" | "strafe" | "pitch" | "turn" => signed(),
                "jump" | "crouch" | "attack" | "use" => toggle(),
                _ => return Err(unsupported(self, command)),
            },
            Self::DiscreteMovement => match command {
                "move" | "jumpmove" | "strafe" | "jumpstrafe" | "turn" | "look" => signed(),
                _ => once(),
            },
            Self::Inventory => match command {
                "discardCurrentItem" => vec![command.to_string()],
                c if c.starts_with("hotbar.") => toggle(),
                _ => return Err(unsupported(self, command)),
            },
            Self::HumanLevel => toggle(),
            Self::MissionQuit => vec![command.to_string()],
            // Commands taking free-form arguments have no discrete form.
            Self::AbsoluteMovement | Self::Chat | Self::SimpleCraft
            | Self::NearbyCraft | Self::NearbySmelt => return Err(unsupported(self, command)),
        };
        Ok(actions)
    }
}

fn unsupported(kind: HandlerKind, command: &str) -> Error {
    Error::CommandHandler(format!(
        "{:?} command {:?} cannot be used as a discrete action", kind, command
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListType {
    Allow,
    Deny,
}

/// An optional `<ModifierList>` restricting a handler's commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifierList {
    pub list_type: ListType,
    pub commands: Vec<String>,
}

/// One command handler declared in an agent's `AgentHandlers`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHandler {
    pub kind: HandlerKind,
    pub turn_based: bool,
    pub modifier: Option<ModifierList>,
}

impl CommandHandler {
    /// Collect the command handlers under an `AgentHandlers` element,
    /// descending into `TurnBasedCommands`.
    pub fn parse_all(agent_handlers: &Node) -> Result<Vec<Self>> {
        let mut handlers = Vec::new();
        collect_handlers(agent_handlers, false, &mut handlers)?;
        Ok(handlers)
    }

    /// Commands this handler allows, in schema order.
    pub fn allowed_commands(&self) -> Result<Vec<&'static str>> {
        let all = self.kind.commands();
        let Some(modifier) = &self.modifier else {
            return Ok(all);
        };
        for command in &modifier.commands {
            if !all.contains(&command.as_str()) {
                return Err(Error::CommandHandler(format!(
                    "{:?} has no command {:?}", self.kind, command
                )));
            }
        }
        let listed = |c: &&str| modifier.commands.iter().any(|m| m == c);
        Ok(match modifier.list_type {
            ListType::Allow => all.into_iter().filter(|c| listed(c)).collect(),
            ListType::Deny => all.into_iter().filter(|c| !listed(c)).collect(),
        })
    }
}

fn collect_handlers(parent: &Node, turn_based: bool, out: &mut Vec<CommandHandler>) -> Result<()> {
    for node in parent.children().filter(|n| n.is_element()) {
        let name = node.tag_name().name();
        if name == "TurnBasedCommands" {
            collect_handlers(&node, true, out)?;
            continue;
        }
        if !name.ends_with("Commands") {
            continue;
        }
        let kind = HandlerKind::from_element(name)
            .ok_or_else(|| Error::CommandHandler(format!("unknown command handler <{}>", name)))?;
        out.push(CommandHandler {
            kind,
            turn_based,
            modifier: parse_modifier_list(&node)?,
        });
    }
    Ok(())
}

fn parse_modifier_list(handler: &Node) -> Result<Option<ModifierList>> {
    let Some(list) = child(handler, "ModifierList") else {
        return Ok(None);
    };
    let list_type = match list.attribute("type") {
        Some("allow-list") => ListType::Allow,
        Some("deny-list") => ListType::Deny,
        other => {
            return Err(Error::CommandHandler(format!("invalid ModifierList type {:?}", other)));
        }
    };
    let commands = list.children()
        .filter(|n| is_element(n, "command"))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .collect();
    Ok(Some(ModifierList { list_type, commands }))
}

/// Builds the discrete action list for an agent from its handlers.
#[derive(Debug, Clone)]
pub struct CommandParser {
    filter: BTreeSet<String>,
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new(DEFAULT_ACTION_FILTER)
    }
}

impl CommandParser {
    pub fn new<I, S>(filter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { filter: filter.into_iter().map(Into::into).collect() }
    }

    /// Action strings for the given handlers, in declaration order, without
    /// duplicates.
    pub fn actions(&self, handlers: &[CommandHandler]) -> Result<Vec<String>> {
        let mut actions: Vec<String> = Vec::new();
        for handler in handlers {
            for command in handler.allowed_commands()? {
                if !self.filter.contains(command) {
                    continue;
                }
                for action in handler.kind.expand(command)? {
                    if !actions.contains(&action) {
                        actions.push(action);
                    }
                }
            }
        }
        Ok(actions)
    }
}
