pub mod commands;
pub mod init;
pub mod xml;

pub use commands::{CommandHandler, CommandParser, HandlerKind, ListType, ModifierList, DEFAULT_ACTION_FILTER};
pub use init::{MissionInit, ServerConnection};
pub use xml::{AgentSpec, MissionSpec, VideoGeometry, MALMO_NAMESPACE};
