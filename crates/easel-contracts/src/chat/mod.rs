mod command_registry;
mod history;
mod intent_parser;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use history::{ChatEntry, ChatRole, ConversationHistory};
pub use intent_parser::{parse_intent, Intent};
