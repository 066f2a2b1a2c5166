pub mod capabilities;
pub mod chat;
pub mod events;
pub mod failure;
pub mod input;
pub mod policy;
pub mod state;
