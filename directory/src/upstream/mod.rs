//! Upstream listing endpoints feeding the directory.

pub mod slack;

pub use slack::{AuthInfo, ConversationsSource, SlackClient, UsersSource};
