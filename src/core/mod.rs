pub mod builtin_providers;
pub mod config;
pub mod conversation;
pub mod history;
pub mod interaction;
pub mod message;
pub mod provider;
