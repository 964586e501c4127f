pub mod callbacks;
pub mod client;
pub mod executor;
pub mod handle;
pub mod manager;
pub mod registry;
pub mod session;
pub mod template;
pub mod transport;

#[cfg(test)]
pub mod testing;
