pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod mirror;
pub mod paths;
pub mod remote;
pub mod session;
pub mod state;
pub mod words;

#[cfg(test)]
pub mod testing;
