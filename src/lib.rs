pub mod app;
pub mod auth;
pub mod billing;
pub mod campaign;
pub mod classifier;
pub mod config;
pub mod handler;
pub mod models;
pub mod provider;
pub mod version;
pub mod webhook;

#[cfg(test)]
mod testutil;
