//! Core tasklet library (config, logging, auth session, list items).

pub mod auth;
pub mod config;
pub mod items;
pub mod logging;
