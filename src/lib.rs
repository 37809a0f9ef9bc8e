//! Tickline - authoritative fixed-tick simulation with client-side
//! prediction, reconciliation and lag-compensated hit validation

pub mod app;
pub mod config;
pub mod game;
pub mod http;
pub mod util;
pub mod ws;
