//! Waitline HTTP service: router and configuration

pub mod api;
pub mod config;
