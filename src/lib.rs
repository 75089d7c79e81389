pub mod config;
pub mod models;

pub mod actions;
pub mod analytics;
pub mod cost;
pub mod events;
pub mod orchestrator;
pub mod services;

pub mod web;
