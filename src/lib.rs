pub mod camera;
pub mod config;
pub mod core;
pub mod orchestrator;
pub mod settings;
pub mod stream;
pub mod web;
