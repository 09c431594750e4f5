pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod realtime;
pub mod reminders;
pub mod server;
