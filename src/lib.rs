pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod lifecycle;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
