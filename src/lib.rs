pub mod app;
pub mod auth;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod error;
pub mod jenkins;
pub mod performance;
pub mod projects;
pub mod secrets;
