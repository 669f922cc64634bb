//! Account Server
//!
//! Local and Google accounts, cookie sessions and a friend graph behind an
//! axum HTTP API.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod social;
