//! Delivery of rendered documents to the backend

pub mod auth;
pub mod client;
pub mod echo;

pub use auth::TokenManager;
pub use client::BackendClient;
