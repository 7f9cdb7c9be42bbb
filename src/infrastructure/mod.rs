pub mod api_client;
pub mod auth_client;
pub mod config;
pub mod error;
pub mod state_store;
pub mod storage;
pub mod token_store;
