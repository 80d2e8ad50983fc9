pub mod config_store;
pub mod connection;
pub mod provider_selector;
pub mod schema_verifier;
