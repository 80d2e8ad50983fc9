pub mod deployment;
pub mod provider;
pub mod record;
pub mod requests;
pub mod responses;
