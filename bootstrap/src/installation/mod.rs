// Installation logic
//
// Everything that changes the deployment on disk: the initialization marker, the generated env
// file, the cross-process lock and the orchestrator that sequences them.
//
// IMPORTANT:
// - Never log secrets (passwords, unmasked connection strings).
// - Files are replaced atomically; existing env files are backed up before being touched.

pub mod env_file;
pub mod files;
pub mod lock;
pub mod orchestrator;
pub mod state_store;

pub use orchestrator::{InitPhase, Orchestrator, ProvisionOutcome};
pub use state_store::StateStore;
