pub mod loader;
pub mod policy;
pub mod schema;

pub use loader::{apply_env_overrides, load_config, load_config_from_str, validate_config};
pub use policy::{PolicySummary, SyncPolicy};
pub use schema::{AgentConfig, GitIdentityConfig, IacConfig, SecretKeyConfig, WorkloadSelector};
