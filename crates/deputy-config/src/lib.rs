pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_workspace, save_config};
pub use schema::{
    AgentDefaults, Config, ExecToolConfig, ProviderConfig, ProvidersConfig, ToolsConfig,
};
