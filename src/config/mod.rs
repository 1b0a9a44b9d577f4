pub mod settings;

pub use settings::{AgentConfig, BridgeCredential, PoeConfig, ServerConfig, Settings};
