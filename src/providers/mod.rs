pub mod openai;
pub mod poe;
pub mod streaming;

pub use poe::PoeClient;
pub use streaming::{BotClient, FragmentStream, StreamFragment, UpstreamCallSpec};
