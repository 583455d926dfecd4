pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod player;
pub mod stream;


pub use config::PlayerConfig;
pub use error::*;
pub use events::{EventBus, PlayerEvent};
pub use logging::StreamLogger;
pub use models::*;
pub use player::ChunkedPlayer;
