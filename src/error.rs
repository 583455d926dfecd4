use thiserror::Error;

/// Main player error type
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Chunk error: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PlayerError {
    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PlayerError::Audio(err) => err.user_message(),
            PlayerError::Decode(err) => err.user_message(),
            PlayerError::Network(err) => err.user_message(),
            PlayerError::Chunk(err) => err.user_message(),
            PlayerError::Config(err) => err.user_message(),
        }
    }

    /// Whether the caller can retry the failed operation
    pub fn is_recoverable(&self) -> bool {
        match self {
            PlayerError::Audio(err) => err.is_recoverable(),
            PlayerError::Decode(_) => false,
            PlayerError::Network(_) => true,
            PlayerError::Chunk(err) => err.is_recoverable(),
            PlayerError::Config(_) => true,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PlayerError::Audio(AudioError::InitializationFailed(_)) => ErrorSeverity::Critical,
            PlayerError::Audio(AudioError::Closed) => ErrorSeverity::Critical,
            PlayerError::Audio(AudioError::PlaybackBlocked(_)) => ErrorSeverity::Warning,
            PlayerError::Audio(_) => ErrorSeverity::Error,
            PlayerError::Decode(_) => ErrorSeverity::Error,
            PlayerError::Network(_) => ErrorSeverity::Error,
            PlayerError::Chunk(ChunkError::Superseded { .. }) => ErrorSeverity::Info,
            PlayerError::Chunk(_) => ErrorSeverity::Warning,
            PlayerError::Config(_) => ErrorSeverity::Warning,
        }
    }
}

/// Error severity levels for logging and user feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Info => "INFO",
            ErrorSeverity::Warning => "WARNING",
            ErrorSeverity::Error => "ERROR",
            ErrorSeverity::Critical => "CRITICAL",
        }
    }

    pub fn log_level(&self) -> log::Level {
        match self {
            ErrorSeverity::Info => log::Level::Info,
            ErrorSeverity::Warning => log::Level::Warn,
            ErrorSeverity::Error => log::Level::Error,
            ErrorSeverity::Critical => log::Level::Error,
        }
    }
}

/// Audio output errors
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Playback blocked: {0}")]
    PlaybackBlocked(String),

    #[error("Audio output is closed")]
    Closed,

    #[error("No track loaded")]
    NoTrack,
}

impl AudioError {
    pub fn user_message(&self) -> String {
        match self {
            AudioError::InitializationFailed(msg) => {
                format!("Failed to initialize audio output: {}", msg)
            }
            AudioError::DeviceNotFound { device } => {
                format!("Audio device '{}' is not available", device)
            }
            AudioError::StreamError(msg) => format!("Audio playback interrupted: {}", msg),
            AudioError::PlaybackBlocked(msg) => {
                format!("Playback could not start ({}); try again after interacting with the player", msg)
            }
            AudioError::Closed => "The player has been closed and must be recreated".to_string(),
            AudioError::NoTrack => "Load a track before starting playback".to_string(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        match self {
            AudioError::InitializationFailed(_) => false, // Player must be reconstructed
            AudioError::DeviceNotFound { .. } => false,
            AudioError::StreamError(_) => true,
            AudioError::PlaybackBlocked(_) => true, // Retry after user interaction
            AudioError::Closed => false,
            AudioError::NoTrack => true,
        }
    }
}

/// Audio decoding errors
#[derive(Debug, Clone, Error)]
pub enum DecodeError {
    #[error("Unsupported format: {format}")]
    UnsupportedFormat { format: String },

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Payload contained no audio frames")]
    Empty,
}

impl DecodeError {
    pub fn user_message(&self) -> String {
        match self {
            DecodeError::UnsupportedFormat { format } => {
                format!("Audio format '{}' is not supported", format)
            }
            DecodeError::DecodeFailed(msg) => format!("Failed to decode audio data: {}", msg),
            DecodeError::Empty => "Received audio data contained no playable samples".to_string(),
        }
    }
}

/// Network errors raised by byte sources
#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("HTTP {status}")]
    HttpStatus { status: u16 },

    #[error("Range not satisfiable")]
    RangeNotSatisfiable,

    #[error("Server ignored range request")]
    RangeIgnored,

    #[error("Empty response body")]
    EmptyBody,
}

impl NetworkError {
    pub fn user_message(&self) -> String {
        match self {
            NetworkError::RequestFailed(msg) => format!("Could not reach the audio source: {}", msg),
            NetworkError::HttpStatus { status } => {
                format!("The audio source answered with HTTP status {}", status)
            }
            NetworkError::RangeNotSatisfiable | NetworkError::RangeIgnored => {
                "The audio source does not support partial downloads".to_string()
            }
            NetworkError::EmptyBody => "The audio source returned no data".to_string(),
        }
    }
}

/// Per-chunk load failures. Cloneable so one result can reach every waiter.
#[derive(Debug, Clone, Error)]
pub enum ChunkError {
    #[error("Chunk {index} failed: {reason}")]
    LoadFailed { index: usize, reason: String },

    #[error("Chunk {index} is outside the track ({total} chunks)")]
    OutOfRange { index: usize, total: usize },

    #[error("Chunk {index} was superseded before it resolved")]
    Superseded { index: usize },

    #[error("No track loaded")]
    NoTrack,
}

impl ChunkError {
    pub fn index(&self) -> Option<usize> {
        match self {
            ChunkError::LoadFailed { index, .. }
            | ChunkError::OutOfRange { index, .. }
            | ChunkError::Superseded { index } => Some(*index),
            ChunkError::NoTrack => None,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ChunkError::LoadFailed { index, .. } => {
                format!("Part {} of the track could not be loaded; it will be retried", index + 1)
            }
            ChunkError::OutOfRange { .. } => "Requested position is past the end of the track".to_string(),
            ChunkError::Superseded { .. } => "Loading was cancelled by a newer request".to_string(),
            ChunkError::NoTrack => "Load a track first".to_string(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, ChunkError::LoadFailed { .. } | ChunkError::Superseded { .. })
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found")]
    ConfigDirNotFound,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] toml::ser::Error),

    #[error("Deserialization error: {0}")]
    DeserializationError(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            ConfigError::ConfigDirNotFound => {
                "Cannot find or create configuration directory".to_string()
            }
            ConfigError::IoError(err) => format!("Cannot access configuration file: {}", err),
            ConfigError::SerializationError(_) => "Failed to save configuration settings".to_string(),
            ConfigError::DeserializationError(_) => {
                "Configuration file is corrupted or has invalid format".to_string()
            }
            ConfigError::Invalid { field, reason } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_error_index() {
        let err = ChunkError::LoadFailed { index: 4, reason: "HTTP 500".to_string() };
        assert_eq!(err.index(), Some(4));
        assert!(err.is_recoverable());
        assert_eq!(ChunkError::NoTrack.index(), None);
        assert!(!ChunkError::OutOfRange { index: 9, total: 3 }.is_recoverable());
    }

    #[test]
    fn test_severity_mapping() {
        let init = PlayerError::Audio(AudioError::InitializationFailed("no device".into()));
        assert_eq!(init.severity(), ErrorSeverity::Critical);
        assert!(!init.is_recoverable());

        let blocked = PlayerError::Audio(AudioError::PlaybackBlocked("autoplay".into()));
        assert_eq!(blocked.severity(), ErrorSeverity::Warning);
        assert!(blocked.is_recoverable());

        let net = PlayerError::from(NetworkError::HttpStatus { status: 404 });
        assert_eq!(net.severity().log_level(), log::Level::Error);
        assert!(net.user_message().contains("404"));
    }

    #[test]
    fn test_error_display() {
        let err = ChunkError::OutOfRange { index: 7, total: 4 };
        assert_eq!(err.to_string(), "Chunk 7 is outside the track (4 chunks)");

        let err = PlayerError::from(DecodeError::Empty);
        assert!(err.to_string().starts_with("Decode error"));
    }
}
