use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Frame buffer of {actual} bytes does not match {width}x{height} RGB ({expected} bytes)")]
    FrameGeometry {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),
}
