use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("capture error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported link type {0}")]
    UnsupportedLinktype(i32),

    #[error("capture thread panicked")]
    CaptureThread,

    #[error("config error: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ProfileError>;
