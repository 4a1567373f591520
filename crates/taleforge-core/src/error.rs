use thiserror::Error;

/// Top-level error type shared by the gateway binary and its startup path.
/// Per-crate errors (parser, pipeline, agent) stay local to their crate and
/// convert into this one only at the boundary that needs to report them.
#[derive(Debug, Error)]
pub enum TaleforgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("campaign '{campaign_id}' not found")]
    CampaignNotFound { campaign_id: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, TaleforgeError>;
