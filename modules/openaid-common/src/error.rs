use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenAidError {
    /// Record-level: required canonical fields absent after mapping.
    /// Lists every missing field, not just the first.
    #[error("missing required fields from {source_name}: {}", fields.join(", "))]
    MissingRequiredFields { source_name: String, fields: Vec<String> },

    /// Record-level: no category mapping resolved, including the wildcard.
    #[error("unknown category {raw:?} from {source_name}")]
    UnknownCategory { source_name: String, raw: String },

    #[error("normalization error: {0}")]
    Normalization(String),

    /// Record-level and non-fatal: the record proceeds without coordinates.
    #[error("geocoding error: {0}")]
    Geocoding(String),

    /// Check-level: degrades the verification score rather than aborting.
    #[error("external service error: {0}")]
    ExternalService(String),

    /// Batch-level and fatal to the containing job.
    #[error("batch submission error: {0}")]
    BatchSubmission(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
