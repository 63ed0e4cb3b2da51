use thiserror::Error;

pub type QualityResult<T> = Result<T, QualityError>;

#[derive(Error, Debug)]
pub enum QualityError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown funnel type: {0}")]
    UnknownFunnelType(String),

    #[error("Unknown funnel stage: {0}")]
    UnknownStage(String),

    #[error("Unknown milestone: {0}")]
    UnknownMilestone(String),

    #[error("Unknown criteria operator: {0}")]
    UnknownOperator(String),

    #[error("Invalid badge catalogue: {0}")]
    Catalogue(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl QualityError {
    /// True for errors caused by the caller or by configuration, as opposed
    /// to a failing storage collaborator.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            QualityError::UnknownFunnelType(_)
                | QualityError::UnknownStage(_)
                | QualityError::UnknownMilestone(_)
                | QualityError::UnknownOperator(_)
                | QualityError::Catalogue(_)
                | QualityError::Validation(_)
        )
    }
}
