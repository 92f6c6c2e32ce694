use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Student not found: {0}")]
    StudentNotFound(String),

    #[error("Bus not found: {0}")]
    BusNotFound(String),

    #[error("Queue entry not found: {0}")]
    QueueEntryNotFound(String),

    #[error("Queue entry {0} cannot move from {1} to {2}")]
    InvalidQueueTransition(String, String, String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid document {0}: {1}")]
    InvalidDocument(String, String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::UserNotFound(_)
                | DomainError::StudentNotFound(_)
                | DomainError::BusNotFound(_)
                | DomainError::QueueEntryNotFound(_)
        )
    }
}
