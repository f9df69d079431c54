use checkface_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("identity {name}_{user_id} is already enrolled")]
    DuplicateIdentity { name: String, user_id: i64 },
    #[error("no record for {0}")]
    RecordNotFound(String),
    #[error("no face detected")]
    DetectionFailure,
    #[error("matcher failure: {0}")]
    Matcher(String),
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

/// Coarse classification used by front ends to pick a presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    DuplicateIdentity,
    RecordNotFound,
    DetectionFailure,
    MatcherFailure,
    StorageIoFailure,
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::DuplicateIdentity { .. } => ErrorKind::DuplicateIdentity,
            Self::RecordNotFound(_) => ErrorKind::RecordNotFound,
            Self::DetectionFailure => ErrorKind::DetectionFailure,
            Self::Matcher(_) => ErrorKind::MatcherFailure,
            Self::Storage(_) => ErrorKind::StorageIoFailure,
        }
    }

    /// True for rejections that left no partial effect and should be shown
    /// as a warning rather than an error.
    pub fn is_warning(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::DuplicateIdentity | ErrorKind::RecordNotFound
        )
    }
}
