use std::fmt;

/// Stable numeric classes reported alongside every settlement error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Missing or malformed request fields. Never retried.
    InputValidation,
    /// No stored swap under the requested id.
    NotFound,
    /// Funding does not cover the claim fee.
    InsufficientFunds,
    Internal,
    /// Capability that is known to be missing (refund path, refund address).
    Unsupported,
    /// Daemon or RPC collaborator failed, timed out or could not be reached.
    CollaboratorUnavailable,
}

impl ErrorClass {
    pub fn code(self) -> u16 {
        match self {
            ErrorClass::InputValidation => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::InsufficientFunds => 422,
            ErrorClass::Internal => 500,
            ErrorClass::Unsupported => 501,
            ErrorClass::CollaboratorUnavailable => 503,
        }
    }

    pub fn to_status(self, message: impl fmt::Display) -> tonic::Status {
        let message = format!("[{}] {message}", self.code());
        match self {
            ErrorClass::InputValidation => tonic::Status::invalid_argument(message),
            ErrorClass::NotFound => tonic::Status::not_found(message),
            ErrorClass::InsufficientFunds => tonic::Status::failed_precondition(message),
            ErrorClass::Internal => tonic::Status::internal(message),
            ErrorClass::Unsupported => tonic::Status::unimplemented(message),
            ErrorClass::CollaboratorUnavailable => tonic::Status::unavailable(message),
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
