use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("no response generated")]
    EmptyResponse,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The model backend is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    /// Stable machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "bad_request",
            Self::ServiceUnavailable { .. } => "service_unavailable",
            Self::Internal { .. } => "internal",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let correlation_id = "unassigned".to_owned();
        match value {
            ApplicationError::InvalidRequest(message) => Self::BadRequest { message, correlation_id },
            ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id }
            }
            ApplicationError::EmptyResponse => {
                Self::Internal { message: "no response generated".to_owned(), correlation_id }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, InterfaceError};

    #[test]
    fn invalid_request_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::InvalidRequest("expected a JSON object".to_owned())
            .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
        assert_eq!(interface.code(), "bad_request");
        assert_eq!(interface.message(), "expected a JSON object");
    }

    #[test]
    fn bad_request_has_user_safe_message() {
        let interface =
            ApplicationError::InvalidRequest("trailing characters".to_owned()).into_interface("req-2");

        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
        assert_eq!(interface.correlation_id(), "req-2");
    }

    #[test]
    fn integration_error_maps_to_service_unavailable() {
        let interface =
            ApplicationError::Integration("upstream refused connection".to_owned())
                .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.code(), "service_unavailable");
    }

    #[test]
    fn empty_response_maps_to_internal() {
        let interface = ApplicationError::EmptyResponse.into_interface("req-4");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.code(), "internal");
        assert_eq!(interface.message(), "no response generated");
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }
}
