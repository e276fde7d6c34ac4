use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("unsupported content type `{value}`")]
    UnsupportedContentType { value: String },
    #[error("unsupported content encoding `{value}`")]
    UnsupportedEncoding { value: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unsupported_content_type(value: impl Into<String>) -> Self {
        Self::UnsupportedContentType {
            value: value.into(),
        }
    }

    pub fn unsupported_encoding(value: impl Into<String>) -> Self {
        Self::UnsupportedEncoding {
            value: value.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}
