use std::fmt::{self, Display};

/// Errors produced by model constructors and validation routines.
#[derive(Debug)]
pub enum ModelError {
    InvalidPhoneNumber(String),
    InvalidCallingWindow(String),
}

impl Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelError::InvalidPhoneNumber(msg) => {
                write!(f, "invalid phone number: {msg}")
            }
            ModelError::InvalidCallingWindow(msg) => {
                write!(f, "invalid calling window: {msg}")
            }
        }
    }
}

impl std::error::Error for ModelError {}

pub type Result<T> = std::result::Result<T, ModelError>;
