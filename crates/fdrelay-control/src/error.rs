/// Errors raised while decoding control messages.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// A command without a descriptor was not valid UTF-8.
    #[error("control text is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

pub type Result<T> = std::result::Result<T, ControlError>;
