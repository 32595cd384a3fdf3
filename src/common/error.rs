use rust_tokenizers::error::TokenizerError;
use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MatchLstmError {
    #[error("Endpoint not available error: {0}")]
    FileDownloadError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Value error: {0}")]
    ValueError(String),
}

#[cfg(feature = "remote")]
impl From<cached_path::Error> for MatchLstmError {
    fn from(error: cached_path::Error) -> Self {
        MatchLstmError::FileDownloadError(error.to_string())
    }
}

impl From<std::io::Error> for MatchLstmError {
    fn from(error: std::io::Error) -> Self {
        MatchLstmError::IOError(error.to_string())
    }
}

impl From<TokenizerError> for MatchLstmError {
    fn from(error: TokenizerError) -> Self {
        MatchLstmError::TokenizerError(error.to_string())
    }
}

impl From<TchError> for MatchLstmError {
    fn from(error: TchError) -> Self {
        MatchLstmError::TchError(error.to_string())
    }
}

impl From<serde_json::Error> for MatchLstmError {
    fn from(error: serde_json::Error) -> Self {
        MatchLstmError::InvalidConfigurationError(error.to_string())
    }
}
