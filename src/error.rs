use crate::tokenizer::Token;
use log::debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IO(#[from] std::io::Error),
    #[error("lex error on line {line}: {message}")]
    Lex { message: String, line: usize },
    #[error("parse error on line {line}: {message}")]
    Parse { message: String, line: usize },
    #[error("runtime error on line {line}: {message}")]
    Runtime { message: String, line: usize },
}

impl Error {
    /// Source line the error was detected on, if it came from the language pipeline.
    pub fn line(&self) -> Option<usize> {
        match self {
            Error::Lex { line, .. } | Error::Parse { line, .. } | Error::Runtime { line, .. } => {
                Some(*line)
            }
            Error::IO(_) => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Error::Lex { message, .. }
            | Error::Parse { message, .. }
            | Error::Runtime { message, .. } => message.clone(),
            Error::IO(err) => err.to_string(),
        }
    }

    pub fn is_syntax(&self) -> bool {
        matches!(self, Error::Lex { .. } | Error::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn lex_error<T>(message: impl Into<String>, line: usize) -> Result<T> {
    let message = message.into();
    debug!("{} on line {}", message, line);
    Err(Error::Lex { message, line })
}

pub fn parser_error<T>(message: impl Into<String>, token: &Token) -> Result<T> {
    let message = format!("{}, found {}", message.into(), token.token_type.describe());
    debug!("{} on line {}", message, token.line);
    Err(Error::Parse {
        message,
        line: token.line,
    })
}

pub fn runtime_error<T>(message: impl Into<String>, line: usize) -> Result<T> {
    Err(Error::Runtime {
        message: message.into(),
        line,
    })
}
