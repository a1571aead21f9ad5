use crate::ast::Location;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompilerError {
    /// Lexical or structural error from the reader.
    #[error("{1}: {0}")]
    Parse(String, Location),

    /// A form with the wrong arity or argument kind.
    #[error("{1}: {0}")]
    Shape(String, Location),

    #[error("{1}: Unknown identifier '{0}'")]
    UnknownIdentifier(String, Location),

    #[error("{1}: {0}")]
    Type(String, Location),

    /// A value the target ISA cannot represent.
    #[error("{1}: {0}")]
    Capability(String, Location),

    /// A built-in received the wrong number of pending argument vectors.
    #[error("{0}: Invalid call nesting")]
    Nesting(Location),
}

pub type Result<T> = std::result::Result<T, CompilerError>;
