//! Error types for the kcompat configuration pipeline.
//!
//! Every failure here is a build-configuration failure: it halts artifact
//! production and names the offending flag or symbol. Malformed
//! identification inputs are deliberately not represented - probing is
//! total and treats them as "no pin".

use crate::flags::FlagValue;
use thiserror::Error;

/// Comprehensive error type for all kcompat resolution operations.
#[derive(Debug, Error)]
pub enum ShimError {
    /// A capability flag was declared more than once in the table.
    #[error("capability flag '{flag}' declared more than once")]
    DuplicateFlag {
        flag: String,
    },

    /// A flag depends on a flag the table never declares.
    #[error("capability flag '{flag}' depends on undeclared flag '{dependency}'")]
    UnknownDependency {
        flag: String,
        dependency: String,
    },

    /// Flag dependencies form a cycle, so no resolution order exists.
    #[error("dependency cycle involving capability flag '{flag}'")]
    DependencyCycle {
        flag: String,
    },

    /// A declared flag has no pin, no override, and no default rule.
    #[error("capability flag '{flag}' has no pin, no override, and no default rule")]
    MissingDefault {
        flag: String,
    },

    /// Two pin rules in the same precedence tier disagree about one flag.
    #[error("conflicting pins for capability flag '{flag}': {first} vs {second}")]
    ConflictingPin {
        flag: String,
        first: FlagValue,
        second: FlagValue,
    },

    /// Two capability flags claim ownership of the same consumer symbol.
    #[error("symbol '{symbol}' claimed by both '{first}' and '{second}'")]
    DuplicateSymbol {
        symbol: String,
        first: String,
        second: String,
    },

    /// An override or catalog entry names a flag the table never declares.
    #[error("unknown capability flag '{flag}'")]
    UnknownFlag {
        flag: String,
    },

    /// An override string does not have the `FLAG=present|absent` shape.
    #[error("invalid override '{input}': expected FLAG=present or FLAG=absent")]
    InvalidOverride {
        input: String,
    },
}

/// Result type alias for kcompat resolution operations.
pub type Result<T> = std::result::Result<T, ShimError>;
