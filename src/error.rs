//! Error types that callers match on.
//!
//! Everything else propagates as `anyhow::Error` with context attached.

use thiserror::Error;

/// A chat command that could not be understood.
///
/// These are always answered in the conversation and never end the bot loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Wrong number of arguments for `!ecslist`
    #[error("invalid ecslist command, usage: !ecslist [cluster]")]
    ListUsage,

    /// Wrong number of arguments for `!ecssvcgraph`
    #[error("invalid ecssvcgraph command, usage: !ecssvcgraph <cluster> <service> <cpu|mem>")]
    GraphUsage,

    /// Metric token other than `cpu` or `mem`
    #[error("unknown metric: {0} (expected cpu or mem)")]
    UnknownMetric(String),
}

/// Failures talking to the chat service.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The chat API process could not be started
    #[error("failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Reading from or writing to the chat API process failed
    #[error("chat api I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The chat API process closed its output
    #[error("chat api closed its output stream")]
    Closed,

    /// A response could not be decoded
    #[error("failed to decode chat api response: {0}")]
    Decode(#[from] serde_json::Error),

    /// The chat API reported an error for a request
    #[error("chat api error: {0}")]
    Api(String),

    /// `next_message` was called before `subscribe`
    #[error("not subscribed to chat events")]
    NotSubscribed,
}

/// Markup that could not be compiled to terminal escapes.
#[derive(Debug, Error)]
pub enum MarkupError {
    /// Tag name not understood by the compiler
    #[error("unknown markup tag: {0}")]
    UnknownTag(String),

    /// Color argument that is neither a 0-255 index nor a color name
    #[error("invalid color in markup tag: {0}")]
    InvalidColor(String),

    /// Delimiters that cannot form a tag pattern
    #[error("invalid markup delimiters: {0}")]
    Delimiters(#[from] regex::Error),

    #[error("failed to write escape sequence")]
    Format(#[from] std::fmt::Error),

    /// Column alignment could not write its output
    #[error("failed to align columns: {0}")]
    Align(#[from] std::io::Error),
}
