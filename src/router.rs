//! Command Router
//!
//! Turns the token list left after mention stripping into a command
//! invocation and holds the static command reference used by `help`.

/// Recognized commands
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandName {
    List,
    Status,
    Start,
    Stop,
    Help,
    /// Anything else, lower-cased
    Unknown(String),
}

impl CommandName {
    /// Normalize a raw token
    pub fn parse(token: &str) -> Self {
        match token.to_lowercase().as_str() {
            "list" => Self::List,
            "status" => Self::Status,
            "start" => Self::Start,
            "stop" => Self::Stop,
            "help" => Self::Help,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::List => "list",
            Self::Status => "status",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Help => "help",
            Self::Unknown(name) => name,
        }
    }
}

/// One line of the command reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
}

/// Every recognized command, in help order
pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "list",
        usage: "list",
        description: "Show every managed server and its current status",
    },
    CommandSpec {
        name: "status",
        usage: "status [server-id]",
        description: "Show the status of one server, or of all servers",
    },
    CommandSpec {
        name: "start",
        usage: "start <server-id>",
        description: "Start a server (no-op if it is already running)",
    },
    CommandSpec {
        name: "stop",
        usage: "stop <server-id>",
        description: "Stop a server (no-op if it is not running)",
    },
    CommandSpec {
        name: "help",
        usage: "help",
        description: "Show this command reference",
    },
];

/// A parsed command with its arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: CommandName,
    pub args: Vec<String>,
}

impl Invocation {
    /// Build from the stripped token list; `None` if there are no tokens
    pub fn from_tokens(tokens: &[String]) -> Option<Self> {
        let (first, rest) = tokens.split_first()?;
        Some(Self {
            command: CommandName::parse(first),
            args: rest.to_vec(),
        })
    }

    /// Lower-cased command name, the key used for permission lookup
    pub fn name(&self) -> &str {
        self.command.as_str()
    }

    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }
}

/// Render the command reference as plain text
pub fn help_text() -> String {
    let mut text = String::from("Available commands:\n");
    for spec in COMMANDS {
        text.push_str(&format!("• `{}`: {}\n", spec.usage, spec.description));
    }
    text.truncate(text.trim_end().len());
    text
}
