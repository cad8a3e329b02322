//! Command and reply types

use bytes::Bytes;
use std::fmt;
use uuid::Uuid;

use crate::ProtocolError;

/// Opaque numeric identity of the chat user that sent a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallerId(pub i64);

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Commands understood by the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Power the host off immediately
    Shutdown,
    /// Power the host off after a delay in seconds
    ShutdownIn,
    /// Cancel a pending delayed shutdown
    CancelShutdown,
    /// Reboot the host
    Restart,
    /// Lock the interactive session
    Lock,
    /// Report uptime, load, memory and battery
    Status,
    /// Capture the screen
    Screenshot,
    /// Report the account the agent runs as
    Whoami,
    /// Speak a message through text-to-speech
    Say,
    /// Capture a frame from a camera
    Camera,
    /// Stop the agent itself
    ShutdownBot,
}

impl CommandKind {
    /// Every command, in the order they are listed to users
    pub const ALL: [CommandKind; 11] = [
        CommandKind::Shutdown,
        CommandKind::ShutdownIn,
        CommandKind::CancelShutdown,
        CommandKind::Restart,
        CommandKind::Lock,
        CommandKind::Status,
        CommandKind::Screenshot,
        CommandKind::Whoami,
        CommandKind::Say,
        CommandKind::Camera,
        CommandKind::ShutdownBot,
    ];

    /// Chat name of the command, without the leading slash
    pub fn name(self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::ShutdownIn => "shutdown_in",
            Self::CancelShutdown => "cancel_shutdown",
            Self::Restart => "restart",
            Self::Lock => "lock",
            Self::Status => "status",
            Self::Screenshot => "screenshot",
            Self::Whoami => "whoami",
            Self::Say => "say",
            Self::Camera => "camera",
            Self::ShutdownBot => "shutdown_bot",
        }
    }

    /// Look a command up by its chat name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    /// Whether the command needs the interactive display/session context
    pub fn is_session_bound(self) -> bool {
        matches!(self, Self::Lock | Self::Screenshot | Self::Say)
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.name())
    }
}

/// A command received from the chat transport
///
/// Immutable once parsed; consumed by the dispatcher and dropped after the
/// reply has been sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Correlation ID used in logs
    id: Uuid,
    /// Which command was issued
    kind: CommandKind,
    /// Whitespace-separated arguments after the command name
    args: Vec<String>,
    /// Who sent it
    caller: CallerId,
}

impl Command {
    /// Build a command directly
    pub fn new(kind: CommandKind, args: Vec<String>, caller: CallerId) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            args,
            caller,
        }
    }

    /// Parse `/<command>[@botname] [arg]*` chat text
    pub fn parse(text: &str, caller: CallerId) -> Result<Self, ProtocolError> {
        let text = text.trim();
        let rest = text.strip_prefix('/').ok_or(ProtocolError::NotACommand)?;

        let mut tokens = rest.split_whitespace();
        let head = tokens.next().ok_or(ProtocolError::NotACommand)?;

        // Group chats address commands as /cmd@botname
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();
        if name.is_empty() {
            return Err(ProtocolError::NotACommand);
        }

        let kind = CommandKind::from_name(&name)
            .ok_or(ProtocolError::UnknownCommand(name))?;

        Ok(Self::new(kind, tokens.map(str::to_string).collect(), caller))
    }

    /// Correlation ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Command kind
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Arguments in order
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Arguments joined back with single spaces
    pub fn joined_args(&self) -> String {
        self.args.join(" ")
    }

    /// Originating caller
    pub fn caller(&self) -> CallerId {
        self.caller
    }
}

/// A reply delivered back to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Plain text message
    Text(String),
    /// Image attachment with caption
    Photo {
        /// Encoded image bytes (PNG or JPEG)
        bytes: Bytes,
        /// Caption shown under the image
        caption: String,
    },
}

impl Reply {
    /// Create a text reply
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Create a photo reply
    pub fn photo(bytes: Bytes, caption: impl Into<String>) -> Self {
        Self::Photo {
            bytes,
            caption: caption.into(),
        }
    }

    /// Text content, or the caption for photos
    pub fn as_text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Photo { caption, .. } => caption,
        }
    }

    /// Whether the reply carries an attachment
    pub fn is_photo(&self) -> bool {
        matches!(self, Self::Photo { .. })
    }
}
