//! Command parsing: prefix, name, arguments.

/// A parsed command line. Lives only for one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Lower-cased command name (may be empty for a bare prefix).
    pub name: String,
    pub args: Vec<String>,
}

impl Invocation {
    /// Parse `text` if it starts with `prefix`: strip it, trim, split on runs of whitespace.
    pub fn parse(text: &str, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return None;
        }
        let rest = text.strip_prefix(prefix)?;
        let mut tokens = rest.split_whitespace();
        let name = tokens.next().unwrap_or("").to_lowercase();
        Some(Self {
            name,
            args: tokens.map(str::to_string).collect(),
        })
    }
}

/// Commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping,
    Alive,
    Menu,
    Open,
    Close,
    Group,
    TagAll,
    Kick,
    Promote,
    Demote,
    Vcf,
    AddAll,
}

impl Command {
    /// Menu order.
    pub const ALL: [Command; 12] = [
        Command::Open,
        Command::Close,
        Command::Group,
        Command::TagAll,
        Command::Kick,
        Command::Promote,
        Command::Demote,
        Command::Vcf,
        Command::AddAll,
        Command::Ping,
        Command::Alive,
        Command::Menu,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::Ping => "ping",
            Command::Alive => "alive",
            Command::Menu => "menu",
            Command::Open => "open",
            Command::Close => "close",
            Command::Group => "group",
            Command::TagAll => "tagall",
            Command::Kick => "kick",
            Command::Promote => "promote",
            Command::Demote => "demote",
            Command::Vcf => "vcf",
            Command::AddAll => "addall",
        }
    }

    /// Look up a lower-cased command name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Must be sent in a group.
    pub fn requires_group(self) -> bool {
        !matches!(self, Command::Ping | Command::Alive | Command::Menu)
    }

    /// Sender must be a group admin.
    pub fn requires_admin(self) -> bool {
        self.requires_group() && self != Command::Group
    }
}
