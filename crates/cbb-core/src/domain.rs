use std::fmt;

/// Telegram user id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UserId(pub i64);

/// Where a line of output should be delivered.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatTarget {
    /// Numeric chat id (private chats, groups, channels).
    Id(i64),
    /// Public channel/group username, stored with its leading `@`.
    Username(String),
}

impl ChatTarget {
    /// Resolve a configured channel name into a target.
    ///
    /// A numeric name is a chat id. Anything else is treated as a channel
    /// username; IRC/Slack style `#general` becomes `@general`.
    pub fn resolve(name: &str) -> Self {
        let name = name.trim();
        if let Ok(id) = name.parse::<i64>() {
            return ChatTarget::Id(id);
        }
        let bare = name.trim_start_matches(['#', '@']);
        ChatTarget::Username(format!("@{bare}"))
    }
}

impl fmt::Display for ChatTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatTarget::Id(id) => write!(f, "{id}"),
            ChatTarget::Username(name) => f.write_str(name),
        }
    }
}
