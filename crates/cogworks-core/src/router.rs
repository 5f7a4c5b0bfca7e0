use crate::platform::{ChannelMessage, UserId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandInvocation {
    pub name: String,
    pub args: String,
}

impl CommandInvocation {
    /// Splits the arguments into the first word and the remainder.
    pub fn subcommand(&self) -> (&str, &str) {
        let args = self.args.trim();
        match args.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (args, ""),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Command(CommandInvocation),
    Mention,
}

/// Decides what, if anything, an incoming message asks of the bot.
///
/// Bot-authored messages never trigger anything. A prefixed message is a
/// command even when it also mentions the bot.
pub fn handle_incoming(message: &ChannelMessage, bot_id: UserId, prefix: &str) -> Option<Action> {
    if message.author.bot || message.author.id == bot_id {
        return None;
    }

    let content = message.content.trim_start();
    if !prefix.is_empty() {
        if let Some(rest) = content.strip_prefix(prefix) {
            let rest = rest.trim();
            let (name, args) = match rest.split_once(char::is_whitespace) {
                Some((name, args)) => (name, args.trim()),
                None => (rest, ""),
            };
            if !name.is_empty() {
                return Some(Action::Command(CommandInvocation {
                    name: name.to_lowercase(),
                    args: args.to_string(),
                }));
            }
        }
    }

    if message.mentions_user(bot_id) {
        return Some(Action::Mention);
    }
    None
}
