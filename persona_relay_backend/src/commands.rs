//! Text commands understood by the bot.

use crate::turn::ChannelId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SetCharacter { name: String, description: String },
    AllowChannel { channel: ChannelId },
    RemoveChannel { channel: ChannelId },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetCharacter { .. } => "setcharacter",
            Command::AllowChannel { .. } => "allowchannel",
            Command::RemoveChannel { .. } => "removechannel",
        }
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::AllowChannel { .. } | Command::RemoveChannel { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Command(Command),
    /// A known command word with missing or unusable arguments.
    Usage(&'static str),
    NotACommand,
}

const SETCHARACTER_USAGE: &str = "Usage: setcharacter <name> <description...>";
const ALLOWCHANNEL_USAGE: &str = "Usage: allowchannel <#channel>";
const REMOVECHANNEL_USAGE: &str = "Usage: removechannel <#channel>";

/// Parse the text that follows the command prefix or bot mention.
pub fn parse_command(input: &str) -> ParsedCommand {
    let input = input.trim_start();
    let (word, rest) = match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (input, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "setcharacter" => {
            let Some((name, description)) = rest.split_once(char::is_whitespace) else {
                return ParsedCommand::Usage(SETCHARACTER_USAGE);
            };
            let description = description.trim();
            if description.is_empty() {
                return ParsedCommand::Usage(SETCHARACTER_USAGE);
            }
            ParsedCommand::Command(Command::SetCharacter {
                name: name.to_string(),
                description: description.to_string(),
            })
        }
        "allowchannel" => match parse_channel_ref(rest) {
            Some(channel) => ParsedCommand::Command(Command::AllowChannel { channel }),
            None => ParsedCommand::Usage(ALLOWCHANNEL_USAGE),
        },
        "removechannel" => match parse_channel_ref(rest) {
            Some(channel) => ParsedCommand::Command(Command::RemoveChannel { channel }),
            None => ParsedCommand::Usage(REMOVECHANNEL_USAGE),
        },
        _ => ParsedCommand::NotACommand,
    }
}

/// Accepts `<#123>` channel markup or a bare numeric id.
pub fn parse_channel_ref(arg: &str) -> Option<ChannelId> {
    let arg = arg.split_whitespace().next()?;
    let id = arg
        .strip_prefix("<#")
        .and_then(|s| s.strip_suffix('>'))
        .unwrap_or(arg);

    if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) {
        Some(ChannelId::new(id))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_setcharacter_with_multiword_description() {
        assert_eq!(
            parse_command("setcharacter Brit  A rival robot who hates Jenny "),
            ParsedCommand::Command(Command::SetCharacter {
                name: "Brit".to_string(),
                description: "A rival robot who hates Jenny".to_string(),
            })
        );
    }

    #[test]
    fn test_setcharacter_without_description_needs_usage() {
        assert_eq!(
            parse_command("setcharacter Brit"),
            ParsedCommand::Usage(SETCHARACTER_USAGE)
        );
        assert_eq!(
            parse_command("setcharacter"),
            ParsedCommand::Usage(SETCHARACTER_USAGE)
        );
    }

    #[test]
    fn test_parses_channel_commands() {
        assert_eq!(
            parse_command("allowchannel <#1234>"),
            ParsedCommand::Command(Command::AllowChannel {
                channel: ChannelId::new("1234")
            })
        );
        assert_eq!(
            parse_command("RemoveChannel 99"),
            ParsedCommand::Command(Command::RemoveChannel {
                channel: ChannelId::new("99")
            })
        );
        assert_eq!(
            parse_command("allowchannel general"),
            ParsedCommand::Usage(ALLOWCHANNEL_USAGE)
        );
    }

    #[test]
    fn test_other_text_is_not_a_command() {
        assert_eq!(parse_command("hello there"), ParsedCommand::NotACommand);
        assert_eq!(parse_command(""), ParsedCommand::NotACommand);
    }

    #[test]
    fn test_only_channel_commands_need_admin() {
        assert!(!Command::SetCharacter {
            name: "a".into(),
            description: "b".into()
        }
        .requires_admin());
        assert!(Command::AllowChannel {
            channel: ChannelId::new("1")
        }
        .requires_admin());
    }
}
