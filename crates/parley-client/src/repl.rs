//! Line commands understood by the interactive client

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Chat(String),
    Model(String),
    History(Option<usize>),
    Clear,
    Sessions,
    Switch(String),
    New(Option<String>),
    Delete(String),
    Upload(PathBuf),
    Help,
    Quit,
    /// Recognised command with bad arguments
    Usage(&'static str),
}

pub const HELP: &str = "\
/model <name>      switch model
/history [n]       show the last n messages
/clear             clear the current conversation
/sessions          list conversations
/switch <id>       switch conversation
/new [name]        start a conversation
/delete <id>       delete a conversation
/upload <path>     upload a file
/quit              exit
anything else is sent as a chat message";

/// Parse one input line; blank lines yield nothing
pub fn parse(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::Chat(line.to_string()));
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, rest.trim()),
        None => (line, ""),
    };
    let arg = (!arg.is_empty()).then(|| arg.to_string());

    let command = match name {
        "/model" => arg.map_or(Command::Usage("/model <name>"), Command::Model),
        "/history" => match arg {
            None => Command::History(None),
            Some(n) => n
                .parse()
                .map_or(Command::Usage("/history [n]"), |n| Command::History(Some(n))),
        },
        "/clear" => Command::Clear,
        "/sessions" => Command::Sessions,
        "/switch" => arg.map_or(Command::Usage("/switch <id>"), Command::Switch),
        "/new" => Command::New(arg),
        "/delete" => arg.map_or(Command::Usage("/delete <id>"), Command::Delete),
        "/upload" => arg.map_or(Command::Usage("/upload <path>"), |p| Command::Upload(PathBuf::from(p))),
        "/help" => Command::Help,
        "/quit" | "/exit" => Command::Quit,
        // Unknown slash commands go to the chat handler, e.g. /download
        _ => Command::Chat(line.to_string()),
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_chat() {
        assert_eq!(parse("  hello there "), Some(Command::Chat("hello there".into())));
        assert_eq!(parse("   "), None);
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(parse("/model echo-large"), Some(Command::Model("echo-large".into())));
        assert_eq!(parse("/history 5"), Some(Command::History(Some(5))));
        assert_eq!(parse("/history"), Some(Command::History(None)));
        assert_eq!(parse("/new work notes"), Some(Command::New(Some("work notes".into()))));
        assert_eq!(parse("/upload ./a b.txt"), Some(Command::Upload(PathBuf::from("./a b.txt"))));
    }

    #[test]
    fn test_missing_arguments_show_usage() {
        assert_eq!(parse("/model"), Some(Command::Usage("/model <name>")));
        assert_eq!(parse("/history lots"), Some(Command::Usage("/history [n]")));
        assert_eq!(parse("/delete"), Some(Command::Usage("/delete <id>")));
    }

    #[test]
    fn test_unknown_command_goes_to_chat() {
        assert_eq!(parse("/download a.txt"), Some(Command::Chat("/download a.txt".into())));
    }
}
