//! Interactive menu commands

use std::str::FromStr;

use rv_core::error::CommandError;

/// A parsed line of operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuCommand {
    /// Blank line; just prompt again
    Empty,
    ListSessions,
    /// Open the session at this 1-based position
    OpenSession(usize),
    Reposition,
    RestartAudio,
    UploadLog,
    ListTunnels,
    /// Close the tunnel on this local port
    CloseTunnel(u16),
    CheckVersion,
    Quit,
}

impl FromStr for MenuCommand {
    type Err = CommandError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let cmd = input.trim().to_lowercase();

        let parsed = match cmd.as_str() {
            "" => MenuCommand::Empty,
            "l" => MenuCommand::ListSessions,
            "w" => MenuCommand::Reposition,
            "s" => MenuCommand::RestartAudio,
            "u" => MenuCommand::UploadLog,
            "t" => MenuCommand::ListTunnels,
            "v" => MenuCommand::CheckVersion,
            "q" => MenuCommand::Quit,
            other => {
                if let Some(port) = other.strip_prefix("c ") {
                    let port = port
                        .trim()
                        .parse::<u16>()
                        .map_err(|_| CommandError::Unrecognized(input.trim().to_string()))?;
                    MenuCommand::CloseTunnel(port)
                } else if other.chars().all(|c| c.is_ascii_digit()) {
                    let index = other
                        .parse::<usize>()
                        .map_err(|_| CommandError::UnknownDesktop(input.trim().to_string()))?;
                    MenuCommand::OpenSession(index)
                } else {
                    return Err(CommandError::Unrecognized(input.trim().to_string()));
                }
            }
        };
        Ok(parsed)
    }
}

const LINE_LENGTH: usize = 52;

/// The boxed menu printed before each prompt
pub fn render_menu(version: &str) -> String {
    let entries = [
        "l               List sessions available",
        "[desktop num]   Open VNC session by number",
        "w               Position VNC windows",
        "s               Soundplayer restart",
        "u               Upload log to server",
        "t               List local ports in use",
        "c [port]        Close ssh tunnel on local port",
        "v               Check if software is up to date",
        "q               Quit (or Control-C)",
    ];

    let border = "-".repeat(LINE_LENGTH);
    let mut menu = String::new();
    menu.push('\n');
    menu.push_str(&border);
    menu.push('\n');
    let title = format!("MENU (rovnc v{})", version);
    menu.push_str(&format!("| {:<width$}|\n", title, width = LINE_LENGTH - 3));
    menu.push_str(&format!("|{}|\n", "-".repeat(LINE_LENGTH - 2)));
    for entry in entries {
        menu.push_str(&format!("| {:<width$}|\n", entry, width = LINE_LENGTH - 3));
    }
    menu.push_str(&border);
    menu.push('\n');
    menu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("".parse(), Ok(MenuCommand::Empty));
        assert_eq!("  ".parse(), Ok(MenuCommand::Empty));
        assert_eq!("l".parse(), Ok(MenuCommand::ListSessions));
        assert_eq!("T".parse(), Ok(MenuCommand::ListTunnels));
        assert_eq!("q\n".parse(), Ok(MenuCommand::Quit));
        assert_eq!("3".parse(), Ok(MenuCommand::OpenSession(3)));
        assert_eq!("c 5901".parse(), Ok(MenuCommand::CloseTunnel(5901)));
        assert_eq!("C  5902 ".parse(), Ok(MenuCommand::CloseTunnel(5902)));
    }

    #[test]
    fn test_unrecognized_input() {
        assert_eq!(
            "x".parse::<MenuCommand>(),
            Err(CommandError::Unrecognized("x".to_string()))
        );
        assert!("c".parse::<MenuCommand>().is_err());
        assert!("c port".parse::<MenuCommand>().is_err());
        assert!("c 70000".parse::<MenuCommand>().is_err());
        assert!("quit".parse::<MenuCommand>().is_err());
    }

    #[test]
    fn test_menu_box() {
        let menu = render_menu("0.9.2");
        assert!(menu.contains("MENU (rovnc v0.9.2)"));
        assert!(menu.contains("c [port]"));
        for line in menu.lines().filter(|l| l.starts_with('|')) {
            assert_eq!(line.chars().count(), LINE_LENGTH);
        }
    }
}
