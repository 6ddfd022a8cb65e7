//! Hidden credential prompts

use std::io::{self, IsTerminal, Write};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;

/// Prompt until a non-empty secret is entered.
///
/// Input is not echoed when stdin is a terminal. End of input is an error.
pub fn prompt_password(prompt: &str) -> io::Result<String> {
    loop {
        let value = read_hidden(prompt)?;
        let value = value.trim();
        if !value.is_empty() {
            return Ok(value.to_string());
        }
    }
}

fn read_hidden(prompt: &str) -> io::Result<String> {
    let mut stdout = io::stdout();
    write!(stdout, "{}", prompt)?;
    stdout.flush()?;

    let stdin = io::stdin();
    if !stdin.is_terminal() {
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no input"));
        }
        return Ok(line);
    }

    terminal::enable_raw_mode()?;
    let result = read_raw_line();
    terminal::disable_raw_mode()?;
    writeln!(stdout)?;
    result
}

fn read_raw_line() -> io::Result<String> {
    let mut buffer = String::new();
    loop {
        let Event::Key(KeyEvent {
            code,
            modifiers,
            kind,
            ..
        }) = event::read()?
        else {
            continue;
        };
        if kind == KeyEventKind::Release {
            continue;
        }
        match code {
            KeyCode::Enter => return Ok(buffer),
            KeyCode::Backspace => {
                buffer.pop();
            }
            KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => {
                return Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted"));
            }
            KeyCode::Char(c) => buffer.push(c),
            _ => {}
        }
    }
}
