//! Line-oriented command loop
//!
//! Each input line is one command:
//! - `<MESSAGE> <SIGNAL> <VALUE>` or `<MESSAGE>.<SIGNAL>=<VALUE>` updates a signal
//! - `status` prints a JSON snapshot of every active message
//! - `list` prints the messages of the database, `*` marking active ones
//! - `help` prints this summary
//! - `quit` (or end of input) stops the loop

use crate::config::SignalUpdate;
use anyhow::{bail, Context, Result};
use can_scheduler::CanScheduler;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Update(SignalUpdate),
    Status,
    List,
    Help,
    Quit,
}

/// Parse one input line; blank lines and `#` comments yield `None`
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        ["status"] => Command::Status,
        ["list"] => Command::List,
        ["help"] | ["?"] => Command::Help,
        ["quit"] | ["exit"] => Command::Quit,
        [assignment] if assignment.contains('=') => {
            Command::Update(SignalUpdate::parse_assignment(assignment)?)
        }
        [message, signal, value] => Command::Update(SignalUpdate {
            message: message.to_string(),
            signal: signal.to_string(),
            value: value
                .parse()
                .with_context(|| format!("invalid value '{}'", value))?,
        }),
        _ => bail!("unrecognized command '{}', try 'help'", line),
    };

    Ok(Some(command))
}

/// Read commands from `input` until `quit` or end of input
pub fn run<R: BufRead, W: Write>(scheduler: &CanScheduler, input: R, mut out: W) -> Result<()> {
    for line in input.lines() {
        let line = line.context("Failed to read command")?;

        let command = match parse_command(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                writeln!(out, "error: {:#}", e)?;
                continue;
            }
        };

        match command {
            Command::Update(update) => {
                match scheduler.update(&update.message, &update.signal, update.value) {
                    Ok(()) => writeln!(out, "ok")?,
                    Err(e) => writeln!(out, "error: {}", e)?,
                }
            }
            Command::Status => {
                let snapshots = scheduler.snapshots()?;
                writeln!(out, "{}", serde_json::to_string_pretty(&snapshots)?)?;
            }
            Command::List => {
                let active = scheduler.scheduled_messages();
                for name in scheduler.database().message_names() {
                    let marker = if active.contains(&name) { '*' } else { ' ' };
                    writeln!(out, "{} {}", marker, name)?;
                }
            }
            Command::Help => {
                writeln!(out, "<MESSAGE> <SIGNAL> <VALUE>   set a signal (starts the message)")?;
                writeln!(out, "<MESSAGE>.<SIGNAL>=<VALUE>   same as above")?;
                writeln!(out, "status                       JSON snapshot of active messages")?;
                writeln!(out, "list                         messages in the database")?;
                writeln!(out, "quit                         stop all messages and exit")?;
            }
            Command::Quit => break,
        }
        out.flush()?;
    }

    Ok(())
}
