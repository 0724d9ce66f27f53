//! Operator commands queued from the stdin reader to the host loop.

use std::{
    io::{self, BufRead},
    thread,
};

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

pub const COMMAND_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerCommand {
    Start,
    Stop,
    Toggle,
    Clear,
    Status,
    List,
    Help,
    Quit,
}

impl ListenerCommand {
    /// Unknown input maps to `Help`; an empty line toggles like the old
    /// start/stop button did.
    pub fn parse(line: &str) -> Self {
        match line.trim().to_ascii_lowercase().as_str() {
            "" | "toggle" | "t" => Self::Toggle,
            "start" | "listen" => Self::Start,
            "stop" => Self::Stop,
            "clear" | "c" => Self::Clear,
            "status" | "s" => Self::Status,
            "list" | "ls" | "l" => Self::List,
            "quit" | "exit" | "q" => Self::Quit,
            _ => Self::Help,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Toggle => "toggle",
            Self::Clear => "clear",
            Self::Status => "status",
            Self::List => "list",
            Self::Help => "help",
            Self::Quit => "quit",
        }
    }
}

/// Returns `false` once the host loop has gone away.
pub fn dispatch_command(cmd_tx: &Sender<ListenerCommand>, cmd: ListenerCommand) -> bool {
    match cmd_tx.try_send(cmd) {
        Ok(()) => {
            debug!(command = cmd.name(), "queued operator command");
            true
        }
        Err(TrySendError::Full(_)) => {
            warn!(command = cmd.name(), "command queue is full; please retry");
            true
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

/// Queues `Quit`, waiting for room if the queue is full. Returns `false` if
/// the host loop is already gone.
pub fn request_quit(cmd_tx: &Sender<ListenerCommand>) -> bool {
    match cmd_tx.send(ListenerCommand::Quit) {
        Ok(()) => {
            debug!("queued quit");
            true
        }
        Err(_) => false,
    }
}

/// Feeds stdin lines into the command queue; end of input means quit.
pub fn spawn_stdin_reader(cmd_tx: Sender<ListenerCommand>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "failed to read operator input");
                    break;
                }
            };
            if !dispatch_command(&cmd_tx, ListenerCommand::parse(&line)) {
                return;
            }
        }
        request_quit(&cmd_tx);
    })
}
