//! Host loop: applies operator commands and transport messages to the
//! controller on one thread and renders what changed.

use std::{io::Write, ops::ControlFlow};

use crossbeam_channel::{select, Receiver};
use listener_core::{ChangeTransport, ConnectionController};
use tracing::debug;

use crate::{commands::ListenerCommand, render};

pub fn run_listener<T, W>(
    controller: &mut ConnectionController<T>,
    cmd_rx: &Receiver<ListenerCommand>,
    out: &mut W,
    autostart: bool,
) -> anyhow::Result<()>
where
    T: ChangeTransport,
    W: Write,
{
    render::write_status(
        out,
        controller.status(),
        controller.event_count(),
        controller.filter(),
    )?;
    if autostart {
        controller.start();
        writeln!(out, "{}", render::status_line(controller.status()))?;
    } else {
        writeln!(out, "Press <enter> to start listening, \"help\" for commands.")?;
    }

    let inbox = controller.inbox();
    loop {
        // Transport messages already queued go first so commands always see
        // the latest state.
        for update in controller.drain() {
            render::write_update(out, &update)?;
        }
        out.flush()?;

        select! {
            recv(cmd_rx) -> cmd => {
                let Ok(cmd) = cmd else {
                    debug!("command queue closed");
                    break;
                };
                if apply_command(controller, cmd, out)?.is_break() {
                    break;
                }
            }
            recv(inbox) -> message => {
                let Ok(message) = message else {
                    break;
                };
                if let Some(update) = controller.handle_message(message) {
                    render::write_update(out, &update)?;
                }
            }
        }
    }

    controller.stop();
    writeln!(out, "{}", render::status_line(controller.status()))?;
    out.flush()?;
    Ok(())
}

pub fn apply_command<T, W>(
    controller: &mut ConnectionController<T>,
    cmd: ListenerCommand,
    out: &mut W,
) -> anyhow::Result<ControlFlow<()>>
where
    T: ChangeTransport,
    W: Write,
{
    debug!(command = cmd.name(), "applying operator command");
    match cmd {
        ListenerCommand::Start => {
            controller.start();
            writeln!(out, "{}", render::status_line(controller.status()))?;
        }
        ListenerCommand::Stop => {
            controller.stop();
            writeln!(out, "{}", render::status_line(controller.status()))?;
        }
        ListenerCommand::Toggle => {
            let next = if controller.is_active() {
                ListenerCommand::Stop
            } else {
                ListenerCommand::Start
            };
            return apply_command(controller, next, out);
        }
        ListenerCommand::Clear => {
            controller.clear();
            writeln!(out, "{}", render::events_header(controller.event_count()))?;
        }
        ListenerCommand::Status => render::write_status(
            out,
            controller.status(),
            controller.event_count(),
            controller.filter(),
        )?,
        ListenerCommand::List => render::write_event_list(out, controller.events())?,
        ListenerCommand::Help => writeln!(out, "{}", render::HELP)?,
        ListenerCommand::Quit => return Ok(ControlFlow::Break(())),
    }
    Ok(ControlFlow::Continue(()))
}

#[cfg(test)]
#[path = "tests/host_tests.rs"]
mod tests;
