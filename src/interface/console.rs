//! Line-driven console front end
//!
//! Reads one command per line and prints state changes as the controller
//! publishes them.

use crate::application::controller::{CallController, CallSnapshot};
use crate::domain::call::value_object::CallState;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const HELP: &str = "\
Commands:
  open              start a call
  name <text>       set the caller name
  devices           list input devices
  device <id>       select an input device
  next              continue to the next step
  close             hang up (asks the agent for a transcript)
  stop              hang up immediately
  status            show the current call
  help              show this text
  quit              exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Open,
    Name(String),
    Devices,
    Device(String),
    Next,
    Close,
    Stop,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// `Ok(None)` for a blank line
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word.to_ascii_lowercase().as_str() {
            "open" => ConsoleCommand::Open,
            "name" => ConsoleCommand::Name(rest.to_string()),
            "devices" => ConsoleCommand::Devices,
            "device" if !rest.is_empty() => ConsoleCommand::Device(rest.to_string()),
            "device" => return Err("usage: device <id>".to_string()),
            "next" | "advance" => ConsoleCommand::Next,
            "close" | "hangup" => ConsoleCommand::Close,
            "stop" => ConsoleCommand::Stop,
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command '{}', try 'help'", other)),
        };
        Ok(Some(command))
    }
}

/// Drive `controller` from `input` until `quit` or end of input
pub async fn run<R, W>(controller: CallController, input: R, mut output: W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut updates = controller.subscribe();
    let mut last_shown = controller.snapshot();

    write_line(&mut output, HELP).await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                match ConsoleCommand::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        let reply = execute(&controller, command).await;
                        write_line(&mut output, &reply).await?;
                    }
                    Ok(None) => {}
                    Err(message) => write_line(&mut output, &message).await?,
                }
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                if let Some(notice) = describe_change(&last_shown, &snapshot) {
                    write_line(&mut output, &notice).await?;
                }
                last_shown = snapshot;
            }
        }
    }

    if controller.state() != CallState::Idle {
        debug!("Console exiting with a live call; stopping it");
        let _ = controller.stop().await;
    }
    Ok(())
}

async fn execute(controller: &CallController, command: ConsoleCommand) -> String {
    let result = match command {
        ConsoleCommand::Open => controller.open().await.map(|state| format!("state: {}", state)),
        ConsoleCommand::Name(name) => controller
            .set_caller_name(name)
            .await
            .map(|_| "name set".to_string()),
        ConsoleCommand::Devices => Ok(format_devices(&controller.snapshot())),
        ConsoleCommand::Device(id) => controller
            .select_device(id)
            .await
            .map(|_| "device selected".to_string()),
        ConsoleCommand::Next => controller.advance().await.map(|state| format!("state: {}", state)),
        ConsoleCommand::Close => controller.close().await.map(|state| format!("state: {}", state)),
        ConsoleCommand::Stop => controller.stop().await.map(|_| "stopped".to_string()),
        ConsoleCommand::Status => Ok(format_status(&controller.snapshot())),
        ConsoleCommand::Help => Ok(HELP.to_string()),
        ConsoleCommand::Quit => Ok(String::new()),
    };
    result.unwrap_or_else(|e| format!("error: {}", e))
}

fn describe_change(before: &CallSnapshot, after: &CallSnapshot) -> Option<String> {
    let mut notices = Vec::new();

    if before.state != after.state {
        notices.push(format!("[{}]", after.state));
    }
    if before.devices != after.devices && !after.devices.is_empty() {
        notices.push(format_devices(after));
    }
    if after.last_error.is_some() && before.last_error != after.last_error {
        notices.push(format!(
            "error: {}",
            after.last_error.as_deref().unwrap_or_default()
        ));
    }
    if before.captured_details != after.captured_details {
        let details = &after.captured_details;
        for (label, value) in [
            ("phone", &details.phone),
            ("email", &details.email),
            ("reason", &details.reason),
        ] {
            if let Some(value) = value {
                notices.push(format!("{}: {}", label, value));
            }
        }
    }

    if notices.is_empty() {
        None
    } else {
        Some(notices.join("\n"))
    }
}

fn format_devices(snapshot: &CallSnapshot) -> String {
    if snapshot.devices.is_empty() {
        return if snapshot.waiting_for_device {
            "waiting for an input device...".to_string()
        } else {
            "no input devices".to_string()
        };
    }
    snapshot
        .devices
        .iter()
        .map(|device| {
            let marker = if snapshot.selected_device_id.as_deref() == Some(device.id.as_str()) {
                '*'
            } else {
                ' '
            };
            format!("{} {}  {}", marker, device.id, device.label)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_status(snapshot: &CallSnapshot) -> String {
    let mut lines = vec![format!("state: {}", snapshot.state)];
    if !snapshot.caller_name.is_empty() {
        lines.push(format!("caller: {}", snapshot.caller_name));
    }
    if let Some(device) = &snapshot.selected_device_id {
        lines.push(format!("device: {}", device));
    }
    if matches!(snapshot.state, CallState::Active | CallState::Closing) {
        lines.push(format!(
            "duration: {:02}:{:02}",
            snapshot.duration_seconds / 60,
            snapshot.duration_seconds % 60
        ));
    }
    if let Some(error) = &snapshot.last_error {
        lines.push(format!("last error: {}", error));
    }
    lines.join("\n")
}

async fn write_line<W: AsyncWrite + Unpin>(output: &mut W, text: &str) -> std::io::Result<()> {
    output.write_all(text.as_bytes()).await?;
    output.write_all(b"\n").await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::call::value_object::InputDevice;

    #[test]
    fn test_parse_commands() {
        assert_eq!(ConsoleCommand::parse("open"), Ok(Some(ConsoleCommand::Open)));
        assert_eq!(
            ConsoleCommand::parse("  name  Ada Lovelace "),
            Ok(Some(ConsoleCommand::Name("Ada Lovelace".to_string())))
        );
        assert_eq!(
            ConsoleCommand::parse("DEVICE usb-1"),
            Ok(Some(ConsoleCommand::Device("usb-1".to_string())))
        );
        assert_eq!(ConsoleCommand::parse("next"), Ok(Some(ConsoleCommand::Next)));
        assert_eq!(ConsoleCommand::parse("   "), Ok(None));
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ConsoleCommand::parse("device").is_err());
        assert!(ConsoleCommand::parse("dial 555").is_err());
    }

    #[test]
    fn test_device_listing_marks_selection() {
        let snapshot = CallSnapshot {
            devices: vec![InputDevice::new("a", "Built-in"), InputDevice::new("b", "Headset")],
            selected_device_id: Some("b".to_string()),
            ..Default::default()
        };

        let listing = format_devices(&snapshot);
        assert_eq!(listing, "  a  Built-in\n* b  Headset");
    }

    #[test]
    fn test_change_notices() {
        let before = CallSnapshot::default();
        let mut after = before.clone();
        after.state = CallState::Active;
        after.captured_details.email = Some("sam@example.com".to_string());

        let notice = describe_change(&before, &after).unwrap();
        assert!(notice.contains("[Active]"));
        assert!(notice.contains("email: sam@example.com"));

        assert!(describe_change(&after, &after).is_none());
    }

    #[test]
    fn test_status_shows_duration_while_connected() {
        let snapshot = CallSnapshot {
            state: CallState::Active,
            caller_name: "Sam".to_string(),
            duration_seconds: 75,
            ..Default::default()
        };
        let status = format_status(&snapshot);
        assert!(status.contains("caller: Sam"));
        assert!(status.contains("duration: 01:15"));
    }
}
