use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use fdrelay_hub::{CloseReason, RelayEvent};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize, Debug, Default, PartialEq)]
struct EventOutput {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    fd: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    timestamp: String,
}

impl EventOutput {
    fn from_event(event: &RelayEvent) -> Self {
        let timestamp = now_unix_seconds();
        match event {
            RelayEvent::NameBound { name } => Self {
                event: "name_bound",
                channel: Some(name.to_string()),
                timestamp,
                ..Self::default()
            },
            RelayEvent::ChannelAttached {
                id,
                name,
                fd,
                payload_len,
            } => Self {
                event: "channel_attached",
                channel: Some(name.to_string()),
                id: Some(*id),
                fd: Some(*fd),
                payload_size: Some(*payload_len),
                timestamp,
                ..Self::default()
            },
            RelayEvent::ChannelClosed(closed) => Self {
                event: "channel_closed",
                channel: Some(closed.name.to_string()),
                id: Some(closed.id),
                reason: Some(close_reason(&closed.reason)),
                timestamp,
                ..Self::default()
            },
            RelayEvent::Shutdown { reason } => Self {
                event: "shutdown",
                reason: Some(reason.as_str().to_string()),
                timestamp,
                ..Self::default()
            },
        }
    }

    fn detail(&self) -> String {
        let mut parts = Vec::new();
        if let Some(fd) = self.fd {
            parts.push(format!("fd={fd}"));
        }
        if let Some(size) = self.payload_size {
            parts.push(format!("size={size}"));
        }
        if let Some(reason) = &self.reason {
            parts.push(format!("reason={reason}"));
        }
        parts.join(" ")
    }
}

pub fn print_event(event: &RelayEvent, format: OutputFormat) {
    let out = EventOutput::from_event(event);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "CHANNEL", "ID", "DETAIL"])
                .add_row(vec![
                    out.event.to_string(),
                    out.channel.clone().unwrap_or_default(),
                    out.id.map(|id| id.to_string()).unwrap_or_default(),
                    out.detail(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let mut line = format!("event={}", out.event);
            if let Some(channel) = &out.channel {
                line.push_str(&format!(" channel={channel}"));
            }
            if let Some(id) = out.id {
                line.push_str(&format!(" id={id}"));
            }
            let detail = out.detail();
            if !detail.is_empty() {
                line.push(' ');
                line.push_str(&detail);
            }
            println!("{line}");
        }
        OutputFormat::Raw => {
            let line = format!("{}\t{}\n", out.event, out.channel.unwrap_or_default());
            print_raw(line.as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn close_reason(reason: &CloseReason) -> String {
    match reason {
        CloseReason::PeerClosed => "peer_closed".to_string(),
        CloseReason::Cancelled => "cancelled".to_string(),
        CloseReason::Failed(message) => format!("failed: {message}"),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use fdrelay_control::ChannelName;
    use fdrelay_hub::{ClosedChannel, ShutdownReason};

    use super::*;

    #[test]
    fn attached_event_carries_descriptor_fields() {
        let out = EventOutput::from_event(&RelayEvent::ChannelAttached {
            id: 3,
            name: ChannelName::parent(),
            fd: 9,
            payload_len: 5,
        });
        let value = serde_json::to_value(&out).unwrap();
        assert_eq!(value["event"], "channel_attached");
        assert_eq!(value["channel"], "parent");
        assert_eq!(value["fd"], 9);
        assert_eq!(value["payload_size"], 5);
        assert!(value.get("reason").is_none());
    }

    #[test]
    fn closed_and_shutdown_events_report_reason() {
        let closed = EventOutput::from_event(&RelayEvent::ChannelClosed(ClosedChannel {
            id: 1,
            name: ChannelName::parent(),
            reason: CloseReason::Failed("broken pipe".to_string()),
        }));
        assert_eq!(closed.reason.as_deref(), Some("failed: broken pipe"));
        assert_eq!(closed.detail(), "reason=failed: broken pipe");

        let shutdown = EventOutput::from_event(&RelayEvent::Shutdown {
            reason: ShutdownReason::ControlClosed,
        });
        assert_eq!(shutdown.event, "shutdown");
        assert_eq!(shutdown.reason.as_deref(), Some("control_closed"));
        assert!(shutdown.channel.is_none());
    }
}
