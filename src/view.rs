use crate::buffer::MessageBuffer;
use crate::models::{ConnectionState, Message};
use std::fmt::Write;

pub const CONNECTED_BANNER: &str = "MQTT Client Connected and Listening";
pub const DISCONNECTED_BANNER: &str = "MQTT Client Not Connected. Check console for errors.";
pub const EMPTY_PLACEHOLDER: &str = "No messages received yet...";

pub fn status_line(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Connected => CONNECTED_BANNER.to_string(),
        ConnectionState::Disconnected => DISCONNECTED_BANNER.to_string(),
        ConnectionState::Failed(reason) => format!("{} ({})", DISCONNECTED_BANNER, reason),
    }
}

fn write_block(out: &mut String, message: &Message) {
    // Writing into a String cannot fail.
    let _ = writeln!(out, "Topic: {}", message.topic);
    let _ = writeln!(out, "Payload: {}", message.payload);
    out.push_str("---\n");
}

/// Plain-text rendering of the dashboard: status line, then one block per
/// message newest first, or the placeholder when nothing arrived yet.
pub fn render(buffer: &MessageBuffer, state: &ConnectionState) -> String {
    let mut out = status_line(state);
    out.push_str("\n\n");

    if buffer.is_empty() {
        out.push_str(EMPTY_PLACEHOLDER);
        out.push('\n');
        return out;
    }

    for message in buffer.iter() {
        write_block(&mut out, message);
    }
    out
}
