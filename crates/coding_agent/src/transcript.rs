//! JSON-lines transcript dump.

use std::io::{self, Write};

use crate::provider::RunMessage;

/// Writes one JSON object per message, in history order.
pub fn write_transcript<W: Write>(mut writer: W, messages: &[RunMessage]) -> io::Result<()> {
    for message in messages {
        serde_json::to_writer(&mut writer, message).map_err(io::Error::other)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
