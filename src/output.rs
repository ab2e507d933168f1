use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::pipeline::{ProgressEvent, ProgressSink};

pub struct JsonOutput;

impl JsonOutput {
    pub fn print<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(
                elapsed_ms = elapsed.as_millis() as u64,
                "{}", event.message
            ),
            None => info!("{}", event.message),
        }
    }
}
