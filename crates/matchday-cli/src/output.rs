use std::io::Write;

use crate::error::CliError;
use crate::metadata::Envelope;

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    writeln!(handle, "{rendered}")?;
    handle.flush()?;
    Ok(())
}
