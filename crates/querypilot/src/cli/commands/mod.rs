pub mod expand;
pub mod feedback;
pub mod parse;
pub mod run;
pub mod schema;

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::models::Envelope;

/// Reads `path`, or stdin when it is `-`.
pub(crate) fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("failed to read stdin")?;
        return Ok(buffer);
    }

    std::fs::read_to_string(path).with_context(|| format!("failed to read file: {}", path.display()))
}

/// Inline SQL wins over `--file`; one of them is required.
pub(crate) fn read_sql(inline: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(sql), _) => Ok(sql.to_string()),
        (None, Some(path)) => read_input(path),
        (None, None) => bail!("provide SQL as an argument or with --file"),
    }
}

pub(crate) fn print_envelope(envelope: &Envelope) -> Result<()> {
    let encoded = serde_json::to_string(envelope).context("failed to encode envelope")?;
    println!("{encoded}");
    Ok(())
}
