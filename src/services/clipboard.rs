use anyhow::{Context, Result};

/// Copy text to the system clipboard.
pub fn copy(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new().context("opening clipboard")?;
    clipboard
        .set_text(text.to_string())
        .context("writing clipboard")?;
    Ok(())
}
