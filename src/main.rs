use anyhow::{bail, Result};
use std::path::Path;

fn main() -> Result<()> {
    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: crud-tui <screen.yaml>");
    };
    crud_tui::ui::run(Path::new(&path))
}
