use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Quote a CSV cell when it needs it, doubling embedded quotes.
fn encode_cell(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Encode a header plus rows as CSV text.
pub fn encode_csv(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    out.push_str(
        &columns
            .iter()
            .map(|c| encode_cell(c))
            .collect::<Vec<_>>()
            .join(","),
    );
    out.push_str("\r\n");
    for row in rows {
        out.push_str(
            &row.iter()
                .map(|c| encode_cell(c))
                .collect::<Vec<_>>()
                .join(","),
        );
        out.push_str("\r\n");
    }
    out
}

/// Write `<name>-<timestamp>.csv` into `dir` and return the path.
/// Refuses to write an empty dataset.
pub fn export_file(
    dir: &Path,
    name: &str,
    columns: &[String],
    rows: &[Vec<String>],
) -> Result<PathBuf> {
    if rows.is_empty() {
        bail!("nothing to export");
    }
    let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let path = dir.join(format!("{name}-{stamp}.csv"));
    std::fs::write(&path, encode_csv(columns, rows))
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn quotes_only_when_needed() {
        let csv = encode_csv(
            &cols(&["name", "note"]),
            &[
                vec!["plain".into(), "a,b".into()],
                vec!["say \"hi\"".into(), "two\nlines".into()],
            ],
        );
        let lines: Vec<&str> = csv.split("\r\n").collect();
        assert_eq!(lines[0], "name,note");
        assert_eq!(lines[1], "plain,\"a,b\"");
        assert_eq!(lines[2], "\"say \"\"hi\"\"\",\"two\nlines\"");
    }

    #[test]
    fn empty_dataset_is_refused() {
        let dir = std::env::temp_dir();
        assert!(export_file(&dir, "contact", &cols(&["a"]), &[]).is_err());
    }

    #[test]
    fn writes_timestamped_file() {
        let dir = std::env::temp_dir().join("crud-tui-export-test");
        let _ = std::fs::create_dir_all(&dir);
        let path = export_file(
            &dir,
            "contact",
            &cols(&["name"]),
            &[vec!["Ada".into()]],
        )
        .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("contact-"));
        assert!(name.ends_with(".csv"));
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.contains("Ada"));
        let _ = std::fs::remove_file(&path);
    }
}
