//! Narration text from a file or stdin.

use std::io::Read;
use std::path::Path;

use anyhow::Context;

/// Read the whole input and trim surrounding whitespace.
pub fn read_text(path: Option<&Path>) -> anyhow::Result<String> {
    let raw = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        None => read_all(std::io::stdin().lock()).context("Failed to read stdin")?,
    };
    Ok(raw.trim().to_string())
}

fn read_all(mut reader: impl Read) -> std::io::Result<String> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_text_from_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapter.txt");
        std::fs::write(&path, "\n\n  It was a dark and stormy night.  \n").unwrap();
        assert_eq!(read_text(Some(&path)).unwrap(), "It was a dark and stormy night.");
    }

    #[test]
    fn test_read_text_missing_file() {
        let err = read_text(Some(Path::new("/nonexistent/chapter.txt"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/chapter.txt"));
    }

    #[test]
    fn test_read_all_rejects_invalid_utf8() {
        assert!(read_all(&[0xff, 0xfe, 0x00][..]).is_err());
        assert_eq!(read_all("plain".as_bytes()).unwrap(), "plain");
    }
}
