use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::error::{Error, Result};

/// Opens a corpus file, decompressing by extension (.gz, .zst, .zstd).
fn open_corpus(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let reader: Box<dyn Read> = match extension.as_str() {
        "gz" | "gzip" => Box::new(GzDecoder::new(file)),
        "zst" | "zstd" => Box::new(zstd::Decoder::new(file)?),
        _ => Box::new(file),
    };
    Ok(reader)
}

/// Reads a whole text corpus. Fails on invalid UTF-8 or an empty corpus.
pub fn read_corpus<P: AsRef<Path>>(path: P) -> Result<String> {
    read_text(open_corpus(path.as_ref())?)
}

/// Reads a whole text corpus from stdin.
pub fn read_corpus_stdin() -> Result<String> {
    read_text(io::stdin().lock())
}

fn read_text<R: Read>(mut reader: R) -> Result<String> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    if content.is_empty() {
        return Err(Error::EmptyCorpus);
    }
    Ok(content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_read_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt");
        std::fs::write(&path, "hello\nworld").unwrap();

        let content = read_corpus(&path).unwrap();
        assert_eq!(content, "hello\nworld");
    }

    #[test]
    fn test_read_gzip_file() {
        use flate2::Compression;
        use flate2::write::GzEncoder;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt.gz");

        let file = File::create(&path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(b"to be or not to be").unwrap();
        encoder.finish().unwrap();

        let content = read_corpus(&path).unwrap();
        assert_eq!(content, "to be or not to be");
    }

    #[test]
    fn test_read_zstd_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.txt.zst");

        let file = File::create(&path).unwrap();
        let mut encoder = zstd::Encoder::new(file, 0).unwrap();
        encoder.write_all(b"abababab").unwrap();
        encoder.finish().unwrap();

        let content = read_corpus(&path).unwrap();
        assert_eq!(content, "abababab");
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(read_corpus(&path), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn test_invalid_utf8_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("binary.txt");
        std::fs::write(&path, [0xff, 0xfe, 0x00]).unwrap();

        assert!(matches!(read_corpus(&path), Err(Error::Io(_))));
    }
}
