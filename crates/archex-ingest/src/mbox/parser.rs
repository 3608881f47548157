//! Incremental MBOX reader
//!
//! Lines are read lazily, so a chunked read never holds more than one chunk
//! of messages plus the message currently being assembled.

use async_trait::async_trait;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::message::{decode, RawMessage};
use crate::error::ParseError;
use crate::framework::parser::{ArchiveParser, RawEntry, RecordReader};

const SEPARATOR: &str = "From ";

/// Parsing capability for MBOX mailboxes
#[derive(Debug, Clone, Copy, Default)]
pub struct MboxParser;

impl MboxParser {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArchiveParser for MboxParser {
    async fn open(&self, path: &str) -> Result<Box<dyn RecordReader>, ParseError> {
        let file = File::open(path)
            .await
            .map_err(|e| ParseError::Open(format!("{}: {}", path, e)))?;

        let folder = Path::new(path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();

        let mut reader = MboxReader {
            path: path.to_string(),
            folder,
            lines: BufReader::new(file),
            buf: Vec::new(),
            current: None,
        };
        reader.read_preamble().await?;

        Ok(Box::new(reader))
    }

    fn format(&self) -> &str {
        "mbox"
    }

    fn extensions(&self) -> &[&str] {
        &["mbox", "mbx"]
    }
}

/// Open MBOX file positioned at a message boundary
struct MboxReader {
    path: String,
    folder: String,
    lines: BufReader<File>,
    buf: Vec<u8>,
    /// Message whose separator has been read but not its body
    current: Option<RawMessage>,
}

impl MboxReader {
    /// Skip leading blank lines and require a separator
    async fn read_preamble(&mut self) -> Result<(), ParseError> {
        while let Some(line) = self.read_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with(SEPARATOR) {
                self.current = Some(RawMessage::new(line));
                return Ok(());
            }
            return Err(ParseError::Format(format!(
                "{}: not an mbox file (first line does not start with 'From ')",
                self.path
            )));
        }
        // Empty mailbox
        Ok(())
    }

    /// Next line without its terminator; `None` at end of file
    async fn read_line(&mut self) -> Result<Option<String>, ParseError> {
        self.buf.clear();
        let n = self.lines.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }
        while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
            self.buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }
}

#[async_trait]
impl RecordReader for MboxReader {
    async fn next_chunk(&mut self, limit: usize) -> Result<Vec<RawEntry>, ParseError> {
        let mut entries = Vec::new();

        while entries.len() < limit {
            let Some(mut message) = self.current.take() else {
                break;
            };

            loop {
                match self.read_line().await? {
                    Some(line) if line.starts_with(SEPARATOR) => {
                        self.current = Some(RawMessage::new(line));
                        break;
                    },
                    Some(line) => message.lines.push(line),
                    None => break,
                }
            }

            entries.push(match decode(&message, &self.folder) {
                Ok(mail) => match serde_json::to_value(mail) {
                    Ok(payload) => RawEntry::Record(payload),
                    Err(e) => RawEntry::Defect(e.to_string()),
                },
                Err(defect) => RawEntry::Defect(defect),
            });
        }

        Ok(entries)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn mbox_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".mbox").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn message(i: usize) -> String {
        format!(
            "From sender{i}@example.com Mon Jan  1 10:00:00 2024\n\
             From: sender{i}@example.com\n\
             To: recipient@example.com\n\
             Subject: Message {i}\n\
             \n\
             This is test email #{i}.\n\
             \n"
        )
    }

    async fn read_all(path: &str, limit: usize) -> Vec<Vec<RawEntry>> {
        let mut reader = MboxParser.open(path).await.unwrap();
        let mut chunks = Vec::new();
        loop {
            let chunk = reader.next_chunk(limit).await.unwrap();
            if chunk.is_empty() {
                break;
            }
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_reads_every_message() {
        let contents: String = (0..3).map(message).collect();
        let file = mbox_file(&contents);

        let chunks = read_all(file.path().to_str().unwrap(), usize::MAX).await;

        assert_eq!(chunks.len(), 1);
        let subjects: Vec<String> = chunks[0]
            .iter()
            .map(|e| match e {
                RawEntry::Record(v) => v["subject"].as_str().unwrap().to_string(),
                RawEntry::Defect(d) => panic!("unexpected defect: {}", d),
            })
            .collect();
        assert_eq!(subjects, vec!["Message 0", "Message 1", "Message 2"]);
    }

    #[tokio::test]
    async fn test_chunked_reads_respect_limit() {
        let contents: String = (0..5).map(message).collect();
        let file = mbox_file(&contents);

        let chunks = read_all(file.path().to_str().unwrap(), 2).await;
        let sizes: Vec<usize> = chunks.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_payload_carries_folder_and_body() {
        let file = mbox_file(&message(7));
        let folder = file.path().file_stem().unwrap().to_string_lossy().to_string();

        let chunks = read_all(file.path().to_str().unwrap(), 10).await;
        let RawEntry::Record(payload) = &chunks[0][0] else {
            panic!("expected record");
        };
        assert_eq!(payload["folder"], folder.as_str());
        assert_eq!(payload["body"], "This is test email #7.");
        assert_eq!(payload["recipients"][0], "recipient@example.com");
    }

    #[tokio::test]
    async fn test_headerless_message_is_defect() {
        let contents = format!("{}From nobody Mon Jan  1 10:00:00 2024\n\nno headers here\n\n{}", message(0), message(1));
        let file = mbox_file(&contents);

        let entries: Vec<RawEntry> = read_all(file.path().to_str().unwrap(), usize::MAX)
            .await
            .into_iter()
            .flatten()
            .collect();

        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], RawEntry::Record(_)));
        assert!(matches!(entries[1], RawEntry::Defect(_)));
        assert!(matches!(entries[2], RawEntry::Record(_)));
    }

    #[tokio::test]
    async fn test_non_mbox_file_fails_to_open() {
        let file = mbox_file("PK\u{3}\u{4} this is a zip archive\n");
        let err = MboxParser.open(file.path().to_str().unwrap()).await.err().unwrap();
        assert!(matches!(err, ParseError::Format(_)));
    }

    #[tokio::test]
    async fn test_missing_file_fails_to_open() {
        let err = MboxParser.open("/nonexistent/inbox.mbox").await.err().unwrap();
        assert!(matches!(err, ParseError::Open(_)));
    }

    #[tokio::test]
    async fn test_empty_mailbox_has_no_records() {
        let file = mbox_file("");
        let chunks = read_all(file.path().to_str().unwrap(), 10).await;
        assert!(chunks.is_empty());
    }
}
