//! Single MBOX message decoding
//!
//! A message is the `From ` separator line plus every line up to the next
//! separator. Headers run until the first blank line; the rest is the body.

use serde::{Deserialize, Serialize};

/// Raw lines of one message, separator line excluded
#[derive(Debug, Clone, Default)]
pub(crate) struct RawMessage {
    pub separator: String,
    pub lines: Vec<String>,
}

impl RawMessage {
    pub fn new(separator: String) -> Self {
        Self {
            separator,
            lines: Vec::new(),
        }
    }
}

/// Decoded email message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailMessage {
    pub subject: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub delivery_time: String,
    pub body: String,
    /// Mailbox the message came from (file stem)
    pub folder: String,
}

/// Decode one message; the error side describes a record-level defect
pub(crate) fn decode(raw: &RawMessage, folder: &str) -> Result<MailMessage, String> {
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut lines = raw.lines.iter();

    for line in lines.by_ref() {
        if line.trim().is_empty() {
            break;
        }

        // Folded header continuation
        if line.starts_with(' ') || line.starts_with('\t') {
            match headers.last_mut() {
                Some((_, value)) => {
                    value.push(' ');
                    value.push_str(line.trim());
                    continue;
                },
                None => return Err("continuation line before any header".to_string()),
            }
        }

        match line.split_once(':') {
            Some((name, value)) if !name.trim().is_empty() => {
                headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
            },
            _ => return Err(format!("malformed header line '{}'", truncate(line, 60))),
        }
    }

    if headers.is_empty() {
        return Err("message has no header block".to_string());
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
    };

    let mut separator = raw.separator.split_whitespace().skip(1);
    let envelope_sender = separator.next().unwrap_or_default().to_string();
    let envelope_time = separator.collect::<Vec<_>>().join(" ");

    let recipients = ["to", "cc"]
        .iter()
        .filter_map(|h| header(*h))
        .flat_map(|v| {
            v.split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    let mut body: Vec<&str> = lines.map(|l| unescape(l)).collect();
    while body.last().is_some_and(|l| l.trim().is_empty()) {
        body.pop();
    }

    Ok(MailMessage {
        subject: header("subject").unwrap_or_default(),
        sender: header("from").unwrap_or(envelope_sender),
        recipients,
        delivery_time: header("date").unwrap_or(envelope_time),
        body: body.join("\n"),
        folder: folder.to_string(),
    })
}

/// Undo `>From ` quoting of body lines
fn unescape(line: &str) -> &str {
    match line.strip_prefix('>') {
        Some(rest) if rest.trim_start_matches('>').starts_with("From ") => rest,
        _ => line,
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn raw(separator: &str, lines: &[&str]) -> RawMessage {
        RawMessage {
            separator: separator.to_string(),
            lines: lines.iter().map(|l| l.to_string()).collect(),
        }
    }

    #[test]
    fn test_decode_message() {
        let message = decode(
            &raw(
                "From sender0@example.com Mon Jan  1 10:00:00 2024",
                &[
                    "From: sender0@example.com",
                    "To: recipient@example.com, other@example.com",
                    "Cc: boss@example.com",
                    "Subject: Project Update - Q4 2024",
                    "Date: Mon, 1 Jan 2024 10:00:00 +0000",
                    "",
                    "This is test email #1 with some sample content.",
                    ">From the archive",
                    "",
                ],
            ),
            "inbox",
        )
        .unwrap();

        assert_eq!(message.subject, "Project Update - Q4 2024");
        assert_eq!(message.sender, "sender0@example.com");
        assert_eq!(
            message.recipients,
            vec!["recipient@example.com", "other@example.com", "boss@example.com"]
        );
        assert_eq!(message.delivery_time, "Mon, 1 Jan 2024 10:00:00 +0000");
        assert_eq!(message.body, "This is test email #1 with some sample content.\nFrom the archive");
        assert_eq!(message.folder, "inbox");
    }

    #[test]
    fn test_envelope_fallbacks() {
        let message = decode(
            &raw("From MAILER-DAEMON Tue Feb  6 09:30:00 2024", &["Subject: hi", "", "body"]),
            "archive",
        )
        .unwrap();

        assert_eq!(message.sender, "MAILER-DAEMON");
        assert_eq!(message.delivery_time, "Tue Feb 6 09:30:00 2024");
        assert!(message.recipients.is_empty());
    }

    #[test]
    fn test_folded_header() {
        let message = decode(
            &raw("From a@b", &["Subject: a very", "\tlong subject", "", "x"]),
            "f",
        )
        .unwrap();
        assert_eq!(message.subject, "a very long subject");
    }

    #[test]
    fn test_message_without_headers_is_defect() {
        assert!(decode(&raw("From a@b", &["", "just a body"]), "f").is_err());
        assert!(decode(&raw("From a@b", &[]), "f").is_err());
    }

    #[test]
    fn test_garbage_header_is_defect() {
        let err = decode(&raw("From a@b", &["this is not a header", "", "body"]), "f").unwrap_err();
        assert!(err.contains("malformed header"));
    }
}
