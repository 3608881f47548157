//! MBOX mailbox support
//!
//! Each message becomes one record payload:
//!
//! ```json
//! {"subject": "...", "sender": "...", "recipients": ["..."],
//!  "delivery_time": "...", "body": "...", "folder": "inbox"}
//! ```

mod message;
pub mod parser;

pub use message::MailMessage;
pub use parser::MboxParser;
