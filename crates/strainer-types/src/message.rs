//! Read-only view of the message under filtering.

/// What the engine needs to know about a message.
///
/// The host adapts its own mail objects behind this trait; the engine only
/// ever reads. Header lookups are case-insensitive per RFC 5322 and return
/// values in original message order.
pub trait MessageView {
    /// All values of the named header, top to bottom. Empty when absent.
    fn header_values(&self, name: &str) -> Vec<&str>;

    /// Message size in bytes as the `size` test sees it.
    fn size(&self) -> u64;

    /// The `Message-ID` value (with angle brackets), if present.
    fn message_id(&self) -> Option<&str>;

    /// Mailbox the message currently lives in, when filtering an already
    /// stored message. Stores targeting this mailbox are redundant.
    fn origin_mailbox(&self) -> Option<&str>;
}

/// In-memory message used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemMessage {
    headers: Vec<(String, String)>,
    size: u64,
    origin_mailbox: Option<String>,
}

impl MemMessage {
    /// Empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header field.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Override the reported size.
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    /// Mark the message as already stored in `mailbox`.
    #[must_use]
    pub fn with_origin_mailbox(mut self, mailbox: &str) -> Self {
        self.origin_mailbox = Some(mailbox.to_owned());
        self
    }
}

impl MessageView for MemMessage {
    fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn message_id(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case("message-id"))
            .map(|(_, v)| v.as_str())
    }

    fn origin_mailbox(&self) -> Option<&str> {
        self.origin_mailbox.as_deref()
    }
}
