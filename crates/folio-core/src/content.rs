//! Raw document content and change fingerprints

use std::fmt;

/// Content of a document as handed out by an editor buffer or a container.
///
/// Editor buffers always hold text; containers hand out text for
/// documents and stylesheets and bytes for everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContent {
    Text(String),
    Bytes(Vec<u8>),
}

impl RawContent {
    /// The bytes that get fingerprinted and served.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            RawContent::Text(s) => s.as_bytes(),
            RawContent::Bytes(b) => b,
        }
    }

    /// Byte length of the content.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Convert into owned bytes, UTF-8 encoding text.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            RawContent::Text(s) => s.into_bytes(),
            RawContent::Bytes(b) => b,
        }
    }

    /// Convert into text, replacing invalid UTF-8 sequences.
    pub fn into_text(self) -> String {
        match self {
            RawContent::Text(s) => s,
            RawContent::Bytes(b) => match String::from_utf8(b) {
                Ok(s) => s,
                Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
            },
        }
    }

    /// Compute the change fingerprint of this content.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self.as_bytes())
    }
}

impl From<String> for RawContent {
    fn from(s: String) -> Self {
        RawContent::Text(s)
    }
}

impl From<&str> for RawContent {
    fn from(s: &str) -> Self {
        RawContent::Text(s.to_string())
    }
}

impl From<Vec<u8>> for RawContent {
    fn from(b: Vec<u8>) -> Self {
        RawContent::Bytes(b)
    }
}

/// Cheap equality test for document content: byte length plus content hash.
///
/// Two fingerprints compare equal when both the length and the hash match.
/// The length is checked first so that most edits are detected without
/// looking at the hash at all.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    len: usize,
    hash: [u8; 32],
}

impl Fingerprint {
    /// Fingerprint a byte slice.
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            len: bytes.len(),
            hash: *blake3::hash(bytes).as_bytes(),
        }
    }

    /// Byte length of the fingerprinted content.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this fingerprint describes the given content.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        self.len == bytes.len() && *self == Self::of(bytes)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes of the hash are plenty to tell entries apart in logs
        let short: String = self.hash[..8].iter().map(|b| format!("{b:02x}")).collect();
        write!(f, "Fingerprint({}, {})", self.len, short)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_same_content_is_equal() {
        let a = RawContent::from("<p>hi</p>").fingerprint();
        let b = RawContent::from(b"<p>hi</p>".to_vec()).fingerprint();
        assert_eq!(a, b);
        assert_eq!(a.len(), 9);
    }

    #[test]
    fn test_fingerprint_detects_same_length_edit() {
        let a = Fingerprint::of(b"<p>hi</p>");
        let b = Fingerprint::of(b"<p>ho</p>");
        assert_eq!(a.len(), b.len());
        assert_ne!(a, b);
    }

    #[test]
    fn test_fingerprint_matches() {
        let fp = Fingerprint::of(b"abc");
        assert!(fp.matches(b"abc"));
        assert!(!fp.matches(b"abcd"));
    }

    #[test]
    fn test_into_text_lossy() {
        let raw = RawContent::Bytes(vec![b'a', 0xff, b'b']);
        assert_eq!(raw.into_text(), "a\u{fffd}b");
    }
}
