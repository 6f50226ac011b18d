/// Data accepted by [`Sandbox::write_file`](crate::Sandbox::write_file) and
/// [`Sandbox::append_file`](crate::Sandbox::append_file).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Contents {
    /// UTF-8 text, written as-is
    Text(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Lines joined with `\n` (no trailing newline)
    Lines(Vec<String>),
}

impl Contents {
    /// Lines helper that accepts anything string-like.
    pub fn lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Contents::Lines(lines.into_iter().map(Into::into).collect())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Contents::Text(text) => text.into_bytes(),
            Contents::Bytes(bytes) => bytes,
            Contents::Lines(lines) => lines.join("\n").into_bytes(),
        }
    }
}

impl From<String> for Contents {
    fn from(text: String) -> Self {
        Contents::Text(text)
    }
}

impl From<&str> for Contents {
    fn from(text: &str) -> Self {
        Contents::Text(text.to_string())
    }
}

impl From<Vec<u8>> for Contents {
    fn from(bytes: Vec<u8>) -> Self {
        Contents::Bytes(bytes)
    }
}

impl From<&[u8]> for Contents {
    fn from(bytes: &[u8]) -> Self {
        Contents::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Contents {
    fn from(bytes: &[u8; N]) -> Self {
        Contents::Bytes(bytes.to_vec())
    }
}

impl From<Vec<String>> for Contents {
    fn from(lines: Vec<String>) -> Self {
        Contents::Lines(lines)
    }
}

impl From<&[&str]> for Contents {
    fn from(lines: &[&str]) -> Self {
        Contents::lines(lines.iter().copied())
    }
}
