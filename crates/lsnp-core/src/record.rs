//! LSNP record codec — newline-delimited key-value blocks.
//!
//! A record is a sequence of `KEY: value` lines terminated by a blank line.
//! One datagram carries exactly one record. Keys preserve insertion order so
//! serialized output is reproducible; semantic equality ignores order.

/// Maximum serialized record size accepted on parse. Matches the transport's
/// datagram ceiling.
pub const MAX_RECORD_SIZE: usize = 60 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("record is empty")]
    Empty,
    #[error("record is not valid UTF-8")]
    NotUtf8,
    #[error("record exceeds {MAX_RECORD_SIZE} bytes")]
    TooLarge,
    #[error("value for '{0}' contains a newline")]
    ValueContainsNewline(String),
}

/// An ordered key-value record. The unit of everything LSNP transmits.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// A record with its `TYPE` field already set.
    pub fn of_type(message_type: &str) -> Self {
        let mut record = Self::default();
        record.set("TYPE", message_type);
        record
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Insert or replace `key`. New keys append, preserving order.
    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = value.to_string();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Builder-style `set`, for constructing records inline.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.set(key, value);
        self
    }

    /// The `TYPE` field, which every valid record carries.
    pub fn message_type(&self) -> Option<&str> {
        self.get("TYPE")
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parse a datagram into a record.
    ///
    /// Each line splits on the first `:`; the single space conventionally
    /// following the colon is dropped. Lines without a colon are skipped.
    /// Duplicate keys keep the last value seen.
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        if bytes.len() > MAX_RECORD_SIZE {
            return Err(ParseError::TooLarge);
        }
        let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;

        let mut record = Record::default();
        for line in text.lines() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let Some((key, rest)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let value = rest.strip_prefix(' ').unwrap_or(rest);
            record.set(key, value);
        }

        if record.is_empty() {
            return Err(ParseError::Empty);
        }
        Ok(record)
    }

    /// Serialize to wire bytes: `KEY: value\n` per field plus a blank line.
    ///
    /// Values may not contain LF — the protocol has no escaping.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        if self.fields.is_empty() {
            return Err(ParseError::Empty);
        }
        let mut out = String::new();
        for (key, value) in &self.fields {
            if value.contains('\n') {
                return Err(ParseError::ValueContainsNewline(key.clone()));
            }
            out.push_str(key);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        Ok(out.into_bytes())
    }
}

/// Semantic equality: same key-value mapping, regardless of order.
impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        let mut a: Vec<_> = self.fields.iter().collect();
        let mut b: Vec<_> = other.fields.iter().collect();
        a.sort();
        b.sort();
        a == b
    }
}

impl Eq for Record {}
