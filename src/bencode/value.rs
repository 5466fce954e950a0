//! Bencode value model

/// A decoded bencode value
///
/// Dictionaries keep their entries in insertion order so that re-encoding a
/// decoded dictionary reproduces the original bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BencodeValue {
    Bytes(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(Vec<(Vec<u8>, BencodeValue)>),
}

impl BencodeValue {
    /// Create a byte string value from text
    pub fn string(s: &str) -> Self {
        BencodeValue::Bytes(s.as_bytes().to_vec())
    }

    /// Create an empty dictionary
    pub fn dict() -> Self {
        BencodeValue::Dict(Vec::new())
    }

    /// Create an empty list
    pub fn list() -> Self {
        BencodeValue::List(Vec::new())
    }

    /// Insert a key-value pair into a dictionary (builder pattern)
    ///
    /// An existing entry with the same key is replaced in place. Calling this
    /// on a non-dictionary value leaves it unchanged.
    pub fn insert(mut self, key: &str, value: BencodeValue) -> Self {
        if let BencodeValue::Dict(ref mut entries) = self {
            match entries.iter_mut().find(|(k, _)| k.as_slice() == key.as_bytes()) {
                Some(entry) => entry.1 = value,
                None => entries.push((key.as_bytes().to_vec(), value)),
            }
        }
        self
    }

    /// Append an item to a list (builder pattern)
    pub fn push(mut self, value: BencodeValue) -> Self {
        if let BencodeValue::List(ref mut items) = self {
            items.push(value);
        }
        self
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Byte string as UTF-8 text, if it is valid UTF-8
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&[(Vec<u8>, BencodeValue)]> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a dictionary entry by key
    pub fn get(&self, key: &[u8]) -> Option<&BencodeValue> {
        self.as_dict()?
            .iter()
            .find(|(k, _)| k.as_slice() == key)
            .map(|(_, v)| v)
    }

    /// Short name of the variant, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            BencodeValue::Bytes(_) => "byte string",
            BencodeValue::Integer(_) => "integer",
            BencodeValue::List(_) => "list",
            BencodeValue::Dict(_) => "dictionary",
        }
    }

    /// Convert to JSON for display
    ///
    /// Byte strings are rendered as text, replacing invalid UTF-8 sequences.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            BencodeValue::Bytes(b) => serde_json::Value::String(String::from_utf8_lossy(b).into_owned()),
            BencodeValue::Integer(i) => serde_json::Value::from(*i),
            BencodeValue::List(items) => {
                serde_json::Value::Array(items.iter().map(BencodeValue::to_json).collect())
            }
            BencodeValue::Dict(entries) => {
                let map = entries
                    .iter()
                    .map(|(k, v)| (String::from_utf8_lossy(k).into_owned(), v.to_json()))
                    .collect();
                serde_json::Value::Object(map)
            }
        }
    }
}

impl From<i64> for BencodeValue {
    fn from(value: i64) -> Self {
        BencodeValue::Integer(value)
    }
}

impl From<&str> for BencodeValue {
    fn from(value: &str) -> Self {
        BencodeValue::string(value)
    }
}

impl From<Vec<u8>> for BencodeValue {
    fn from(value: Vec<u8>) -> Self {
        BencodeValue::Bytes(value)
    }
}
