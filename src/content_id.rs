//! Logical block identifiers and physical pack/index file names (§3).

use std::fmt;

use crate::error::{Error, Result};

/// A logical block identifier: either all lowercase-hex, or one namespace
/// letter in `g..=z` followed by lowercase-hex. Equality is string equality.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContentID(String);

impl ContentID {
    /// Build an id from a validated prefix and the hex of a content hash.
    pub fn new(prefix: &str, hash_hex: &str) -> Result<Self> {
        validate_prefix(prefix)?;
        let mut s = String::with_capacity(prefix.len() + hash_hex.len());
        s.push_str(prefix);
        s.push_str(hash_hex);
        ContentID::parse(s)
    }

    /// Parse and validate an existing identifier string.
    pub fn parse(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        validate_content_id(&s)?;
        Ok(ContentID(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The namespace letter, if any (`g..=z`).
    pub fn prefix_char(&self) -> Option<char> {
        let first = self.0.chars().next()?;
        if first.is_ascii_hexdigit() {
            None
        } else {
            Some(first)
        }
    }

    /// The hash portion (without the namespace letter).
    pub fn hex_part(&self) -> &str {
        match self.prefix_char() {
            Some(c) => &self.0[c.len_utf8()..],
            None => &self.0,
        }
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for ContentID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate a caller-supplied namespace prefix: empty, or exactly one ASCII
/// byte in `g..=z`. Anything else (including `a..=f`, digits, and any byte
/// outside that range, ASCII or not) is rejected.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    match prefix.as_bytes() {
        [] => Ok(()),
        [b] if (b'g'..=b'z').contains(b) && prefix.len() == 1 => Ok(()),
        _ => Err(Error::InvalidPrefix(prefix.to_string())),
    }
}

fn validate_content_id(s: &str) -> Result<()> {
    if s.len() % 2 != 0 || s.is_empty() {
        return Err(Error::InvalidIdentifier(s.to_string()));
    }

    let bytes = s.as_bytes();
    let (prefix_len, hex_part) = if bytes[0].is_ascii_hexdigit() {
        (0usize, bytes)
    } else {
        if !(b'g'..=b'z').contains(&bytes[0]) {
            return Err(Error::InvalidIdentifier(s.to_string()));
        }
        (1usize, &bytes[1..])
    };

    // total byte length (including any prefix letter) must be even.
    let _ = prefix_len;

    if hex_part.is_empty() || !hex_part.iter().all(u8::is_ascii_hexdigit) {
        return Err(Error::InvalidIdentifier(s.to_string()));
    }
    if !hex_part.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
        return Err(Error::InvalidIdentifier(s.to_string()));
    }

    Ok(())
}

/// A physical object name in the backing store: a pack file (`p...`), an
/// index block (`n...`), or a legacy format-0 name (`i...`).
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PackFile(String);

impl PackFile {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || !name.as_bytes()[0].is_ascii_alphabetic() {
            return Err(Error::InvalidIdentifier(name));
        }
        Ok(PackFile(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_index_block(&self) -> bool {
        self.0.starts_with('n')
    }

    pub fn is_legacy(&self) -> bool {
        self.0.starts_with('i')
    }
}

impl fmt::Display for PackFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_empty_and_g_to_z_prefixes() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("g").is_ok());
        assert!(validate_prefix("z").is_ok());
    }

    #[test]
    fn rejects_hex_range_and_long_prefixes() {
        assert!(validate_prefix("a").is_err());
        assert!(validate_prefix("f").is_err());
        assert!(validate_prefix("0").is_err());
        assert!(validate_prefix("gg").is_err());
        assert!(validate_prefix("\u{00e9}").is_err());
    }

    #[test]
    fn content_id_roundtrip() {
        let id = ContentID::new("g", "deadbeef").unwrap();
        assert_eq!(id.as_str(), "gdeadbeef");
        assert_eq!(id.prefix_char(), Some('g'));
        assert_eq!(id.hex_part(), "deadbeef");

        let plain = ContentID::new("", "cafebabe").unwrap();
        assert_eq!(plain.prefix_char(), None);
    }

    #[test]
    fn content_id_rejects_odd_length_and_bad_chars() {
        assert!(ContentID::parse("abc").is_err()); // odd length
        assert!(ContentID::parse("gABCD").is_err()); // uppercase hex
        assert!(ContentID::parse("").is_err());
    }
}
