//! Channel identifiers scoping relay routing to two peers

use crate::{Error, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of characters in a channel identifier
pub const CHANNEL_ID_LEN: usize = 6;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six-character `[A-Z0-9]` routing key shared by both peers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    /// Draw a fresh identifier uniformly from the alphabet
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..CHANNEL_ID_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    /// Uppercase `raw` and strip every character outside `[A-Z0-9]`
    pub fn sanitize(raw: &str) -> String {
        raw.to_uppercase()
            .chars()
            .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            .collect()
    }

    /// Sanitize externally supplied input and require exactly six characters
    pub fn parse(raw: &str) -> Result<Self> {
        let id = Self::sanitize(raw);
        if id.len() != CHANNEL_ID_LEN {
            return Err(Error::InvalidChannel(format!(
                "expected {} characters from [A-Z0-9] after sanitizing {:?}, got {:?}",
                CHANNEL_ID_LEN, raw, id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ChannelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}
