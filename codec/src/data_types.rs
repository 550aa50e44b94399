// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Length-prefixed value types shared by the packet encoders.

use std::fmt;
use std::io::Write;

use byteorder::{BigEndian, WriteBytesExt};

use crate::utils::{validate_two_bytes_data, validate_utf8_string, StringError};
use crate::{ByteArray, DecodeError, EncodeError};

/// UTF-8 string with a two-byte big-endian length prefix.
///
/// The character data MUST be well-formed UTF-8 and MUST NOT include an
/// encoding of the null character U+0000 [MQTT-1.5.4-2]. Length is limited
/// to the range of 0 to 65,535 bytes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StringData(String);

impl StringData {
    /// Create an empty string data.
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Convert a string slice into string data.
    ///
    /// # Errors
    ///
    /// Returns error if `s` is too long or contains forbidden code points.
    pub fn from(s: &str) -> Result<Self, StringError> {
        validate_utf8_string(s)?;
        Ok(Self(s.to_string()))
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if the string is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume self, returning the inner string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Parse a length-prefixed string off the cursor.
    ///
    /// # Errors
    ///
    /// Returns error on a short buffer or malformed characters.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let s = ba.read_string(len as usize)?;
        Ok(Self(s))
    }

    /// Append the length prefix and bytes to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(self.0.as_bytes())?;
        Ok(self.bytes())
    }
}

impl fmt::Display for StringData {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StringData {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Opaque bytes with a two-byte big-endian length prefix.
///
/// Same framing as [`StringData`] without the character checks.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct BinaryData(Vec<u8>);

impl BinaryData {
    /// Create an empty binary data.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Copy a byte slice into binary data.
    ///
    /// # Errors
    ///
    /// Returns error if `data` is longer than 65535 bytes.
    pub fn from(data: &[u8]) -> Result<Self, StringError> {
        validate_two_bytes_data(data)?;
        Ok(Self(data.to_vec()))
    }

    /// Get byte length in packet, including the length prefix.
    #[must_use]
    pub fn bytes(&self) -> usize {
        2 + self.0.len()
    }

    /// Returns true if no bytes are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consume self, returning the inner bytes.
    #[must_use]
    pub fn into_vec(self) -> Vec<u8> {
        self.0
    }

    /// Parse length-prefixed bytes off the cursor.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` on a short buffer.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let len = ba.read_u16()?;
        let data = ba.read_bytes(len as usize)?;
        Ok(Self(data.to_vec()))
    }

    /// Append the length prefix and bytes to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        #[allow(clippy::cast_possible_truncation)]
        let len = self.0.len() as u16;
        buf.write_u16::<BigEndian>(len)?;
        buf.write_all(&self.0)?;
        Ok(self.bytes())
    }
}

impl AsRef<[u8]> for BinaryData {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// UTF-8 string pair, the value form of the User Property.
///
/// The same name is allowed to appear more than once; receivers MUST
/// maintain the order of pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct StringPairData {
    name: StringData,
    value: StringData,
}

impl StringPairData {
    /// Build a pair from name and value slices.
    ///
    /// # Errors
    ///
    /// Returns error if either side is an invalid string.
    pub fn from(name: &str, value: &str) -> Result<Self, StringError> {
        Ok(Self {
            name: StringData::from(name)?,
            value: StringData::from(value)?,
        })
    }

    /// Get the name half.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name.as_ref()
    }

    /// Get the value half.
    #[must_use]
    pub fn value(&self) -> &str {
        self.value.as_ref()
    }

    /// Get byte length in packet.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.name.bytes() + self.value.bytes()
    }

    /// Parse a string pair off the cursor.
    ///
    /// # Errors
    ///
    /// Returns error on a short buffer or malformed characters.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let name = StringData::decode(ba)?;
        let value = StringData::decode(ba)?;
        Ok(Self { name, value })
    }

    /// Append both strings to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let n = self.name.encode(buf)?;
        Ok(n + self.value.encode(buf)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_data_round_trip() {
        let s = StringData::from("hello").unwrap();
        let mut buf = Vec::new();
        s.encode(&mut buf).unwrap();
        assert_eq!(buf, [0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(StringData::decode(&mut ba).unwrap(), s);
    }

    #[test]
    fn test_string_data_rejects_nul() {
        assert!(StringData::from("a\u{0000}").is_err());
        // 0x00 0x02 'a' 0x00 on the wire is a malformed packet.
        let buf = [0x00, 0x02, b'a', 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            StringData::decode(&mut ba),
            Err(DecodeError::MalformedString)
        );
    }

    #[test]
    fn test_binary_data_skips_utf8_check() {
        let buf = [0x00, 0x02, 0xff, 0x00];
        let mut ba = ByteArray::new(&buf);
        let data = BinaryData::decode(&mut ba).unwrap();
        assert_eq!(data.as_ref(), &[0xff, 0x00]);
    }

    #[test]
    fn test_string_pair_round_trip() {
        let pair = StringPairData::from("key", "value").unwrap();
        let mut buf = Vec::new();
        pair.encode(&mut buf).unwrap();
        let mut ba = ByteArray::new(&buf);
        assert_eq!(StringPairData::decode(&mut ba).unwrap(), pair);
    }
}
