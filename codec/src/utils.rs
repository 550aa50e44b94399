// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringError {
    /// Byte length exceeds the two-byte length prefix.
    TooManyData,

    /// Disallowed control character.
    InvalidChar,

    /// Ill-formed UTF-8 or an embedded U+0000; the receiver shall
    /// treat the whole packet as malformed.
    SeriousError,
}

impl From<std::string::FromUtf8Error> for StringError {
    fn from(_err: std::string::FromUtf8Error) -> Self {
        Self::SeriousError
    }
}

/// Generate a random alphanumeric string, used for local client ids.
#[must_use]
pub fn random_string(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Check string characters and length.
///
/// The character data in a UTF-8 Encoded String MUST be well-formed UTF-8
/// as defined by the Unicode specification and MUST NOT include an encoding
/// of the null character U+0000 [MQTT-1.5.4-2].
///
/// # Errors
///
/// Returns error if `s` is longer than 65535 bytes or contains forbidden
/// code points.
pub fn validate_utf8_string(s: &str) -> Result<(), StringError> {
    if s.len() > u16::MAX as usize {
        return Err(StringError::TooManyData);
    }

    for c in s.chars() {
        if c == '\u{0000}' {
            return Err(StringError::SeriousError);
        }
        if ('\u{0001}'..='\u{001f}').contains(&c) || ('\u{007f}'..='\u{009f}').contains(&c) {
            return Err(StringError::InvalidChar);
        }
    }

    // Empty string is valid.
    Ok(())
}

/// Convert a byte slice to a validated UTF-8 string.
///
/// # Errors
///
/// Returns error if the bytes are not well-formed UTF-8 or contain
/// forbidden code points.
pub fn to_utf8_string(buf: &[u8]) -> Result<String, StringError> {
    let s = String::from_utf8(buf.to_vec())?;
    validate_utf8_string(&s)?;
    Ok(s)
}

/// Check byte length against the two-byte length prefix.
///
/// # Errors
///
/// Returns error if `data` is longer than 65535 bytes.
#[inline]
pub fn validate_two_bytes_data(data: &[u8]) -> Result<(), StringError> {
    if data.len() > u16::MAX as usize {
        Err(StringError::TooManyData)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_utf8_string() {
        assert!(validate_utf8_string("").is_ok());
        assert!(validate_utf8_string("sensors/kitchen/temp").is_ok());
        assert_eq!(
            validate_utf8_string("a\u{0000}b"),
            Err(StringError::SeriousError)
        );
        assert_eq!(
            validate_utf8_string("a\u{0007}b"),
            Err(StringError::InvalidChar)
        );
    }

    #[test]
    fn test_random_string() {
        let s = random_string(12);
        assert_eq!(s.len(), 12);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
