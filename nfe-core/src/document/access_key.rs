//! NF-e access key (chave de acesso): format and modulo-11 check digit.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of digits in an access key.
pub const ACCESS_KEY_LEN: usize = 44;

/// Textual prefix of the `infNFe/@Id` attribute.
pub const IDENTIFIER_PREFIX: &str = "NFe";

/// Errors emitted while validating an access key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("access key must be exactly 44 digits (got {length} characters, {digits} digits)")]
    Format { length: usize, digits: usize },
    #[error("access key check digit mismatch: expected {expected}, found {found}")]
    CheckDigitMismatch { expected: u8, found: u8 },
}

/// Validate format and check digit of a caller-supplied key.
///
/// Surrounding whitespace is ignored; anything else that is not a digit is a format error.
///
/// # Examples
/// ```rust
/// use nfe_core::document::access_key::{validate, KeyError};
///
/// assert!(validate("35250732409620000175550010000037471011544648").is_ok());
/// assert!(matches!(
///     validate("35250732409620000175550010000037471011544647"),
///     Err(KeyError::CheckDigitMismatch { expected: 8, found: 7 })
/// ));
/// ```
pub fn validate(key: &str) -> Result<(), KeyError> {
    let trimmed = key.trim();
    check_format(trimmed)?;

    let (base, last) = trimmed.split_at(ACCESS_KEY_LEN - 1);
    let found = last.as_bytes()[0] - b'0';
    // base is 43 ASCII digits at this point
    let expected = check_digit(base).unwrap_or_default();
    if expected != found {
        return Err(KeyError::CheckDigitMismatch { expected, found });
    }
    Ok(())
}

fn check_format(key: &str) -> Result<(), KeyError> {
    let digits = key.bytes().filter(u8::is_ascii_digit).count();
    if digits != ACCESS_KEY_LEN || key.len() != ACCESS_KEY_LEN {
        return Err(KeyError::Format {
            length: key.chars().count(),
            digits,
        });
    }
    Ok(())
}

/// Modulo-11 check digit over the 43-digit base of a key.
///
/// Digits are weighted 2..=9 from right to left, cycling back to 2. A remainder of 0 or 1
/// yields 0, otherwise the digit is `11 - remainder`. Returns `None` if `base` is not exactly
/// 43 ASCII digits.
pub fn check_digit(base: &str) -> Option<u8> {
    if base.len() != ACCESS_KEY_LEN - 1 || !base.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let mut weight = 2u32;
    let mut sum = 0u32;
    for b in base.bytes().rev() {
        sum += u32::from(b - b'0') * weight;
        weight = if weight == 9 { 2 } else { weight + 1 };
    }
    match sum % 11 {
        0 | 1 => Some(0),
        remainder => Some((11 - remainder) as u8),
    }
}

/// A 44-digit access key.
///
/// Holding an `AccessKey` guarantees the format only; call [`AccessKey::validate`] (or build
/// it through [`AccessKey::parse`]) to check the digit as well. Deserialization enforces the
/// same format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

impl AccessKey {
    /// Parse a caller-supplied key, checking format and check digit.
    pub fn parse(key: &str) -> Result<Self, KeyError> {
        validate(key)?;
        Ok(Self(key.trim().to_string()))
    }

    /// Derive the key from an `infNFe/@Id` attribute.
    ///
    /// A 47-character identifier loses its `NFe` prefix; a bare 44-digit value is used as is.
    /// Anything else yields `None`. The check digit is not verified here.
    ///
    /// # Examples
    /// ```rust
    /// use nfe_core::document::AccessKey;
    ///
    /// let key = AccessKey::from_identifier("NFe35250732409620000175550010000037471011544648")
    ///     .expect("derivable");
    /// assert_eq!(key.as_str(), "35250732409620000175550010000037471011544648");
    /// assert!(AccessKey::from_identifier("NFe123").is_none());
    /// ```
    pub fn from_identifier(identifier: &str) -> Option<Self> {
        let identifier = identifier.trim();
        let digits = match identifier.len() {
            len if len == ACCESS_KEY_LEN + IDENTIFIER_PREFIX.len() => {
                identifier.strip_prefix(IDENTIFIER_PREFIX)?
            }
            ACCESS_KEY_LEN => identifier,
            _ => return None,
        };
        digits
            .bytes()
            .all(|b| b.is_ascii_digit())
            .then(|| Self(digits.to_string()))
    }

    /// Verify the trailing check digit.
    pub fn validate(&self) -> Result<(), KeyError> {
        validate(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// IBGE code of the issuing state (cUF).
    pub fn jurisdiction(&self) -> &str {
        &self.0[0..2]
    }

    /// Issue year and month as `YYMM`.
    pub fn year_month(&self) -> &str {
        &self.0[2..6]
    }

    pub fn issuer_cnpj(&self) -> &str {
        &self.0[6..20]
    }

    pub fn model(&self) -> &str {
        &self.0[20..22]
    }

    pub fn series(&self) -> &str {
        &self.0[22..25]
    }

    pub fn number(&self) -> &str {
        &self.0[25..34]
    }

    pub fn emission_type(&self) -> &str {
        &self.0[34..35]
    }

    pub fn numeric_code(&self) -> &str {
        &self.0[35..43]
    }

    pub fn check_digit(&self) -> u8 {
        self.0.as_bytes()[ACCESS_KEY_LEN - 1] - b'0'
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for AccessKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        check_format(&value)?;
        Ok(Self(value))
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
