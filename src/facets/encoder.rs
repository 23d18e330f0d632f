//! Field/value lexeme encoding
//!
//! Every `(field, value)` pair becomes one token `field:value`. Backslash and
//! the delimiter are backslash-escaped inside both halves, so the single
//! unescaped `:` always marks the split and decoding is lossless.

use crate::facets::config::FacetConfig;
use crate::facets::error::{FacetError, FacetResult};
use crate::facets::record::{FieldValue, Filter};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;

/// Separates the field from the value inside a token
pub const DELIMITER: char = ':';

const ESCAPE: char = '\\';

/// Escape the delimiter and the escape character
pub fn escape(part: &str) -> Cow<'_, str> {
    if !part.contains(|c| c == DELIMITER || c == ESCAPE) {
        return Cow::Borrowed(part);
    }
    let mut out = String::with_capacity(part.len() + 4);
    for c in part.chars() {
        if c == DELIMITER || c == ESCAPE {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    Cow::Owned(out)
}

fn unescape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    let mut chars = part.chars();
    while let Some(c) = chars.next() {
        if c == ESCAPE {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Canonical encoding of one field/value pair
///
/// Only constructed through [`Encoder`] or [`Token::parse`], so the split
/// point is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Token {
    text: String,
    split: usize,
}

impl Token {
    /// Validate a raw token string
    pub fn parse(text: &str) -> FacetResult<Self> {
        let mut split = None;
        let mut escaped = false;

        for (idx, c) in text.char_indices() {
            if c.is_control() {
                return Err(FacetError::Encoding(format!(
                    "token contains control character U+{:04X}",
                    c as u32
                )));
            }
            if escaped {
                if c != DELIMITER && c != ESCAPE {
                    return Err(FacetError::Encoding(format!(
                        "invalid escape sequence '\\{}' in token",
                        c
                    )));
                }
                escaped = false;
            } else if c == ESCAPE {
                escaped = true;
            } else if c == DELIMITER {
                if split.is_some() {
                    return Err(FacetError::Encoding(format!(
                        "token '{}' contains more than one unescaped delimiter",
                        text
                    )));
                }
                split = Some(idx);
            }
        }

        if escaped {
            return Err(FacetError::Encoding("token ends with a dangling escape".to_string()));
        }
        let split = split.ok_or_else(|| {
            FacetError::Encoding(format!("token '{}' has no delimiter", text))
        })?;
        if split == 0 || split + DELIMITER.len_utf8() == text.len() {
            return Err(FacetError::Encoding(format!(
                "token '{}' has an empty field or value",
                text
            )));
        }

        Ok(Self {
            text: text.to_string(),
            split,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Field half, still escaped
    pub fn raw_field(&self) -> &str {
        &self.text[..self.split]
    }

    /// Value half, still escaped
    pub fn raw_value(&self) -> &str {
        &self.text[self.split + DELIMITER.len_utf8()..]
    }

    pub fn field(&self) -> String {
        unescape(self.raw_field())
    }

    pub fn value(&self) -> String {
        unescape(self.raw_value())
    }

    /// Recover the original `(field, value)`
    pub fn decode(&self) -> (String, String) {
        (self.field(), self.value())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl TryFrom<String> for Token {
    type Error = FacetError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        Token::parse(&text)
    }
}

impl From<Token> for String {
    fn from(token: Token) -> Self {
        token.text
    }
}

/// Deduplicated, sorted set of tokens attached to one record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSequence(BTreeSet<Token>);

impl TokenSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, token: Token) -> bool {
        self.0.insert(token)
    }

    pub fn contains(&self, token: &Token) -> bool {
        self.0.contains(token)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Token> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode every token back into field/value strings
    pub fn decode_all(&self) -> Vec<(String, String)> {
        self.0.iter().map(Token::decode).collect()
    }
}

impl FromIterator<Token> for TokenSequence {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for TokenSequence {
    type Item = Token;
    type IntoIter = std::collections::btree_set::IntoIter<Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a TokenSequence {
    type Item = &'a Token;
    type IntoIter = std::collections::btree_set::Iter<'a, Token>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Turns metadata into tokens
#[derive(Debug, Clone, Copy)]
pub struct Encoder {
    max_field_len: usize,
    max_value_len: usize,
}

impl Default for Encoder {
    fn default() -> Self {
        Self::from_config(&FacetConfig::default())
    }
}

impl Encoder {
    pub fn new(max_field_len: usize, max_value_len: usize) -> Self {
        Self {
            max_field_len,
            max_value_len,
        }
    }

    pub fn from_config(config: &FacetConfig) -> Self {
        Self::new(config.max_field_len, config.max_value_len)
    }

    /// Encode one pair of plain strings
    pub fn encode_str(&self, field: &str, value: &str) -> FacetResult<Token> {
        check_part("field", field, self.max_field_len)?;
        check_part("value", value, self.max_value_len)?;

        let field = escape(field);
        let value = escape(value);
        let mut text = String::with_capacity(field.len() + value.len() + 1);
        text.push_str(&field);
        text.push(DELIMITER);
        text.push_str(&value);

        Ok(Token {
            split: field.len(),
            text,
        })
    }

    /// Encode one pair, normalizing the value to its canonical form
    pub fn encode_pair(&self, field: &str, value: &FieldValue) -> FacetResult<Token> {
        let canonical = value.canonical()?;
        self.encode_str(field, &canonical)
    }

    /// Encode a record's metadata into a deduplicated sequence
    pub fn encode_record<'a, I>(&self, fields: I) -> FacetResult<TokenSequence>
    where
        I: IntoIterator<Item = (&'a String, &'a FieldValue)>,
    {
        fields
            .into_iter()
            .map(|(field, value)| self.encode_pair(field, value))
            .collect()
    }

    /// Encode a filter into its sorted, distinct containment tokens
    pub fn encode_filter(&self, filter: &Filter) -> FacetResult<Vec<Token>> {
        let tokens: BTreeSet<Token> = filter
            .clauses()
            .iter()
            .map(|clause| self.encode_pair(&clause.field, &clause.value))
            .collect::<FacetResult<_>>()?;
        Ok(tokens.into_iter().collect())
    }

    /// Decode a raw token string
    pub fn decode(&self, text: &str) -> FacetResult<(String, String)> {
        Token::parse(text).map(|token| token.decode())
    }
}

fn check_part(kind: &str, part: &str, max_len: usize) -> FacetResult<()> {
    if part.is_empty() {
        return Err(FacetError::Encoding(format!("{} must not be empty", kind)));
    }
    if part.len() > max_len {
        return Err(FacetError::Encoding(format!(
            "{} is {} bytes, limit is {}",
            kind,
            part.len(),
            max_len
        )));
    }
    if let Some(c) = part.chars().find(|c| c.is_control()) {
        return Err(FacetError::Encoding(format!(
            "{} contains control character U+{:04X}",
            kind, c as u32
        )));
    }
    Ok(())
}
