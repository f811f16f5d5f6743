// src/auth/challenge.rs

//! Tokenizer for a single `WWW-Authenticate` / `Proxy-Authenticate` value.
//!
//! A challenge looks like either
//!
//! ```text
//! Digest realm="x", nonce="abc", qop="auth,auth-int"
//! Negotiate YIIFzgYGKwYBBQUCoIIFwjCCBb4=
//! ```
//!
//! The first token is the scheme. What follows is either a comma separated
//! list of `name=value` pairs or a single base64 blob, depending on the
//! scheme. The tokenizer exposes both views and lets the handler choose.

use std::borrow::Cow;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use http::HeaderValue;

/// Standard alphabet, accepting blobs with or without trailing padding.
pub(crate) const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A parsed view over one challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeTokenizer {
    text: String,
    scheme: String,
    params: String,
}

impl ChallengeTokenizer {
    pub fn new(challenge: &str) -> Self {
        let text = trim_lws(challenge);
        let (scheme, params) = match text.find(is_lws) {
            Some(i) => (&text[..i], trim_lws(&text[i..])),
            None => (text, ""),
        };

        ChallengeTokenizer {
            text: text.to_owned(),
            scheme: normalize_scheme(scheme).unwrap_or_default(),
            params: params.to_owned(),
        }
    }

    /// Header bytes are ISO-8859-1; they are decoded before tokenizing so
    /// that realms come out as proper UTF-8.
    pub fn from_header(value: &HeaderValue) -> Self {
        let (text, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(value.as_bytes());
        ChallengeTokenizer::new(&text)
    }

    /// The whole challenge, trimmed.
    pub fn challenge_text(&self) -> &str {
        &self.text
    }

    /// The lowercase scheme, or `""` if the first token was not a valid
    /// HTTP token.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after the scheme.
    pub fn params(&self) -> &str {
        &self.params
    }

    pub fn param_pairs(&self) -> ParamPairs<'_> {
        ParamPairs {
            rest: &self.params,
            valid: true,
        }
    }

    /// The params viewed as one base64 blob.
    ///
    /// Excess `=` padding is stripped until the length is a multiple of four,
    /// so that `Zm9v==` still decodes.
    pub fn base64_param(&self) -> &str {
        let bytes = self.params.as_bytes();
        let mut len = bytes.len();
        while len > 0 && len % 4 != 0 && bytes[len - 1] == b'=' {
            len -= 1;
        }
        &self.params[..len]
    }
}

/// Iterator over `name=value` params. Quoted values are unescaped.
///
/// A malformed element stops the iteration and marks the iterator invalid;
/// check [`ParamPairs::valid`] after the loop.
#[derive(Debug, Clone)]
pub struct ParamPairs<'a> {
    rest: &'a str,
    valid: bool,
}

impl<'a> ParamPairs<'a> {
    pub fn valid(&self) -> bool {
        self.valid
    }
}

impl<'a> Iterator for ParamPairs<'a> {
    type Item = (&'a str, Cow<'a, str>);

    fn next(&mut self) -> Option<Self::Item> {
        if !self.valid {
            return None;
        }

        let element = loop {
            if self.rest.is_empty() {
                return None;
            }
            let (element, rest) = split_element(self.rest);
            self.rest = rest;
            let element = trim_lws(element);
            if !element.is_empty() {
                break element;
            }
        };

        let Some(eq) = element.find('=') else {
            self.valid = false;
            return None;
        };
        let name = trim_lws(&element[..eq]);
        if name.is_empty() {
            self.valid = false;
            return None;
        }

        let value = trim_lws(&element[eq + 1..]);
        let value = if value.starts_with('"') {
            Cow::Owned(unquote(value))
        } else {
            Cow::Borrowed(value)
        };
        Some((name, value))
    }
}

/// The last `realm` param, or `""` when there is none. `None` if the
/// params are malformed.
pub(crate) fn parse_realm(challenge: &ChallengeTokenizer) -> Option<String> {
    let mut realm = String::new();
    let mut pairs = challenge.param_pairs();
    for (name, value) in pairs.by_ref() {
        if name.eq_ignore_ascii_case("realm") {
            realm = value.into_owned();
        }
    }
    pairs.valid().then_some(realm)
}

/// Lowercase `scheme` if it is a valid HTTP token.
pub fn normalize_scheme(scheme: &str) -> Option<String> {
    if !scheme.is_empty() && scheme.bytes().all(is_token_char) {
        Some(scheme.to_ascii_lowercase())
    } else {
        None
    }
}

fn is_token_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

fn is_lws(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn trim_lws(s: &str) -> &str {
    s.trim_matches(is_lws)
}

/// Split at the first comma outside a quoted string.
fn split_element(s: &str) -> (&str, &str) {
    let mut in_quote = false;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quote => escaped = true,
            '"' => in_quote = !in_quote,
            ',' if !in_quote => return (&s[..i], &s[i + 1..]),
            _ => {}
        }
    }
    (s, "")
}

fn unquote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().skip(1);
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '"' => break,
            c => out.push(c),
        }
    }
    out
}
