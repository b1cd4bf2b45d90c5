//! `WWW-Authenticate` bearer challenge parsing.
//!
//! Registries answer an unauthenticated `GET /v2/` with a challenge such as:
//!
//! ```text
//! Bearer realm="https://auth.example.com/token",service="registry.example.com",scope="repository:team/app:pull"
//! ```
//!
//! Parameter values may be bare tokens or quoted strings. Quoted strings may
//! contain commas and backslash escapes.

use reqwest::Url;
use std::collections::HashMap;
use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChallengeError {
    #[error("challenge scheme is not Bearer")]
    NotBearer,

    #[error("malformed challenge parameters: {0}")]
    Malformed(String),

    #[error("challenge has no realm")]
    MissingRealm,

    #[error("challenge realm is not an absolute URL: {0}")]
    InvalidRealm(String),
}

/// A parsed bearer challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// Token service endpoint.
    pub realm: Url,
    /// Service name to request a token for. Empty if the registry sent none.
    pub service: String,
    /// Scope the registry suggested, if any.
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parse a single `WWW-Authenticate` header value.
    pub fn parse(header: &str) -> Result<Self, ChallengeError> {
        let header = header.trim();
        let (scheme, rest) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));

        if !scheme.eq_ignore_ascii_case("bearer") {
            return Err(ChallengeError::NotBearer);
        }

        let mut params = parse_params(rest)?;

        let realm = params
            .remove("realm")
            .filter(|r| !r.is_empty())
            .ok_or(ChallengeError::MissingRealm)?;
        let realm = Url::parse(&realm).map_err(|e| ChallengeError::InvalidRealm(e.to_string()))?;

        Ok(Self {
            realm,
            service: params.remove("service").unwrap_or_default(),
            scope: params.remove("scope").filter(|s| !s.is_empty()),
        })
    }
}

/// Parse `key=value` pairs separated by commas. Keys are case-insensitive;
/// the first occurrence of a key wins.
fn parse_params(input: &str) -> Result<HashMap<String, String>, ChallengeError> {
    let mut params = HashMap::new();
    let mut chars = input.chars().peekable();

    loop {
        skip_while(&mut chars, |c| c == ',' || c.is_whitespace());
        if chars.peek().is_none() {
            break;
        }

        let key = take_while(&mut chars, |c| c != '=' && c != ',' && !c.is_whitespace());
        if key.is_empty() {
            return Err(ChallengeError::Malformed("empty parameter name".to_string()));
        }

        skip_while(&mut chars, char::is_whitespace);
        if chars.next() != Some('=') {
            return Err(ChallengeError::Malformed(format!(
                "parameter {key} has no value"
            )));
        }
        skip_while(&mut chars, char::is_whitespace);

        let value = if chars.peek() == Some(&'"') {
            chars.next();
            quoted_string(&mut chars)
                .ok_or_else(|| ChallengeError::Malformed(format!("unterminated value for {key}")))?
        } else {
            take_while(&mut chars, |c| c != ',' && !c.is_whitespace())
        };

        params.entry(key.to_ascii_lowercase()).or_insert(value);
    }

    Ok(params)
}

/// Read up to the closing quote, resolving backslash escapes.
/// `None` if the input ends first.
fn quoted_string(chars: &mut Peekable<Chars<'_>>) -> Option<String> {
    let mut value = String::new();
    loop {
        match chars.next()? {
            '"' => return Some(value),
            '\\' => value.push(chars.next()?),
            c => value.push(c),
        }
    }
}

fn take_while(chars: &mut Peekable<Chars<'_>>, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn skip_while(chars: &mut Peekable<Chars<'_>>, skip: impl Fn(char) -> bool) {
    while chars.peek().is_some_and(|&c| skip(c)) {
        chars.next();
    }
}
