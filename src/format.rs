use thiserror::Error;

use crate::envelope::Envelope;

/// Upper bound on an expanded MDA buffer, including every substitution.
pub const EXPAND_BUFFER: usize = 4096;

/// Longest accepted token between `%{` and `}`, slice included.
const MAX_TOKEN: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("'%' must be followed by '%' or '{{'")]
    BareEscape,
    #[error("unterminated '%{{' in template")]
    Unterminated,
    #[error("token {0:?} too long")]
    TokenTooLong(String),
    #[error("unknown token {0:?}")]
    UnknownToken(String),
    #[error("malformed slice in token {0:?}")]
    BadSlice(String),
    #[error("token {0:?} expanded to an empty value")]
    Empty(String),
    #[error("slice out of range in token {0:?}")]
    OutOfRange(String),
    #[error("expansion exceeds {EXPAND_BUFFER} bytes")]
    TooLong,
}

/// Expands an MDA command or path template against an envelope.
///
/// `%%` emits a literal percent sign and `%{NAME}` or `%{NAME[SLICE]}`
/// substitutes an envelope field; any other use of `%` is an error, as
/// is an unterminated token. A leading `~/` resolves to the delivery
/// user's home directory. The result is ASCII-lowercased as a whole and
/// must stay under [`EXPAND_BUFFER`] bytes.
pub fn expand(template: &str, envelope: &Envelope) -> Result<String, FormatError> {
    let mut out = String::new();
    let mut rest = template;

    // ~/ is only meaningful at the very start of a template
    if let Some(stripped) = template.strip_prefix("~/") {
        let user = envelope
            .mda_user()
            .ok_or_else(|| FormatError::Empty("user.directory".to_owned()))?;
        out.push_str(&user.directory);
        out.push('/');
        rest = stripped;
    }

    let mut cursor = 0;
    while cursor < rest.len() {
        let Some(offset) = rest[cursor..].find('%') else {
            out.push_str(&rest[cursor..]);
            break;
        };
        out.push_str(&rest[cursor..cursor + offset]);
        let escape = cursor + offset;

        match rest[escape + 1..].chars().next() {
            Some('%') => {
                out.push('%');
                cursor = escape + 2;
            }
            Some('{') => {
                let close = rest[escape + 2..]
                    .find('}')
                    .ok_or(FormatError::Unterminated)?;
                let token = &rest[escape + 2..escape + 2 + close];
                if token.len() >= MAX_TOKEN {
                    return Err(FormatError::TokenTooLong(token.to_owned()));
                }
                out.push_str(&expand_token(token, envelope)?);
                cursor = escape + 2 + close + 1;
            }
            _ => return Err(FormatError::BareEscape),
        }

        if out.len() >= EXPAND_BUFFER {
            return Err(FormatError::TooLong);
        }
    }

    if out.len() >= EXPAND_BUFFER {
        return Err(FormatError::TooLong);
    }
    Ok(out.to_ascii_lowercase())
}

/// Expands a single `NAME` or `NAME[SLICE]` token.
fn expand_token(token: &str, envelope: &Envelope) -> Result<String, FormatError> {
    let (name, slice) = match token.find('[') {
        Some(open) => {
            let close = token[open + 1..]
                .find(']')
                .map(|off| open + 1 + off)
                .ok_or_else(|| FormatError::BadSlice(token.to_owned()))?;
            let content = &token[open + 1..close];
            if content.is_empty() {
                return Err(FormatError::BadSlice(token.to_owned()));
            }
            (&token[..open], Some(parse_slice(content, token)?))
        }
        None => (token, None),
    };

    let value = resolve(name, envelope).ok_or_else(|| FormatError::UnknownToken(name.to_owned()))?;

    let len = i64::try_from(value.len()).map_err(|_| FormatError::TooLong)?;
    if len == 0 {
        return Err(FormatError::Empty(name.to_owned()));
    }

    let (mut begin, mut end) = slice.unwrap_or((0, EXPAND_BUFFER as i64));
    if begin >= len {
        return Err(FormatError::OutOfRange(token.to_owned()));
    }
    if end >= len {
        end = len - 1;
    }
    if begin < 0 {
        begin += len;
    }
    // the end offset is inclusive, hence the extra -1 when anchored to
    // the end of the value
    if end < 0 {
        end += len - 1;
    }
    if begin < 0 || end < 0 || end < begin {
        return Err(FormatError::OutOfRange(token.to_owned()));
    }

    value
        .get(begin as usize..=end as usize)
        .map(str::to_owned)
        .ok_or_else(|| FormatError::OutOfRange(token.to_owned()))
}

/// Parses a `N` or `B:E` slice, either bound optional, each within
/// ±[`EXPAND_BUFFER`].
fn parse_slice(content: &str, token: &str) -> Result<(i64, i64), FormatError> {
    let bound = |text: &str| -> Result<i64, FormatError> {
        text.parse::<i64>()
            .ok()
            .filter(|v| v.unsigned_abs() <= EXPAND_BUFFER as u64)
            .ok_or_else(|| FormatError::BadSlice(token.to_owned()))
    };

    match content.split_once(':') {
        None => {
            let index = bound(content)?;
            Ok((index, index))
        }
        Some((begin, end)) => Ok((
            if begin.is_empty() { 0 } else { bound(begin)? },
            if end.is_empty() {
                EXPAND_BUFFER as i64
            } else {
                bound(end)?
            },
        )),
    }
}

fn resolve(name: &str, ep: &Envelope) -> Option<String> {
    let user = ep.mda_user();
    let value = if name.eq_ignore_ascii_case("sender") {
        format!("{}@{}", ep.sender.user, ep.sender.domain)
    } else if name.eq_ignore_ascii_case("dest") {
        format!("{}@{}", ep.dest.user, ep.dest.domain)
    } else if name.eq_ignore_ascii_case("rcpt") {
        format!("{}@{}", ep.rcpt.user, ep.rcpt.domain)
    } else if name.eq_ignore_ascii_case("sender.user") {
        ep.sender.user.clone()
    } else if name.eq_ignore_ascii_case("sender.domain") {
        ep.sender.domain.clone()
    } else if name.eq_ignore_ascii_case("dest.user") {
        ep.dest.user.clone()
    } else if name.eq_ignore_ascii_case("dest.domain") {
        ep.dest.domain.clone()
    } else if name.eq_ignore_ascii_case("rcpt.user") {
        ep.rcpt.user.clone()
    } else if name.eq_ignore_ascii_case("rcpt.domain") {
        ep.rcpt.domain.clone()
    } else if name.eq_ignore_ascii_case("user.username") {
        user.map(|u| u.username.clone()).unwrap_or_default()
    } else if name.eq_ignore_ascii_case("user.directory") {
        user.map(|u| u.directory.clone()).unwrap_or_default()
    } else {
        return None;
    };
    Some(value)
}
