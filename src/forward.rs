use std::{
    fs::File,
    io::{BufRead, BufReader, Read},
};

use thiserror::Error;

use crate::expand::{NodeKind, ParseNodeError};

/// Request to the privileged helper to open a user's forward file on
/// the session's behalf.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardRequest {
    pub id: u64,
    pub user: String,
}

/// The helper's answer. `status` reports whether the user exists; the
/// file is present only when a forward file was found and opened.
#[derive(Debug)]
pub struct ForwardReply {
    pub id: u64,
    pub status: bool,
    pub file: Option<File>,
}

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Malformed(#[from] ParseNodeError),
    #[error("unterminated quote in forward file")]
    UnterminatedQuote,
}

/// Parses a forward file into expansion targets: entries separated by
/// commas or whitespace, `#` starting a comment, double quotes
/// protecting commands that contain either. Any malformed entry rejects
/// the whole file.
pub fn parse(input: impl Read) -> Result<Vec<NodeKind>, ForwardError> {
    let mut targets = Vec::new();
    for line in BufReader::new(input).lines() {
        for token in tokenize(&line?)? {
            targets.push(token.parse()?);
        }
    }
    Ok(targets)
}

fn tokenize(line: &str) -> Result<Vec<String>, ForwardError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            '#' if !quoted => break,
            c if !quoted && (c == ',' || c.is_whitespace()) => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if quoted {
        return Err(ForwardError::UnterminatedQuote);
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::parse;
    use crate::expand::NodeKind;

    #[test]
    fn parses_entries() {
        let content = b"# mail for gilles\n\
            gilles@poolp.org, \\gilles\n\
            \"|/usr/bin/archive --dir /var/archive\" /var/mail/spare\n";
        let targets = parse(&content[..]).unwrap();
        assert_eq!(
            targets,
            vec![
                NodeKind::Address("gilles@poolp.org".parse().unwrap()),
                NodeKind::Username("gilles".to_owned()),
                NodeKind::Filter("/usr/bin/archive --dir /var/archive".to_owned()),
                NodeKind::Filename("/var/mail/spare".to_owned()),
            ]
        );
    }

    #[test]
    fn comments_and_blank_lines() {
        let targets = parse(&b"\n# nothing but comments\n   \n"[..]).unwrap();
        assert_eq!(targets, vec![]);
    }

    #[test]
    fn rejects_malformed_entries() {
        assert!(parse(&b"gilles, b^d!user\n"[..]).is_err());
        assert!(parse(&b"\"|/usr/bin/unbalanced\n"[..]).is_err());
    }
}
