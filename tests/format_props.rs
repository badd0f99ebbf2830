//! Property tests for the format expander: substitution/lowercasing
//! behaviour and the signed inclusive slice rules.

use std::time::Duration;

use fanout::{
    address::Mailaddr,
    envelope::{DeliveryAgent, Envelope, MdaMethod, UserInfo},
    format,
};
use proptest::prelude::*;

fn envelope_with(dest_user: &str) -> Envelope {
    Envelope {
        id: 1,
        sender: "sender@origin.example".parse().unwrap(),
        rcpt: "rcpt@example.org".parse().unwrap(),
        dest: Mailaddr {
            user: dest_user.to_owned(),
            domain: "example.org".to_owned(),
        },
        expire: Duration::ZERO,
        internal: false,
        agent: Some(DeliveryAgent::Mda {
            method: MdaMethod::Mbox,
            user: UserInfo {
                username: "alice".to_owned(),
                directory: "/home/alice".to_owned(),
                uid: 1000,
                gid: 1000,
            },
            buffer: String::new(),
        }),
    }
}

/// Builds (template, expected) pairs out of literal runs, `%%` escapes
/// and `%{dest.user}` substitutions, with `dest.user = "MixedCase"`.
fn template_strategy() -> impl Strategy<Value = (String, String)> {
    #[allow(clippy::expect_used, reason = "compile-time constant regex should be valid")]
    let literal = prop::string::string_regex("[a-z0-9/._ -]{0,12}")
        .expect("literal regex should be valid");
    let piece = prop_oneof![
        literal.prop_map(|s| (s.clone(), s)),
        Just(("%%".to_owned(), "%".to_owned())),
        Just(("%{dest.user}".to_owned(), "mixedcase".to_owned())),
    ];
    prop::collection::vec(piece, 0..8).prop_map(|pieces| {
        let mut template = String::new();
        let mut expected = String::new();
        for (t, e) in pieces {
            template.push_str(&t);
            expected.push_str(&e);
        }
        (template, expected)
    })
}

/// The documented slice rules, applied to a value of known length:
/// `None` means the expansion must fail.
fn model_slice(value: &str, begin: i64, end: i64) -> Option<String> {
    let len = i64::try_from(value.len()).ok()?;
    if len == 0 {
        return None;
    }
    let (mut begin, mut end) = (begin, end);
    if begin >= len {
        return None;
    }
    if end >= len {
        end = len - 1;
    }
    if begin < 0 {
        begin += len;
    }
    if end < 0 {
        end += len - 1;
    }
    if begin < 0 || end < 0 || end < begin {
        return None;
    }
    Some(value[begin as usize..=end as usize].to_ascii_lowercase())
}

proptest! {
    /// Substituted values come out lowercased, `%` escapes come out as
    /// single literal percent signs, and literal text is untouched.
    #[test]
    fn literals_and_substitutions_round_trip((template, expected) in template_strategy()) {
        let envelope = envelope_with("MixedCase");
        prop_assert_eq!(format::expand(&template, &envelope).unwrap(), expected);
    }

    /// Range slices match the documented adjust-then-clamp rules, and
    /// fail exactly when the rules say they fail.
    #[test]
    fn range_slices_match_the_rules(
        value in "[A-Za-z]{1,20}",
        begin in -40i64..40,
        end in -40i64..40,
    ) {
        let envelope = envelope_with(&value);
        let template = format!("%{{dest.user[{begin}:{end}]}}");
        match model_slice(&value, begin, end) {
            Some(expected) => {
                prop_assert_eq!(format::expand(&template, &envelope).unwrap(), expected);
            }
            None => prop_assert!(format::expand(&template, &envelope).is_err()),
        }
    }

    /// A single index behaves as a one-character range.
    #[test]
    fn single_index_slices(value in "[A-Za-z]{1,20}", index in -40i64..40) {
        let envelope = envelope_with(&value);
        let template = format!("%{{dest.user[{index}]}}");
        match model_slice(&value, index, index) {
            Some(expected) => {
                prop_assert_eq!(format::expand(&template, &envelope).unwrap(), expected);
            }
            None => prop_assert!(format::expand(&template, &envelope).is_err()),
        }
    }

    /// Whatever the input, the expander either fails or stays under the
    /// output bound.
    #[test]
    fn output_is_bounded(value in "[a-z]{1,64}", copies in 1usize..128) {
        let envelope = envelope_with(&value);
        let template = "%{dest.user}".repeat(copies);
        match format::expand(&template, &envelope) {
            Ok(expanded) => prop_assert!(expanded.len() < format::EXPAND_BUFFER),
            Err(error) => prop_assert_eq!(error, format::FormatError::TooLong),
        }
    }
}
