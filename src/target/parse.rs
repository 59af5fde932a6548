//! Raw target classification

use crate::target::{ParsedTarget, TargetKind, TargetSpec};
use crate::InvalidTarget;
use url::Url;

const MAX_COMMUNITY_NAME: usize = 21;
const MAX_USER_NAME: usize = 20;
const MAX_POST_ID: usize = 13;

/// Classifies a raw target string
///
/// Recognized forms:
///
/// | Input | Result |
/// |-------|--------|
/// | `r/<name>` | community |
/// | `u/<name>`, `user/<name>` | user |
/// | `p/<id>` | post |
/// | `https://…/comments/<id>/…`, `https://redd.it/<id>` | post |
/// | `previous/<letters>` (letters from `r`, `u`, `p`) | previous-alias |
///
/// A leading or trailing `/` is tolerated on the short forms. Anything else fails
/// with [`InvalidTarget`].
///
/// # Example
///
/// ```
/// use thread_archiver::target::{parse_target, ParsedTarget, TargetKind};
///
/// let parsed = parse_target("r/rust").unwrap();
/// assert!(matches!(parsed, ParsedTarget::Direct(spec) if spec.kind == TargetKind::Community));
/// assert!(parse_target("rust").is_err());
/// ```
pub fn parse_target(raw: &str) -> Result<ParsedTarget, InvalidTarget> {
    let input = raw.trim();
    if input.is_empty() {
        return Err(InvalidTarget::new(raw, "empty target"));
    }

    if input.starts_with("http://") || input.starts_with("https://") {
        return parse_permalink(raw, input).map(ParsedTarget::Direct);
    }

    let short = input.trim_start_matches('/').trim_end_matches('/');
    let Some((prefix, rest)) = short.split_once('/') else {
        return Err(InvalidTarget::new(
            raw,
            "expected r/<name>, u/<name>, p/<id>, a post permalink or previous/<letters>",
        ));
    };

    match prefix {
        "r" => validate_community(raw, rest)
            .map(|name| ParsedTarget::Direct(TargetSpec::new(TargetKind::Community, name))),
        "u" | "user" => validate_user(raw, rest)
            .map(|name| ParsedTarget::Direct(TargetSpec::new(TargetKind::User, name))),
        "p" => validate_post_id(raw, rest)
            .map(|id| ParsedTarget::Direct(TargetSpec::new(TargetKind::Post, id))),
        "previous" => parse_previous(raw, rest).map(ParsedTarget::Previous),
        other => Err(InvalidTarget::new(
            raw,
            format!("unknown target prefix '{}'", other),
        )),
    }
}

fn validate_community<'a>(raw: &str, name: &'a str) -> Result<&'a str, InvalidTarget> {
    validate_name(raw, name, MAX_COMMUNITY_NAME, |c| {
        c.is_ascii_alphanumeric() || c == '_'
    })
}

fn validate_user<'a>(raw: &str, name: &'a str) -> Result<&'a str, InvalidTarget> {
    validate_name(raw, name, MAX_USER_NAME, |c| {
        c.is_ascii_alphanumeric() || c == '_' || c == '-'
    })
}

fn validate_post_id<'a>(raw: &str, id: &'a str) -> Result<&'a str, InvalidTarget> {
    validate_name(raw, id, MAX_POST_ID, |c| c.is_ascii_alphanumeric())
}

fn validate_name<'a>(
    raw: &str,
    name: &'a str,
    max_len: usize,
    allowed: impl Fn(char) -> bool,
) -> Result<&'a str, InvalidTarget> {
    if name.is_empty() {
        return Err(InvalidTarget::new(raw, "missing name"));
    }

    if name.len() > max_len {
        return Err(InvalidTarget::new(
            raw,
            format!("name longer than {} characters", max_len),
        ));
    }

    if let Some(bad) = name.chars().find(|c| !allowed(*c)) {
        return Err(InvalidTarget::new(
            raw,
            format!("invalid character '{}'", bad),
        ));
    }

    Ok(name)
}

/// Parses the `<letters>` part of `previous/<letters>`
fn parse_previous(raw: &str, letters: &str) -> Result<Vec<TargetKind>, InvalidTarget> {
    if letters.is_empty() {
        return Err(InvalidTarget::new(
            raw,
            "previous/ needs at least one of r, u, p",
        ));
    }

    let mut kinds = Vec::new();
    for c in letters.chars() {
        let kind = TargetKind::from_prefix(c).ok_or_else(|| {
            InvalidTarget::new(raw, format!("'{}' is not one of r, u, p", c))
        })?;

        if !kinds.contains(&kind) {
            kinds.push(kind);
        }
    }

    Ok(kinds)
}

/// Extracts the post id from a permalink
///
/// Accepts `…/comments/<id>[/<slug>…]` on any host, and the `redd.it/<id>` short form.
fn parse_permalink(raw: &str, input: &str) -> Result<TargetSpec, InvalidTarget> {
    let url =
        Url::parse(input).map_err(|e| InvalidTarget::new(raw, format!("bad permalink: {}", e)))?;

    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let id = if url.host_str() == Some("redd.it") {
        segments.first().copied()
    } else {
        segments
            .iter()
            .position(|seg| *seg == "comments")
            .and_then(|i| segments.get(i + 1).copied())
    };

    let id = id.ok_or_else(|| InvalidTarget::new(raw, "permalink does not point to a post"))?;
    validate_post_id(raw, id).map(|id| TargetSpec::new(TargetKind::Post, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct(raw: &str) -> TargetSpec {
        match parse_target(raw) {
            Ok(ParsedTarget::Direct(spec)) => spec,
            other => panic!("expected direct target for {:?}, got {:?}", raw, other),
        }
    }

    #[test]
    fn test_short_forms() {
        assert_eq!(direct("r/rust"), TargetSpec::new(TargetKind::Community, "rust"));
        assert_eq!(direct("u/spez"), TargetSpec::new(TargetKind::User, "spez"));
        assert_eq!(direct("user/Some-One"), TargetSpec::new(TargetKind::User, "some-one"));
        assert_eq!(direct("p/1abcde"), TargetSpec::new(TargetKind::Post, "1abcde"));
        assert_eq!(direct("/r/AskScience/"), TargetSpec::new(TargetKind::Community, "askscience"));
    }

    #[test]
    fn test_permalinks() {
        assert_eq!(
            direct("https://www.reddit.com/r/rust/comments/1abcde/some_title/"),
            TargetSpec::new(TargetKind::Post, "1abcde")
        );
        assert_eq!(
            direct("https://old.reddit.com/comments/xyz12"),
            TargetSpec::new(TargetKind::Post, "xyz12")
        );
        assert_eq!(
            direct("https://redd.it/q1w2e3"),
            TargetSpec::new(TargetKind::Post, "q1w2e3")
        );
    }

    #[test]
    fn test_previous_alias() {
        assert_eq!(
            parse_target("previous/ru").unwrap(),
            ParsedTarget::Previous(vec![TargetKind::Community, TargetKind::User])
        );
        assert_eq!(
            parse_target("previous/p").unwrap(),
            ParsedTarget::Previous(vec![TargetKind::Post])
        );
        assert!(parse_target("previous/").is_err());
        assert!(parse_target("previous/rx").is_err());
        // Repeated letters select the kind once
        assert_eq!(
            parse_target("previous/rur").unwrap(),
            ParsedTarget::Previous(vec![TargetKind::Community, TargetKind::User])
        );
    }

    #[test]
    fn test_every_string_classifies_into_exactly_one_form() {
        let valid = [
            "r/test",
            "u/test_user",
            "p/abc123",
            "https://www.reddit.com/r/test/comments/abc123/title/",
            "previous/rup",
        ];
        for raw in valid {
            assert!(parse_target(raw).is_ok(), "{} should be valid", raw);
        }

        let invalid = [
            "",
            "   ",
            "test",
            "r/",
            "x/test",
            "r/has space",
            "r/has.dot",
            "u/bad!name",
            "p/abc-123",
            "r/thisnameiswaytoolongforacommunity",
            "https://www.reddit.com/r/test/",
            "https://example.com/about",
            "ftp://reddit.com/comments/abc",
        ];
        for raw in invalid {
            assert!(parse_target(raw).is_err(), "{:?} should be invalid", raw);
        }
    }
}
