//! Version algebra for pack versions.
//!
//! Pack versions follow semantic versioning, with one ecosystem quirk:
//! numeric components may carry leading zeros (`01.02.03`), which must
//! compare equal to their canonical form. Every function here strips those
//! zeros before delegating to [`semver`] precedence rules.
//!
//! Ranges use the descriptor notation `min[:max]`, where `_` as `max` means
//! "no upper bound".

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;

/// Regular expression fragment matching one pack version, including optional
/// pre-release and build metadata.
pub const VERSION_PATTERN: &str = r"(?:\d+)\.(?:\d+)\.(?:\d+)(?:-(?:(?:\d+|\d*[a-zA-Z-][0-9a-zA-Z-]*)(?:\.(?:\d+|\d*[a-zA-Z-][0-9a-zA-Z-]*))*))?(?:\+(?:[0-9a-zA-Z-]+(?:\.[0-9a-zA-Z-]+)*))?";

/// Upper-bound sentinel meaning "unbounded" in a range expression.
pub const UNBOUNDED: &str = "_";

static VERSION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("^{VERSION_PATTERN}$")).expect("VERSION_PATTERN is a valid regex")
});

/// Returns true if `version` is a syntactically valid pack version.
pub fn is_valid(version: &str) -> bool {
    VERSION_REGEX.is_match(version)
}

/// Strips leading zeros from every dot-separated numeric component.
///
/// `"01.002.3-rc.01"` becomes `"1.2.3-rc.1"`; a lone `0` is preserved.
fn strip_leading_zeros(version: &str) -> String {
    version
        .split('.')
        .map(|segment| {
            let digits = segment.bytes().take_while(u8::is_ascii_digit).count();
            if digits < 2 {
                return segment.to_string();
            }
            let trimmed = segment[..digits].trim_start_matches('0');
            let kept = if trimmed.is_empty() { "0" } else { trimmed };
            format!("{kept}{}", &segment[digits..])
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Parses a version after normalisation; anything after `:` is ignored.
fn parse(version: &str) -> Option<semver::Version> {
    let normalized = strip_leading_zeros(version);
    let (head, _) = normalized.split_once(':').unwrap_or((&normalized, ""));
    semver::Version::parse(head).ok()
}

/// Precedence ordering: major, minor, patch, then pre-release. Build metadata
/// never takes part.
fn precedence(a: &semver::Version, b: &semver::Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then_with(|| a.minor.cmp(&b.minor))
        .then_with(|| a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Compares two versions by semantic-version precedence, tolerating leading
/// zeros.
///
/// Invalid versions sort before every valid one and compare equal to each
/// other.
///
/// ```
/// use std::cmp::Ordering;
/// use cpk_schema::version::compare;
///
/// assert_eq!(compare("01.2.3", "1.2.3"), Ordering::Equal);
/// assert_eq!(compare("1.2.3", "1.2.4"), Ordering::Less);
/// ```
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Some(a), Some(b)) => precedence(&a, &b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

/// Compares `version` against a range expression.
///
/// Accepted forms: `""` (anything), `"min"` (at least `min`), `":max"` (at
/// most `max`), `"min:max"` (inclusive) and `"min:_"` (unbounded above).
/// Returns [`Ordering::Equal`] when the version lies inside the range,
/// otherwise the side on which it misses.
pub fn compare_range(version: &str, range: &str) -> Ordering {
    let (low, high) = match range.split_once(':') {
        Some((low, high)) => (low, Some(high)),
        None => (range, None),
    };

    if let Some(high) = high {
        if !high.is_empty() && high != UNBOUNDED && compare(version, high) == Ordering::Greater {
            return Ordering::Greater;
        }
    }
    if !low.is_empty() && compare(version, low) == Ordering::Less {
        return Ordering::Less;
    }
    Ordering::Equal
}

/// Major component of a version (`"1"` for `"01.2.3"`), or an empty string
/// when the version is invalid.
pub fn major(version: &str) -> String {
    parse(version).map(|v| v.major.to_string()).unwrap_or_default()
}

/// `major.minor` projection of a version, or an empty string when invalid.
pub fn major_minor(version: &str) -> String {
    parse(version)
        .map(|v| format!("{}.{}", v.major, v.minor))
        .unwrap_or_default()
}

/// Returns true if the version carries `+meta` build metadata.
pub fn has_meta(version: &str) -> bool {
    version.contains('+')
}

/// Removes `+meta` build metadata, if any.
pub fn strip_meta(version: &str) -> &str {
    version.split_once('+').map_or(version, |(before, _)| before)
}

/// Whether a requested version selects a stored one.
///
/// A request without build metadata matches any stored build of the same
/// version (`1.2.3` selects `1.2.3+meta`). A request with metadata must match
/// it exactly.
pub fn same_version(requested: &str, stored: &str) -> bool {
    if compare(requested, stored) != Ordering::Equal {
        return false;
    }
    if has_meta(requested) {
        return requested.split_once('+').map(|(_, m)| m) == stored.split_once('+').map(|(_, m)| m);
    }
    true
}

/// Human-readable form of a descriptor range: `"5.6.0:_"` becomes
/// `">=5.6.0"`; anything else is returned unchanged.
pub fn format_range(range: &str) -> String {
    match range.split_once(':') {
        Some((low, UNBOUNDED)) => format!(">={low}"),
        _ => range.to_string(),
    }
}
