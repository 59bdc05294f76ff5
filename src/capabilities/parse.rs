//! Parsing of RouterOS-reported values
//!
//! Version strings arrive as `"7.12.1 (stable)"` and size fields as either
//! bare byte counts or suffixed decimals (`"512MiB"`). Both parsers are
//! total: unknown input degrades to zero values rather than failing
//! detection.

use regex::Regex;
use std::sync::LazyLock;

use super::snapshot::{ReleaseChannel, RouterOsVersion};

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("version pattern is valid"));

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*([0-9]+(?:\.[0-9]+)?)\s*(?:([KMGT])(?:I?B)?|B)?\s*$")
        .expect("size pattern is valid")
});

/// Parses a RouterOS version string.
///
/// The numeric triple comes from the first `M.m[.p]` match; the channel
/// from a keyword scan. Unparsable input yields a zero version carrying
/// the raw string.
pub fn parse_version(raw: &str) -> RouterOsVersion {
    let (major, minor, patch) = VERSION_RE
        .captures(raw)
        .map(|caps| {
            let major = caps[1].parse().unwrap_or(0);
            let minor = caps[2].parse().unwrap_or(0);
            let patch = caps
                .get(3)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            (major, minor, patch)
        })
        .unwrap_or((0, 0, 0));

    let lowered = raw.to_lowercase();
    let channel = if lowered.contains("stable") {
        ReleaseChannel::Stable
    } else if lowered.contains("testing") {
        ReleaseChannel::Testing
    } else if lowered.contains("development") {
        ReleaseChannel::Development
    } else {
        ReleaseChannel::Unknown
    };

    RouterOsVersion {
        major,
        minor,
        patch,
        channel,
        raw: raw.to_string(),
    }
}

/// Parses a size field into bytes.
///
/// Accepts a bare integer (bytes) or a decimal with one of the 1024-based
/// suffixes `K`/`KB`/`KiB`, `M`/`MB`/`MiB`, `G`/`GB`/`GiB`, `T`/`TB`/`TiB`
/// (case-insensitive). Returns 0 on unparsable input.
pub fn parse_size(raw: &str) -> u64 {
    let Some(caps) = SIZE_RE.captures(raw) else {
        return 0;
    };
    let Ok(value) = caps[1].parse::<f64>() else {
        return 0;
    };
    let multiplier: u64 = match caps.get(2).map(|m| m.as_str().to_ascii_uppercase()) {
        None => 1,
        Some(unit) => match unit.as_str() {
            "K" => 1 << 10,
            "M" => 1 << 20,
            "G" => 1 << 30,
            "T" => 1 << 40,
            _ => return 0,
        },
    };
    let bytes = value * multiplier as f64;
    if bytes.is_finite() && bytes >= 0.0 {
        bytes.round() as u64
    } else {
        0
    }
}

/// Renders a byte count with the largest exactly-dividing 1024 unit, so
/// `parse_size(format_size(n)) == n` for every `n`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [(&str, u64); 4] = [
        ("TiB", 1 << 40),
        ("GiB", 1 << 30),
        ("MiB", 1 << 20),
        ("KiB", 1 << 10),
    ];
    for (suffix, factor) in UNITS {
        if bytes >= factor && bytes % factor == 0 {
            return format!("{}{}", bytes / factor, suffix);
        }
    }
    bytes.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn version_with_patch_and_channel() {
        let v = parse_version("7.12.1 (stable)");
        assert_eq!((v.major, v.minor, v.patch), (7, 12, 1));
        assert_eq!(v.channel, ReleaseChannel::Stable);
        assert_eq!(v.raw, "7.12.1 (stable)");
    }

    #[test]
    fn version_without_patch_defaults_to_zero() {
        let v = parse_version("7.12 (testing)");
        assert_eq!((v.major, v.minor, v.patch), (7, 12, 0));
        assert_eq!(v.channel, ReleaseChannel::Testing);
    }

    #[test]
    fn version_unparsable_is_zeroed() {
        let v = parse_version("RouterOS");
        assert_eq!((v.major, v.minor, v.patch), (0, 0, 0));
        assert_eq!(v.channel, ReleaseChannel::Unknown);
    }

    #[test]
    fn size_bare_bytes() {
        assert_eq!(parse_size("536870912"), 536_870_912);
        assert_eq!(parse_size("0"), 0);
    }

    #[test]
    fn size_suffixes_use_powers_of_1024() {
        assert_eq!(parse_size("1K"), 1024);
        assert_eq!(parse_size("1KB"), 1024);
        assert_eq!(parse_size("1KiB"), 1024);
        assert_eq!(parse_size("1kib"), 1024);
        assert_eq!(parse_size("512MiB"), 512 << 20);
        assert_eq!(parse_size("2G"), 2 << 30);
        assert_eq!(parse_size("1.5M"), (1.5 * 1024.0 * 1024.0) as u64);
        assert_eq!(parse_size("1TB"), 1 << 40);
    }

    #[test]
    fn size_unparsable_is_zero() {
        assert_eq!(parse_size("lots"), 0);
        assert_eq!(parse_size("12XB"), 0);
        assert_eq!(parse_size(""), 0);
    }

    #[test]
    fn format_picks_exact_units() {
        assert_eq!(format_size(1024), "1KiB");
        assert_eq!(format_size(536_870_912), "512MiB");
        assert_eq!(format_size(1500), "1500");
        assert_eq!(format_size(1 << 40), "1TiB");
    }

    proptest! {
        #[test]
        fn parse_inverts_format(bytes in 0u64..=1 << 50) {
            prop_assert_eq!(parse_size(&format_size(bytes)), bytes);
        }
    }
}
