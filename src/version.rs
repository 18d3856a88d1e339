use semver::{Version, VersionReq};

use crate::error::{Error, Result};

/// Normalizes shorthand binary versions to full semver:
/// `"1"` → `"1.0.0"`, `"1.2"` → `"1.2.0"`, `"1.2-beta"` → `"1.2.0-beta"`,
/// `"1.0+build"` → `"1.0.0+build"`. Already-complete versions pass through.
pub fn normalize_version(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::Invalid("app version is empty".to_string()));
    }

    let suffix_at = raw.find(['-', '+']);
    let (base, suffix) = match suffix_at {
        Some(i) => raw.split_at(i),
        None => (raw, ""),
    };

    let normalized = match base.matches('.').count() {
        0 => format!("{base}.0.0{suffix}"),
        1 => format!("{base}.0{suffix}"),
        _ => raw.to_string(),
    };

    Version::parse(&normalized)
        .map_err(|_| Error::Invalid(format!("invalid app version '{raw}'")))?;
    Ok(normalized)
}

pub fn parse_version(raw: &str) -> Result<Version> {
    let normalized = normalize_version(raw)?;
    Version::parse(&normalized).map_err(|_| Error::Invalid(format!("invalid app version '{raw}'")))
}

/// A release's binary-version constraint: either an exact version or a
/// semver range (`1.2.x`, `^1.2.3`, `>=1.0.0 <2.0.0`).
#[derive(Debug, Clone)]
pub enum AppVersion {
    Exact(Version),
    Range(VersionReq),
}

impl AppVersion {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::Invalid("app version is empty".to_string()));
        }
        if let Ok(v) = Version::parse(raw) {
            return Ok(AppVersion::Exact(v));
        }
        if let Ok(r) = VersionReq::parse(raw) {
            return Ok(AppVersion::Range(r));
        }
        // Node-style ranges separate comparators with spaces.
        let joined = raw.split_whitespace().collect::<Vec<_>>().join(", ");
        VersionReq::parse(&joined)
            .map(AppVersion::Range)
            .map_err(|_| Error::Invalid(format!("invalid app version range '{raw}'")))
    }

    #[must_use]
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            // Build metadata does not participate in matching.
            AppVersion::Exact(exact) => {
                exact.major == version.major
                    && exact.minor == version.minor
                    && exact.patch == version.patch
                    && exact.pre == version.pre
            }
            AppVersion::Range(req) => req.matches(version),
        }
    }

    /// True when `version` is strictly newer than an exact constraint.
    /// Ranges have no total upper bound, so they never compare greater.
    #[must_use]
    pub fn strictly_below(&self, version: &Version) -> bool {
        match self {
            AppVersion::Exact(exact) => version > exact,
            AppVersion::Range(_) => false,
        }
    }
}

/// Whether two release app versions target the same binary population,
/// used to pick diff candidates.
#[must_use]
pub fn versions_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (AppVersion::parse(a), AppVersion::parse(b)) {
        (Ok(AppVersion::Exact(va)), Ok(AppVersion::Exact(vb))) => va == vb,
        (Ok(AppVersion::Exact(v)), Ok(AppVersion::Range(r)))
        | (Ok(AppVersion::Range(r)), Ok(AppVersion::Exact(v))) => r.matches(&v),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_shorthand() {
        assert_eq!(normalize_version("1").unwrap(), "1.0.0");
        assert_eq!(normalize_version("1.0").unwrap(), "1.0.0");
        assert_eq!(normalize_version("1.2.3").unwrap(), "1.2.3");
    }

    #[test]
    fn test_normalize_preserves_tags() {
        assert_eq!(normalize_version("1.0+build").unwrap(), "1.0.0+build");
        assert_eq!(normalize_version("1.2-beta").unwrap(), "1.2.0-beta");
        assert_eq!(normalize_version("2.0.0-rc.1").unwrap(), "2.0.0-rc.1");
    }

    #[test]
    fn test_normalize_rejects_garbage() {
        assert!(normalize_version("").is_err());
        assert!(normalize_version("abc").is_err());
        assert!(normalize_version("1.2.3.4").is_err());
    }

    #[test]
    fn test_exact_satisfaction() {
        let av = AppVersion::parse("1.2.3").unwrap();
        assert!(av.satisfies(&Version::parse("1.2.3").unwrap()));
        assert!(!av.satisfies(&Version::parse("1.2.4").unwrap()));
        assert!(!av.satisfies(&Version::parse("1.2.3-beta").unwrap()));
    }

    #[test]
    fn test_range_satisfaction() {
        let av = AppVersion::parse("1.2.x").unwrap();
        assert!(av.satisfies(&Version::parse("1.2.0").unwrap()));
        assert!(av.satisfies(&Version::parse("1.2.9").unwrap()));
        assert!(!av.satisfies(&Version::parse("1.3.0").unwrap()));

        let av = AppVersion::parse(">=1.0.0 <2.0.0").unwrap();
        assert!(av.satisfies(&Version::parse("1.5.0").unwrap()));
        assert!(!av.satisfies(&Version::parse("2.0.0").unwrap()));
    }

    #[test]
    fn test_strictly_below() {
        let av = AppVersion::parse("1.0.0").unwrap();
        assert!(av.strictly_below(&Version::parse("2.0.0").unwrap()));
        assert!(!av.strictly_below(&Version::parse("1.0.0").unwrap()));
        assert!(!AppVersion::parse("1.x")
            .unwrap()
            .strictly_below(&Version::parse("9.0.0").unwrap()));
    }

    #[test]
    fn test_versions_match() {
        assert!(versions_match("1.0.0", "1.0.0"));
        assert!(versions_match("1.0.0", "1.x"));
        assert!(versions_match("1.x", "1.0.0"));
        assert!(!versions_match("1.0.0", "2.0.0"));
        assert!(versions_match("1.2.x", "1.2.x"));
    }
}
