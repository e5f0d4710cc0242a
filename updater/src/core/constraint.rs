//! Version constraint matching.
//!
//! Constraints are semver requirements (`^1.0`, `~1.2.3`, `>=1, <2`, `*`).
//! Alternatives are separated by `||`. Versions with missing minor or patch
//! components are padded with zeros before parsing.

use semver::{Version, VersionReq};

/// Parse a version string, padding `1` / `1.2` to `1.0.0` / `1.2.0`.
pub fn parse_version(raw: &str) -> Result<Version, String> {
    let trimmed = raw.trim().trim_start_matches('v');
    if let Ok(version) = Version::parse(trimmed) {
        return Ok(version);
    }

    let (core, suffix) = match trimmed.find(['-', '+']) {
        Some(idx) => trimmed.split_at(idx),
        None => (trimmed, ""),
    };
    let mut parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(format!("invalid version '{}'", raw));
    }
    while parts.len() < 3 {
        parts.push("0");
    }
    let padded = format!("{}{}", parts.join("."), suffix);
    Version::parse(&padded).map_err(|err| format!("invalid version '{}': {}", raw, err))
}

/// A parsed constraint: any of the alternatives must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    alternatives: Vec<VersionReq>,
}

impl Constraint {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut alternatives = Vec::new();
        for part in raw.split("||") {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("empty alternative in constraint '{}'", raw));
            }
            let req = VersionReq::parse(part)
                .map_err(|err| format!("invalid constraint '{}': {}", raw, err))?;
            alternatives.push(req);
        }
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|req| req.matches(version))
    }
}

/// Returns true if `version` satisfies `constraint`.
///
/// Unparseable input never satisfies: an installed version that cannot be
/// compared has to be replaced.
pub fn satisfies(version: &str, constraint: &str) -> bool {
    match (parse_version(version), Constraint::parse(constraint)) {
        (Ok(version), Ok(constraint)) => constraint.matches(&version),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn caret_constraint_matches_same_major() {
        assert!(satisfies("1.4.2", "^1.0.0"));
        assert!(!satisfies("2.0.0", "^1.0.0"));
    }

    #[test]
    fn short_versions_are_padded() {
        assert_eq!(parse_version("1.2").expect("parse"), Version::new(1, 2, 0));
        assert_eq!(parse_version("v3").expect("parse"), Version::new(3, 0, 0));
        assert!(satisfies("1.0", "~1.0.0"));
    }

    #[test]
    fn alternatives_match_any_branch() {
        assert!(satisfies("2.1.0", "^1.0 || ^2.0"));
        assert!(!satisfies("3.0.0", "^1.0 || ^2.0"));
    }

    #[test]
    fn wildcard_matches_everything_stable() {
        assert!(satisfies("0.0.1", "*"));
    }

    #[test]
    fn garbage_never_satisfies() {
        assert!(!satisfies("not-a-version", "*"));
        assert!(!satisfies("1.0.0", ">>1"));
        assert!(Constraint::parse("^1 ||").is_err());
    }
}
