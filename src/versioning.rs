//! Semantic versions and the `${{ COMPONENT }}` incrementer language.
//!
//! Versions in job documents are either literal (`1.2.0`) or a directive such
//! as `${{ MINOR }}`, resolved against the versions that already exist in the
//! registry for the same name and namespace.
use crate::error::{FairError, FairResult};
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Directive used for `read` entries when the document gives none.
pub const DEFAULT_READ_VERSION: Incrementer = Incrementer::Latest;
/// Directive used for `write` entries when the document gives none.
pub const DEFAULT_WRITE_VERSION: Incrementer = Incrementer::Patch;

/// One component of the incrementer language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incrementer {
    Latest,
    Minor,
    Major,
    Patch,
    Build,
    Prerelease,
}

/// Lookup order matters: the first component found in a string wins.
pub const INCREMENTERS: [Incrementer; 6] = [
    Incrementer::Latest,
    Incrementer::Minor,
    Incrementer::Major,
    Incrementer::Patch,
    Incrementer::Build,
    Incrementer::Prerelease,
];

static DIRECTIVE_PATTERNS: Lazy<Vec<(Incrementer, Regex)>> = Lazy::new(|| {
    INCREMENTERS
        .iter()
        .map(|component| {
            let pattern = format!(r"\$\{{\{{\s*{}\s*\}}\}}", component.name());
            let re = Regex::new(&pattern).expect("incrementer regex");
            (*component, re)
        })
        .collect()
});

impl Incrementer {
    pub fn name(self) -> &'static str {
        match self {
            Self::Latest => "LATEST",
            Self::Minor => "MINOR",
            Self::Major => "MAJOR",
            Self::Patch => "PATCH",
            Self::Build => "BUILD",
            Self::Prerelease => "PRERELEASE",
        }
    }

    /// The directive text as written in a job document.
    pub fn directive(self) -> String {
        format!("${{{{ {} }}}}", self.name())
    }

    pub fn from_name(name: &str) -> Option<Self> {
        INCREMENTERS
            .iter()
            .copied()
            .find(|component| component.name() == name)
    }

    pub fn apply(self, version: &Version) -> FairResult<Version> {
        match self {
            Self::Latest => Ok(version.clone()),
            Self::Major => version.bump_major(),
            Self::Minor => version.bump_minor(),
            Self::Patch => version.bump_patch(),
            Self::Build => version.bump_build(),
            Self::Prerelease => version.bump_prerelease(),
        }
    }
}

impl fmt::Display for Incrementer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directive())
    }
}

/// Find the incrementer directive inside `token`.
///
/// Fails when no known directive is present, which callers use as the signal
/// to treat the string as a literal version instead.
pub fn parse_incrementer(token: &str) -> FairResult<Incrementer> {
    DIRECTIVE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(token))
        .map(|(component, _)| *component)
        .ok_or_else(|| {
            FairError::user_config(format!("Unrecognised version incrementer variable '{token}'"))
        })
}

pub fn is_incrementer(token: &str) -> bool {
    parse_incrementer(token).is_ok()
}

/// Rewrite any directive in `token` to `${{ LATEST }}`.
pub fn undo_incrementer(token: &str) -> String {
    for (_, re) in DIRECTIVE_PATTERNS.iter() {
        if re.is_match(token) {
            return re
                .replace_all(token, Incrementer::Latest.directive().as_str())
                .into_owned();
        }
    }
    token.to_string()
}

/// A semantic version (`MAJOR.MINOR.PATCH[-PRERELEASE][+BUILD]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub prerelease: Option<String>,
    pub build: Option<String>,
}

impl Version {
    pub const ZERO: Version = Version {
        major: 0,
        minor: 0,
        patch: 0,
        prerelease: None,
        build: None,
    };

    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
            build: None,
        }
    }

    pub fn parse(text: &str) -> FairResult<Self> {
        text.parse()
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn bump_major(&self) -> FairResult<Self> {
        Ok(Self::new(increment(self.major, self)?, 0, 0))
    }

    pub fn bump_minor(&self) -> FairResult<Self> {
        Ok(Self::new(self.major, increment(self.minor, self)?, 0))
    }

    pub fn bump_patch(&self) -> FairResult<Self> {
        Ok(Self::new(self.major, self.minor, increment(self.patch, self)?))
    }

    /// `1.0.0` becomes `1.0.1-rc.1`; an existing prerelease has its trailing
    /// number incremented.
    pub fn bump_prerelease(&self) -> FairResult<Self> {
        Ok(match &self.prerelease {
            None => Self {
                prerelease: Some("rc.1".to_string()),
                ..self.bump_patch()?
            },
            Some(pre) => Self {
                major: self.major,
                minor: self.minor,
                patch: self.patch,
                prerelease: Some(increment_last_number(pre, self)?),
                build: None,
            },
        })
    }

    pub fn bump_build(&self) -> FairResult<Self> {
        let build = match &self.build {
            None => "build.1".to_string(),
            Some(build) => increment_last_number(build, self)?,
        };
        Ok(Self {
            build: Some(build),
            ..self.clone()
        })
    }
}

fn increment(component: u64, version: &Version) -> FairResult<u64> {
    component.checked_add(1).ok_or_else(|| {
        FairError::user_config(format!("Cannot increment version {version} any further"))
    })
}

fn increment_last_number(label: &str, version: &Version) -> FairResult<String> {
    static TRAILING_NUMBER: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^(.*?)(\d+)(\D*)$").expect("trailing number regex"));
    match TRAILING_NUMBER.captures(label) {
        Some(caps) => {
            let number: u64 = caps[2].parse().map_err(|_| {
                FairError::user_config(format!(
                    "Cannot increment '{label}' of version {version}, number out of range"
                ))
            })?;
            Ok(format!("{}{}{}", &caps[1], increment(number, version)?, &caps[3]))
        }
        None => Ok(format!("{label}.1")),
    }
}

fn valid_identifiers(label: &str) -> bool {
    !label.is_empty()
        && label.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn parse_number(part: &str, text: &str) -> FairResult<u64> {
    if part.is_empty() || (part.len() > 1 && part.starts_with('0')) {
        return Err(invalid_version(text));
    }
    part.parse().map_err(|_| invalid_version(text))
}

fn invalid_version(text: &str) -> FairError {
    FairError::user_config(format!("'{text}' is not a valid semantic version"))
}

impl FromStr for Version {
    type Err = FairError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let trimmed = text.trim();
        let (rest, build) = match trimmed.split_once('+') {
            Some((rest, build)) => (rest, Some(build)),
            None => (trimmed, None),
        };
        let (core, prerelease) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };
        let parts: Vec<&str> = core.split('.').collect();
        let [major, minor, patch] = parts.as_slice() else {
            return Err(invalid_version(text));
        };
        for label in prerelease.iter().chain(build.iter()) {
            if !valid_identifiers(label) {
                return Err(invalid_version(text));
            }
        }
        Ok(Self {
            major: parse_number(major, text)?,
            minor: parse_number(minor, text)?,
            patch: parse_number(patch, text)?,
            prerelease: prerelease.map(str::to_string),
            build: build.map(str::to_string),
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        if let Some(build) = &self.build {
            write!(f, "+{build}")?;
        }
        Ok(())
    }
}

fn compare_prerelease(left: &str, right: &str) -> Ordering {
    let mut lhs = left.split('.');
    let mut rhs = right.split('.');
    loop {
        match (lhs.next(), rhs.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(a), Some(b)) => {
                let ordering = match (a.parse::<u64>(), b.parse::<u64>()) {
                    (Ok(x), Ok(y)) => x.cmp(&y),
                    (Ok(_), Err(_)) => Ordering::Less,
                    (Err(_), Ok(_)) => Ordering::Greater,
                    (Err(_), Err(_)) => a.cmp(b),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
        }
    }
}

impl Ord for Version {
    /// Semantic-version precedence. Build metadata only breaks ties, so a
    /// build bump sorts after the version it was derived from.
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.prerelease, &other.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b).then_with(|| a.cmp(b)),
            })
            .then_with(|| self.build.cmp(&other.build))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Highest of `versions`, or `0.0.0` when there are none.
pub fn latest_version(versions: &[Version]) -> Version {
    versions.iter().max().cloned().unwrap_or(Version::ZERO)
}

/// Parse the `version` field of registry objects, skipping entries without one.
pub fn versions_from_results(results: &[serde_json::Value]) -> FairResult<Vec<Version>> {
    results
        .iter()
        .filter_map(|entry| entry.get("version").and_then(serde_json::Value::as_str))
        .map(Version::parse)
        .collect()
}

/// Resolve a directive or literal against the versions already registered.
///
/// Writes implicitly include `0.0.0` as a floor so a first write of
/// `${{ PATCH }}` yields `0.0.1`.
pub fn get_correct_version(
    input: &str,
    existing: &[Version],
    is_write: bool,
) -> FairResult<Version> {
    let mut known = existing.to_vec();
    let resolved = match parse_incrementer(input) {
        Ok(component) => {
            if is_write {
                known.push(Version::ZERO);
            }
            let max = latest_version(&known);
            component.apply(&max)?
        }
        Err(_) => Version::parse(input)?,
    };

    let exists = known.contains(&resolved);
    if is_write && exists {
        return Err(FairError::user_config(format!(
            "Trying to create existing version: {resolved}"
        )));
    }
    if !is_write && !exists {
        return Err(FairError::user_config(format!(
            "Trying to read non-existing version: {resolved}"
        )));
    }
    if resolved.is_zero() {
        return Err(FairError::user_config(format!(
            "Trying to work with version {}",
            Version::ZERO
        )));
    }
    Ok(resolved)
}

/// Default increment applied when nothing else is requested.
pub fn default_bump(version: &Version) -> FairResult<Version> {
    DEFAULT_WRITE_VERSION.apply(version)
}

#[cfg(test)]
#[path = "versioning_tests.rs"]
mod tests;
