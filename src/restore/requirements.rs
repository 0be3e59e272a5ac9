//! Frozen requirement lines.
//!
//! Blank lines and `#` comments are ignored. Editable, VCS, URL and direct
//! reference (`name @ url`) lines are kept verbatim and are not counted as
//! packages. `name==version` is pinned; `name` with any other specifier (or
//! none) is unpinned.

use std::collections::BTreeMap;

use crate::errors::{RemedyError, RemedyResult};

/// Build tooling that restores never uninstall
pub const PROTECTED_PACKAGES: &[&str] = &["pip", "setuptools", "wheel"];

const VERBATIM_PREFIXES: &[&str] = &[
    "-e ",
    "--editable",
    "git+",
    "hg+",
    "svn+",
    "bzr+",
    "file:",
    "http://",
    "https://",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    Pinned { name: String, version: String },
    Unpinned { name: String, line: String },
    Verbatim(String),
}

impl Requirement {
    /// Package name, for pinned and unpinned requirements
    pub fn name(&self) -> Option<&str> {
        match self {
            Requirement::Pinned { name, .. } | Requirement::Unpinned { name, .. } => Some(name),
            Requirement::Verbatim(_) => None,
        }
    }

    /// A human label: the package name, or the raw line when verbatim
    pub fn label(&self) -> &str {
        match self {
            Requirement::Pinned { name, .. } | Requirement::Unpinned { name, .. } => name,
            Requirement::Verbatim(line) => line,
        }
    }

    pub fn is_verbatim(&self) -> bool {
        matches!(self, Requirement::Verbatim(_))
    }

    /// Arguments for `PackageInstaller::install`
    pub fn install_args(&self) -> (&str, Option<&str>) {
        match self {
            Requirement::Pinned { name, version } => (name, Some(version)),
            Requirement::Unpinned { line, .. } => (line, None),
            Requirement::Verbatim(line) => (line, None),
        }
    }
}

/// Canonical package name: lowercase with runs of `-`, `_`, `.` folded to `-`
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_sep = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            if !last_sep {
                out.push('-');
            }
            last_sep = true;
        } else {
            out.extend(c.to_lowercase());
            last_sep = false;
        }
    }
    out
}

pub fn is_protected(name: &str) -> bool {
    let normalized = normalize_name(name);
    PROTECTED_PACKAGES.contains(&normalized.as_str())
}

fn split_name(line: &str) -> Option<(&str, &str)> {
    let end = line
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .map_or(line.len(), |(i, _)| i);
    let name = &line[..end];
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphanumeric()) {
        return None;
    }
    let mut rest = &line[end..];
    // Extras: name[extra1,extra2]
    if let Some(after) = rest.strip_prefix('[') {
        let close = after.find(']')?;
        rest = &after[close + 1..];
    }
    Some((name, rest.trim_start()))
}

/// Parse one line. `Ok(None)` for blanks and comments.
pub fn parse_line(line: &str) -> Result<Option<Requirement>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    let lower = trimmed.to_ascii_lowercase();
    if VERBATIM_PREFIXES.iter().any(|p| lower.starts_with(p)) || trimmed.contains(" @ ") {
        return Ok(Some(Requirement::Verbatim(trimmed.to_string())));
    }

    let (name, rest) = split_name(trimmed).ok_or_else(|| format!("no package name in '{}'", trimmed))?;

    if rest.is_empty() || rest.starts_with(';') {
        return Ok(Some(Requirement::Unpinned {
            name: name.to_string(),
            line: trimmed.to_string(),
        }));
    }

    if let Some(spec) = rest.strip_prefix("==") {
        let version = spec.split(';').next().unwrap_or_default().trim();
        let exact = !version.is_empty()
            && !version.contains(',')
            && !version.contains('*')
            && !version.starts_with('=');
        if exact && !version.contains(char::is_whitespace) {
            return Ok(Some(Requirement::Pinned {
                name: name.to_string(),
                version: version.to_string(),
            }));
        }
    }

    if rest.starts_with(|c: char| matches!(c, '<' | '>' | '=' | '!' | '~')) {
        return Ok(Some(Requirement::Unpinned {
            name: name.to_string(),
            line: trimmed.to_string(),
        }));
    }

    Err(format!("unrecognised requirement '{}'", trimmed))
}

/// Parse a whole requirements file, failing on the first bad line.
pub fn parse_requirements(content: &str) -> RemedyResult<Vec<Requirement>> {
    let mut requirements = Vec::new();
    for (number, line) in content.lines().enumerate() {
        match parse_line(line) {
            Ok(Some(req)) => requirements.push(req),
            Ok(None) => {}
            Err(e) => {
                return Err(RemedyError::InvalidBackup(format!("line {}: {}", number + 1, e)));
            }
        }
    }
    Ok(requirements)
}

/// Number of named packages; verbatim lines are not counted
pub fn package_count(requirements: &[Requirement]) -> usize {
    requirements.iter().filter(|r| !r.is_verbatim()).count()
}

/// Installed packages keyed by normalized name, with their pinned version
/// when known. Verbatim and unparseable lines are skipped.
pub fn installed_versions(lines: &[String]) -> BTreeMap<String, Option<String>> {
    lines
        .iter()
        .filter_map(|l| parse_line(l).ok().flatten())
        .filter_map(|req| match req {
            Requirement::Pinned { name, version } => Some((normalize_name(&name), Some(version))),
            Requirement::Unpinned { name, .. } => Some((normalize_name(&name), None)),
            Requirement::Verbatim(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_grammar() {
        assert_eq!(parse_line("").unwrap(), None);
        assert_eq!(parse_line("  # generated").unwrap(), None);
        assert_eq!(
            parse_line("requests==2.31.0").unwrap(),
            Some(Requirement::Pinned {
                name: "requests".into(),
                version: "2.31.0".into()
            })
        );
        assert_eq!(
            parse_line("uvicorn[standard]==0.29.0").unwrap().unwrap().name(),
            Some("uvicorn")
        );
        assert!(matches!(
            parse_line("django>=4.2,<5").unwrap(),
            Some(Requirement::Unpinned { .. })
        ));
        assert!(matches!(
            parse_line("numpy").unwrap(),
            Some(Requirement::Unpinned { .. })
        ));
        assert!(matches!(
            parse_line("flask==2.*").unwrap(),
            Some(Requirement::Unpinned { .. })
        ));
        assert!(parse_line("===").is_err());
        assert!(parse_line("requests 2.0").is_err());
    }

    #[test]
    fn test_verbatim_lines() {
        for line in [
            "-e git+https://github.com/org/repo.git@abc#egg=repo",
            "git+https://github.com/org/lib.git",
            "mylib @ file:///tmp/mylib",
            "https://example.com/pkg-1.0.tar.gz",
        ] {
            let req = parse_line(line).unwrap().unwrap();
            assert!(req.is_verbatim(), "{}", line);
            assert_eq!(req.install_args(), (line, None));
        }
    }

    #[test]
    fn test_package_count_excludes_verbatim() {
        let reqs = parse_requirements(
            "a==1.0\n\n-e git+https://x/y.git#egg=y\nb==2.0\n# comment\nc>=3\n",
        )
        .unwrap();
        assert_eq!(reqs.len(), 4);
        assert_eq!(package_count(&reqs), 3);
    }

    #[test]
    fn test_parse_requirements_reports_line_number() {
        let err = parse_requirements("a==1.0\n!!!\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_normalize_and_protected() {
        assert_eq!(normalize_name("Zope.Interface"), "zope-interface");
        assert_eq!(normalize_name("typing__extensions"), "typing-extensions");
        assert!(is_protected("SetupTools"));
        assert!(!is_protected("requests"));
    }

    #[test]
    fn test_installed_versions() {
        let lines = vec![
            "Requests==2.31.0".to_string(),
            "pip==24.0".to_string(),
            "-e git+https://x/y.git#egg=y".to_string(),
        ];
        let map = installed_versions(&lines);
        assert_eq!(map.len(), 2);
        assert_eq!(map["requests"], Some("2.31.0".to_string()));
    }
}
