use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One installed (or installable) package.
///
/// The JSON shape matches `conda-meta/<dist>.json`, `info/index.json` and the
/// entries of a channel `repodata.json`; unknown keys are ignored on load.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    /// Files owned inside an environment; only present in `conda-meta` records.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
}

impl PackageRecord {
    pub fn new(name: &str, version: &str, build: &str) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            build: build.to_string(),
            build_number: 0,
            depends: Vec::new(),
            url: None,
            channel: None,
            md5: None,
            files: Vec::new(),
        }
    }

    /// Canonical package id, `name-version-build`.
    pub fn dist_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.build)
    }

    /// Rebuild a bare record from a canonical id such as `numpy-1.6.2-py26_0`.
    ///
    /// Package names may contain dashes, so the id is split from the right.
    pub fn from_dist_name(dist: &str) -> Result<Self> {
        let mut parts = dist.rsplitn(3, '-');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(build), Some(version), Some(name))
                if !build.is_empty() && !version.is_empty() && !name.is_empty() =>
            {
                Ok(Self::new(name, version, build))
            }
            _ => bail!(
                "Invalid package id '{}'. Expected 'name-version-build'.",
                dist
            ),
        }
    }

    /// Whether the record knows where its archive came from.
    pub fn has_location(&self) -> bool {
        self.url.as_deref().is_some_and(|u| !u.trim().is_empty())
    }

    /// Exact spec identifying this record in a package index.
    pub fn match_spec(&self) -> MatchSpec {
        MatchSpec {
            name: self.name.clone(),
            version: Some(self.version.clone()),
            build: Some(self.build.clone()),
        }
    }

    /// Names of the packages this record depends on, in declaration order.
    pub fn dependency_names(&self) -> impl Iterator<Item = String> + '_ {
        self.depends
            .iter()
            .filter_map(|dep| dep.parse::<MatchSpec>().ok())
            .map(|spec| spec.name)
    }
}

impl fmt::Display for PackageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dist_name())
    }
}

/// A `name [version [build]]` package spec.
///
/// Accepts both the space separated form used in `depends` lists
/// (`python >=3.8`) and the `name=version=build` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatchSpec {
    pub name: String,
    pub version: Option<String>,
    pub build: Option<String>,
}

impl MatchSpec {
    pub fn name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            version: None,
            build: None,
        }
    }
}

impl FromStr for MatchSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parts: Vec<&str> = if s.contains(char::is_whitespace) {
            s.split_whitespace().collect()
        } else {
            s.split('=').filter(|p| !p.is_empty()).collect()
        };

        match parts.as_slice() {
            [name] => Ok(MatchSpec::name(name)),
            [name, version] => Ok(MatchSpec {
                name: name.to_string(),
                version: Some(version.to_string()),
                build: None,
            }),
            [name, version, build, ..] => Ok(MatchSpec {
                name: name.to_string(),
                version: Some(version.to_string()),
                build: Some(build.to_string()),
            }),
            [] => bail!("Empty package spec"),
        }
    }
}

impl fmt::Display for MatchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(version) = &self.version {
            write!(f, " {}", version)?;
        }
        if let Some(build) = &self.build {
            write!(f, " {}", build)?;
        }
        Ok(())
    }
}
