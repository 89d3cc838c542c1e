//! Four-part application versions and local version discovery.

use crate::config::VersionSource;
use crate::error::{Result, UpdateError};
use std::path::Path;
use std::process::{Command, Stdio};

/// A `major.minor.build.revision` version.
///
/// Ordering is lexicographic over the four components, most significant
/// first, which the derived `Ord` gives us from field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AppVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
    pub revision: u32,
}

impl AppVersion {
    /// `0.0.0.0`, used when no local version can be determined.
    pub const ZERO: Self = Self::new(0, 0, 0, 0);

    pub const fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self {
            major,
            minor,
            build,
            revision,
        }
    }

    /// Parse a dotted version with one to four numeric components.
    ///
    /// Missing trailing components are zero, so `"1.2"` equals `"1.2.0.0"`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Version`] for empty input, non-numeric
    /// components or more than four components.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UpdateError::Version("empty version string".to_owned()));
        }

        let mut parts = [0u32; 4];
        let mut count = 0;
        for component in trimmed.split('.') {
            if count == parts.len() {
                return Err(UpdateError::Version(format!(
                    "too many components in {trimmed:?}"
                )));
            }
            parts[count] = component.parse().map_err(|_| {
                UpdateError::Version(format!("invalid component {component:?} in {trimmed:?}"))
            })?;
            count += 1;
        }

        Ok(Self::new(parts[0], parts[1], parts[2], parts[3]))
    }

    /// Find the first dotted-number token in free text such as
    /// `"myapp 1.4.2 (build abc)"`.
    pub fn find_in(text: &str) -> Option<Self> {
        text.split(|c: char| !(c.is_ascii_digit() || c == '.'))
            .map(|token| token.trim_matches('.'))
            .filter(|token| token.contains('.'))
            .find_map(|token| Self::parse(token).ok())
    }
}

impl std::fmt::Display for AppVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.build, self.revision
        )
    }
}

impl std::str::FromStr for AppVersion {
    type Err = UpdateError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Determine the installed version of `main_binary`.
///
/// A missing binary yields [`AppVersion::ZERO`] so that any remote version
/// compares as newer. Sources that fail to produce a parseable version also
/// fall back to zero, with a warning.
pub fn local_version(main_binary: &Path, install_root: &Path, source: &VersionSource) -> AppVersion {
    let probed = match source {
        VersionSource::Fixed { version } => AppVersion::parse(version),
        _ if !main_binary.is_file() => {
            tracing::debug!(
                path = %main_binary.display(),
                "main binary not found; local version is 0.0.0.0"
            );
            return AppVersion::ZERO;
        }
        VersionSource::Executable => probe_executable(main_binary),
        VersionSource::File { path } => read_version_file(&install_root.join(path)),
    };

    probed.unwrap_or_else(|e| {
        tracing::warn!(path = %main_binary.display(), error = %e, "cannot read local version");
        AppVersion::ZERO
    })
}

/// Run `<binary> --version` and parse its output.
fn probe_executable(binary: &Path) -> Result<AppVersion> {
    let output = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| UpdateError::Version(format!("cannot run {}: {e}", binary.display())))?;

    if !output.status.success() {
        return Err(UpdateError::Version(format!(
            "{} --version exited with {:?}",
            binary.display(),
            output.status.code()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    AppVersion::find_in(&stdout)
        .ok_or_else(|| UpdateError::Version(format!("no version in output {:?}", stdout.trim())))
}

fn read_version_file(path: &Path) -> Result<AppVersion> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| UpdateError::Version(format!("cannot read {}: {e}", path.display())))?;
    AppVersion::find_in(&content)
        .or_else(|| AppVersion::parse(&content).ok())
        .ok_or_else(|| UpdateError::Version(format!("no version in {}", path.display())))
}
