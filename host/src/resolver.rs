//! Search-path resolution for the server binary.
//!
//! Absence is a normal outcome here, never a failure: the acquisition
//! manager takes over when the probe comes back empty. The probe is
//! read-only and re-run on every `start`.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Probe for an already-installed server executable.
pub trait ResolveBinary: Send + Sync {
    /// Locate `name` on the runtime search path.
    fn resolve(&self, name: &str) -> Option<PathBuf>;
}

/// Production resolver over the process `PATH`.
#[derive(Debug, Clone, Default)]
pub struct PathProbe {
    search_path: Option<OsString>,
}

impl PathProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Probe an explicit search path instead of the inherited `PATH`.
    #[must_use]
    pub fn with_search_path(search_path: impl Into<OsString>) -> Self {
        Self {
            search_path: Some(search_path.into()),
        }
    }
}

impl ResolveBinary for PathProbe {
    fn resolve(&self, name: &str) -> Option<PathBuf> {
        let cwd = std::env::current_dir().ok()?;
        match &self.search_path {
            Some(paths) => which::which_in(name, Some(paths), cwd).ok(),
            None => which::which(name).ok(),
        }
    }
}

/// Outcome of the two-step resolution pipeline: search path wins, the
/// acquisition manager only runs when the probe finds nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryLocation {
    /// Found on the search path without downloading.
    Found(PathBuf),
    /// Produced by the acquisition manager.
    Acquired(PathBuf),
}

impl BinaryLocation {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Found(path) | Self::Acquired(path) => path,
        }
    }

    #[must_use]
    pub fn into_path(self) -> PathBuf {
        match self {
            Self::Found(path) | Self::Acquired(path) => path,
        }
    }

    #[must_use]
    pub fn was_downloaded(&self) -> bool {
        matches!(self, Self::Acquired(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_binary_is_none_not_error() {
        let probe = PathProbe::new();
        assert!(
            probe
                .resolve("sherpa-test-binary-that-does-not-exist")
                .is_none()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_finds_executable_on_injected_search_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("sherpa-probe-target");
        std::fs::write(&exe, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = PathProbe::with_search_path(dir.path().as_os_str().to_os_string());
        let resolved = probe.resolve("sherpa-probe-target").expect("should resolve");
        assert_eq!(resolved, exe);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_file_is_not_resolved() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("sherpa-plain-file");
        std::fs::write(&file, "data").unwrap();
        std::fs::set_permissions(&file, std::fs::Permissions::from_mode(0o644)).unwrap();

        let probe = PathProbe::with_search_path(dir.path().as_os_str().to_os_string());
        assert!(probe.resolve("sherpa-plain-file").is_none());
    }

    #[test]
    fn test_location_accessors() {
        let found = BinaryLocation::Found(PathBuf::from("/usr/bin/sherpa"));
        assert_eq!(found.path(), Path::new("/usr/bin/sherpa"));
        assert!(!found.was_downloaded());

        let acquired = BinaryLocation::Acquired(PathBuf::from("/cache/sherpa"));
        assert!(acquired.was_downloaded());
        assert_eq!(acquired.into_path(), PathBuf::from("/cache/sherpa"));
    }
}
