//! Release-artifact acquisition for the server binary.
//!
//! When the search-path probe finds nothing, [`ReleaseDownloader`] fetches
//! the platform-matched zip for the pinned version, optionally verifies its
//! checksum, unpacks the binary, and installs it atomically under the
//! version-scoped cache directory. A cached install short-circuits the
//! network entirely.

use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::config::HostConfig;
use crate::errors::AcquireError;
use crate::output::OutputChannel;

/// Upper bound on a release artifact (256 MiB).
const MAX_ARTIFACT_BYTES: usize = 256 * 1024 * 1024;

const USER_AGENT: &str = concat!("sherpa-host/", env!("CARGO_PKG_VERSION"));

/// Release platform identity, matched against artifact names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub os: &'static str,
    pub arch: &'static str,
}

impl Platform {
    /// Identify the running platform, or fail when no release exists for it.
    pub fn current() -> Result<Self, AcquireError> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    fn from_parts(os: &str, arch: &str) -> Result<Self, AcquireError> {
        let os = match os {
            "linux" => "linux",
            "macos" => "macos",
            "windows" => "windows",
            other => {
                return Err(AcquireError::UnsupportedPlatform {
                    os: other.to_string(),
                    arch: arch.to_string(),
                });
            }
        };
        let arch = match arch {
            "x86_64" => "x86_64",
            "aarch64" => "aarch64",
            other => {
                return Err(AcquireError::UnsupportedPlatform {
                    os: os.to_string(),
                    arch: other.to_string(),
                });
            }
        };
        Ok(Self { os, arch })
    }

    /// Executable suffix on this platform.
    fn exe_suffix(self) -> &'static str {
        if self.os == "windows" { ".exe" } else { "" }
    }
}

/// Source of the server binary when it cannot be found locally.
pub trait AcquireBinary: Send + Sync {
    /// Produce an executable server binary, downloading if needed.
    ///
    /// Progress lines go to `output` so the user can see what a cold start
    /// is waiting on.
    fn acquire(
        &self,
        output: &OutputChannel,
    ) -> impl Future<Output = Result<PathBuf, AcquireError>> + Send;
}

/// Downloads release artifacts into extension-private storage.
pub struct ReleaseDownloader {
    client: reqwest::Client,
    binary_name: String,
    display_name: String,
    version: String,
    base_url: String,
    expected_sha256: Option<String>,
    storage_dir: PathBuf,
}

impl ReleaseDownloader {
    #[must_use]
    pub fn new(config: &HostConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            binary_name: config.binary_name.clone(),
            display_name: config.display_name.clone(),
            version: config.version.clone(),
            base_url: config.release_base_url.clone(),
            expected_sha256: config.artifact_sha256.clone(),
            storage_dir: config.storage_dir.clone(),
        }
    }

    /// Where the installed binary lives for the pinned version.
    #[must_use]
    pub fn cached_path(&self) -> PathBuf {
        let suffix = if cfg!(windows) { ".exe" } else { "" };
        self.storage_dir
            .join(&self.version)
            .join(format!("{}{suffix}", self.binary_name))
    }

    fn artifact_name(&self, platform: Platform) -> String {
        format!(
            "{}-{}-{}-{}.zip",
            self.binary_name, self.version, platform.os, platform.arch
        )
    }

    fn artifact_url(&self, platform: Platform) -> Result<Url, AcquireError> {
        let spec = format!(
            "{}/v{}/{}",
            self.base_url.trim_end_matches('/'),
            self.version,
            self.artifact_name(platform)
        );
        Url::parse(&spec).map_err(AcquireError::Url)
    }

    async fn fetch(&self, url: &Url) -> Result<Vec<u8>, AcquireError> {
        let response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AcquireError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        if let Some(announced) = response.content_length()
            && announced as usize > MAX_ARTIFACT_BYTES
        {
            return Err(AcquireError::TooLarge {
                size: announced as usize,
                max: MAX_ARTIFACT_BYTES,
            });
        }

        let mut bytes = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if bytes.len() + chunk.len() > MAX_ARTIFACT_BYTES {
                return Err(AcquireError::TooLarge {
                    size: bytes.len() + chunk.len(),
                    max: MAX_ARTIFACT_BYTES,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    fn verify(&self, artifact: &[u8]) -> Result<(), AcquireError> {
        let Some(expected) = &self.expected_sha256 else {
            return Ok(());
        };
        let actual = format!("{:x}", Sha256::digest(artifact));
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(AcquireError::ChecksumMismatch {
                expected: expected.clone(),
                actual,
            });
        }
        Ok(())
    }

    /// Pull the server binary out of the zip artifact.
    ///
    /// The entry may sit at the archive root or under a single top-level
    /// directory; only its base name has to match. Entry metadata and the
    /// deflate stream are both untrusted: the declared size only clamps the
    /// preallocation, and the read itself is capped so a zip-bomb entry
    /// fails with `TooLarge` instead of exhausting memory.
    fn extract_binary(&self, artifact: &[u8], platform: Platform) -> Result<Vec<u8>, AcquireError> {
        use std::io::Read;

        let wanted = format!("{}{}", self.binary_name, platform.exe_suffix());
        let cursor = std::io::Cursor::new(artifact);
        let mut archive = zip::ZipArchive::new(cursor).map_err(AcquireError::Archive)?;

        for index in 0..archive.len() {
            let mut entry = archive.by_index(index).map_err(AcquireError::Archive)?;
            if !entry.is_file() {
                continue;
            }
            let matches = Path::new(entry.name())
                .file_name()
                .is_some_and(|name| name == wanted.as_str());
            if !matches {
                continue;
            }
            let claimed = usize::try_from(entry.size()).unwrap_or(usize::MAX);
            let mut bytes = Vec::with_capacity(claimed.min(MAX_ARTIFACT_BYTES));
            std::io::copy(
                &mut (&mut entry).take(MAX_ARTIFACT_BYTES as u64 + 1),
                &mut bytes,
            )?;
            if bytes.len() > MAX_ARTIFACT_BYTES {
                return Err(AcquireError::TooLarge {
                    size: bytes.len(),
                    max: MAX_ARTIFACT_BYTES,
                });
            }
            return Ok(bytes);
        }

        Err(AcquireError::MissingEntry { name: wanted })
    }

    /// Write the binary into the cache via a temp file and atomic rename.
    fn install(&self, binary: &[u8], destination: &Path) -> Result<(), AcquireError> {
        use std::io::Write;

        let parent = destination
            .parent()
            .ok_or_else(|| AcquireError::Io(std::io::Error::other("cache path has no parent")))?;
        std::fs::create_dir_all(parent)?;

        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(binary)?;
        temp.as_file().sync_all()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o755))?;
        }

        temp.persist(destination).map_err(|e| AcquireError::Io(e.error))?;
        Ok(())
    }
}

impl AcquireBinary for ReleaseDownloader {
    async fn acquire(&self, output: &OutputChannel) -> Result<PathBuf, AcquireError> {
        let destination = self.cached_path();
        if destination.is_file() {
            tracing::debug!(path = %destination.display(), "reusing cached server binary");
            return Ok(destination);
        }

        let platform = Platform::current()?;
        let url = self.artifact_url(platform)?;

        output.line(format!(
            "Downloading {} v{}...",
            self.display_name, self.version
        ));
        tracing::info!(%url, "downloading server release artifact");

        let artifact = self.fetch(&url).await?;
        self.verify(&artifact)?;
        let binary = self.extract_binary(&artifact, platform)?;
        self.install(&binary, &destination)?;

        output.line(format!("Installed {} v{}", self.display_name, self.version));
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::BufferSink;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zip::write::SimpleFileOptions;

    fn zip_with(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            std::io::Write::write_all(&mut writer, data).unwrap();
        }
        writer.finish().unwrap();
        buf.into_inner()
    }

    fn host_platform() -> Platform {
        Platform::current().unwrap()
    }

    fn binary_entry_name() -> String {
        format!("sherpa{}", host_platform().exe_suffix())
    }

    fn test_config(server_url: &str, storage: &Path) -> HostConfig {
        HostConfig {
            release_base_url: server_url.to_string(),
            storage_dir: storage.to_path_buf(),
            ..HostConfig::default()
        }
    }

    fn artifact_route(config: &HostConfig) -> String {
        let platform = host_platform();
        format!(
            "/v{version}/sherpa-{version}-{os}-{arch}.zip",
            version = config.version,
            os = platform.os,
            arch = platform.arch,
        )
    }

    #[test]
    fn test_platform_matrix() {
        for (os, arch) in [
            ("linux", "x86_64"),
            ("linux", "aarch64"),
            ("macos", "x86_64"),
            ("macos", "aarch64"),
            ("windows", "x86_64"),
            ("windows", "aarch64"),
        ] {
            let platform = Platform::from_parts(os, arch).unwrap();
            assert_eq!(platform.os, os);
            assert_eq!(platform.arch, arch);
        }
    }

    #[test]
    fn test_unsupported_platform_is_fatal() {
        let err = Platform::from_parts("freebsd", "x86_64").unwrap_err();
        assert!(matches!(err, AcquireError::UnsupportedPlatform { .. }));

        let err = Platform::from_parts("linux", "riscv64").unwrap_err();
        match err {
            AcquireError::UnsupportedPlatform { os, arch } => {
                assert_eq!(os, "linux");
                assert_eq!(arch, "riscv64");
            }
            other => panic!("expected unsupported platform, got {other:?}"),
        }
    }

    #[test]
    fn test_artifact_url_is_versioned() {
        let config = HostConfig {
            release_base_url: "https://mirror.example/releases/".to_string(),
            ..HostConfig::default()
        };
        let downloader = ReleaseDownloader::new(&config);
        let platform = Platform::from_parts("linux", "aarch64").unwrap();
        let url = downloader.artifact_url(platform).unwrap();
        assert_eq!(
            url.as_str(),
            "https://mirror.example/releases/v0.4.2/sherpa-0.4.2-linux-aarch64.zip"
        );
    }

    #[test]
    fn test_cached_path_is_version_scoped() {
        let config = HostConfig {
            storage_dir: PathBuf::from("/storage"),
            ..HostConfig::default()
        };
        let downloader = ReleaseDownloader::new(&config);
        let cached = downloader.cached_path();
        assert!(cached.starts_with("/storage/0.4.2"));
    }

    #[tokio::test]
    async fn test_download_installs_executable_binary() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), dir.path());
        let artifact = zip_with(&[(&binary_entry_name(), b"#!/bin/sh\nexit 0\n")]);

        Mock::given(method("GET"))
            .and(path(artifact_route(&config)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .expect(1)
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let sink = BufferSink::new();
        let output = OutputChannel::new(sink.clone());

        let installed = downloader.acquire(&output).await.unwrap();
        assert_eq!(installed, downloader.cached_path());
        assert_eq!(
            tokio::fs::read(&installed).await.unwrap(),
            b"#!/bin/sh\nexit 0\n"
        );
        assert!(
            sink.lines()
                .iter()
                .any(|line| line.contains("Downloading Sherpa Language Server v0.4.2"))
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = tokio::fs::metadata(&installed).await.unwrap().permissions().mode();
            assert_eq!(mode & 0o111, 0o111, "installed binary must be executable");
        }
    }

    #[tokio::test]
    async fn test_cached_binary_skips_network() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), dir.path());
        let artifact = zip_with(&[(&binary_entry_name(), b"binary-v1")]);

        // A single fetch is allowed; the second acquire must not hit it.
        Mock::given(method("GET"))
            .and(path(artifact_route(&config)))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .expect(1)
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());

        let first = downloader.acquire(&output).await.unwrap();
        let second = downloader.acquire(&output).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_missing_release_is_status_error() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), dir.path());

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());

        let err = downloader.acquire(&output).await.unwrap_err();
        match err {
            AcquireError::Status { status, .. } => assert_eq!(status, 404),
            other => panic!("expected status error, got {other:?}"),
        }
        assert!(!downloader.cached_path().exists());
    }

    #[tokio::test]
    async fn test_checksum_mismatch_rejects_artifact() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(&server.uri(), dir.path());
        config.artifact_sha256 = Some("0".repeat(64));
        let artifact = zip_with(&[(&binary_entry_name(), b"payload")]);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());

        let err = downloader.acquire(&output).await.unwrap_err();
        assert!(matches!(err, AcquireError::ChecksumMismatch { .. }));
        assert!(!downloader.cached_path().exists(), "nothing may be installed");
    }

    #[tokio::test]
    async fn test_matching_checksum_is_accepted() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let artifact = zip_with(&[(&binary_entry_name(), b"payload")]);

        let mut config = test_config(&server.uri(), dir.path());
        // Uppercase digest: comparison is case-insensitive.
        config.artifact_sha256 = Some(format!("{:X}", Sha256::digest(&artifact)));

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());
        downloader.acquire(&output).await.unwrap();
    }

    #[test]
    fn test_entry_decompressing_past_cap_is_rejected() {
        use std::io::Read;

        // Small compressed artifact whose single entry inflates past the cap.
        let mut buf = std::io::Cursor::new(Vec::new());
        let mut writer = zip::ZipWriter::new(&mut buf);
        let options = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer.start_file(binary_entry_name(), options).unwrap();
        let mut zeros = std::io::repeat(0).take(MAX_ARTIFACT_BYTES as u64 + 1);
        std::io::copy(&mut zeros, &mut writer).unwrap();
        writer.finish().unwrap();
        let artifact = buf.into_inner();
        assert!(artifact.len() < MAX_ARTIFACT_BYTES, "must pass the fetch cap");

        let downloader = ReleaseDownloader::new(&HostConfig::default());
        let err = downloader
            .extract_binary(&artifact, host_platform())
            .unwrap_err();
        match err {
            AcquireError::TooLarge { size, max } => {
                assert!(size > max);
                assert_eq!(max, MAX_ARTIFACT_BYTES);
            }
            other => panic!("expected too-large error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_artifact_without_binary_is_missing_entry() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), dir.path());
        let artifact = zip_with(&[("README.md", b"docs only")]);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());

        let err = downloader.acquire(&output).await.unwrap_err();
        match err {
            AcquireError::MissingEntry { name } => assert_eq!(name, binary_entry_name()),
            other => panic!("expected missing entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_binary_nested_in_release_directory_is_found() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(&server.uri(), dir.path());
        let nested = format!("sherpa-0.4.2/{}", binary_entry_name());
        let artifact = zip_with(&[("sherpa-0.4.2/LICENSE", b"mit"), (&nested, b"nested-binary")]);

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(artifact))
            .mount(&server)
            .await;

        let downloader = ReleaseDownloader::new(&config);
        let output = OutputChannel::new(BufferSink::new());

        let installed = downloader.acquire(&output).await.unwrap();
        assert_eq!(tokio::fs::read(&installed).await.unwrap(), b"nested-binary");
    }
}
