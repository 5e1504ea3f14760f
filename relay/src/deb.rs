//! Control metadata extraction from `.deb` packages.
//!
//! A `.deb` is an `ar` archive holding `debian-binary`, a control tarball
//! and a data tarball. Scanning pulls the control stanza out of the
//! control tarball and, because the stanza inside the package does not
//! carry them, stamps `Size` and the four content digests computed over
//! the complete artifact bytes — the index needs both to publish the
//! package. The whole stream is therefore drained exactly once, on a
//! blocking thread fed through a [`SyncIoBridge`].

use crate::error::{RelayError, RelayResult};
use crate::sources::ArtifactStream;
use apt_repository::{ControlFile, DigestSet, MultiDigester};
use std::io::Read;
use tokio_util::io::SyncIoBridge;

struct DigestingReader<R> {
    inner: R,
    digester: MultiDigester,
}

impl<R: Read> DigestingReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            digester: MultiDigester::new(),
        }
    }

    fn finalize(self) -> (u64, DigestSet) {
        self.digester.finalize()
    }
}

impl<R: Read> Read for DigestingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.digester.update(&buf[..n]);
        Ok(n)
    }
}

/// Scan an artifact byte stream: extract the control stanza and stamp
/// `Size` plus the content digests of the full artifact.
pub async fn scan_package(stream: ArtifactStream) -> RelayResult<ControlFile> {
    let bridge = SyncIoBridge::new(stream);
    tokio::task::spawn_blocking(move || scan_package_reader(bridge))
        .await
        .map_err(|e| RelayError::Io(std::io::Error::other(e)))?
}

/// Scan in-memory `.deb` bytes.
pub fn scan_package_bytes(bytes: &[u8]) -> RelayResult<ControlFile> {
    scan_package_reader(bytes)
}

fn scan_package_reader(reader: impl Read) -> RelayResult<ControlFile> {
    let mut digesting = DigestingReader::new(reader);
    let mut control = extract_control(&mut digesting)?;

    // Drain whatever follows the control tarball (usually the data
    // tarball) so the digests cover the artifact as served.
    std::io::copy(&mut digesting, &mut std::io::sink())?;
    let (size, digests) = digesting.finalize();

    control.set("Size", size.to_string());
    for (algorithm, hex) in digests.iter() {
        control.set(algorithm.control_field(), hex);
    }
    Ok(control)
}

fn extract_control(reader: impl Read) -> RelayResult<ControlFile> {
    let mut archive = ar::Archive::new(reader);
    while let Some(entry) = archive.next_entry() {
        let entry = entry?;
        let name = String::from_utf8_lossy(entry.header().identifier()).into_owned();
        if !name.starts_with("control.tar") {
            continue;
        }

        let decoded: Box<dyn Read> = if name.ends_with(".gz") {
            Box::new(flate2::read::GzDecoder::new(entry))
        } else if name.ends_with(".xz") {
            Box::new(xz2::read::XzDecoder::new(entry))
        } else if name.ends_with(".zst") {
            Box::new(zstd::stream::read::Decoder::new(entry)?)
        } else {
            Box::new(entry)
        };

        let mut tarball = tar::Archive::new(decoded);
        for member in tarball.entries()? {
            let mut member = member?;
            let is_control = member
                .path()?
                .file_name()
                .is_some_and(|file| file == "control");
            if is_control {
                let mut text = String::new();
                member.read_to_string(&mut text)?;
                return Ok(ControlFile::parse(&text)?);
            }
        }
        return Err(RelayError::MalformedRemote(
            "control tarball has no control member".to_string(),
        ));
    }
    Err(RelayError::MalformedRemote(
        "not a Debian package: no control tarball".to_string(),
    ))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use apt_repository::digest::digest_data;
    use apt_repository::DigestAlgorithm;
    use std::io::Write;

    /// Assemble a minimal valid `.deb` with a gzip control tarball.
    pub(crate) fn fake_deb(control: &str) -> Vec<u8> {
        let mut tarball = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_path("./control").unwrap();
        header.set_size(control.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tarball.append(&header, control.as_bytes()).unwrap();
        let tar_bytes = tarball.into_inner().unwrap();

        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&tar_bytes).unwrap();
        let control_tar_gz = encoder.finish().unwrap();

        let mut deb = ar::Builder::new(Vec::new());
        deb.append(
            &ar::Header::new(b"debian-binary".to_vec(), 4),
            &b"2.0\n"[..],
        )
        .unwrap();
        deb.append(
            &ar::Header::new(b"control.tar.gz".to_vec(), control_tar_gz.len() as u64),
            control_tar_gz.as_slice(),
        )
        .unwrap();
        deb.append(&ar::Header::new(b"data.tar.gz".to_vec(), 0), &b""[..])
            .unwrap();
        deb.into_inner().unwrap()
    }

    const CONTROL: &str =
        "Package: hello\nVersion: 2.10\nArchitecture: amd64\nDescription: test\n";

    #[test]
    fn extracts_control_and_stamps_artifact_digests() {
        let deb = fake_deb(CONTROL);
        let control = scan_package_bytes(&deb).unwrap();
        assert_eq!(control.package(), Some("hello"));
        assert_eq!(control.version(), Some("2.10"));
        assert_eq!(control.architecture(), Some("amd64"));

        // Size and digests cover the artifact bytes, not the stanza.
        let (size, digests) = digest_data(&deb);
        assert_eq!(control.size().unwrap(), Some(size));
        assert_eq!(
            control.digest(DigestAlgorithm::Sha256),
            digests.get(DigestAlgorithm::Sha256)
        );
        assert_eq!(
            control.digest(DigestAlgorithm::Md5),
            digests.get(DigestAlgorithm::Md5)
        );
    }

    #[tokio::test]
    async fn scans_from_a_stream() {
        let deb = fake_deb(CONTROL);
        let stream: ArtifactStream = Box::new(std::io::Cursor::new(deb));
        let control = scan_package(stream).await.unwrap();
        assert_eq!(control.package(), Some("hello"));
        assert!(control.strongest_digest().is_some());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(scan_package_bytes(b"not an archive at all").is_err());
    }
}
