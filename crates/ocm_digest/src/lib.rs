#![deny(missing_docs)]

//! Content digests used to address blobs.
//!
//! A [`Digest`] is an algorithm-tagged content hash. Its canonical string form
//! is `<algorithm>:<hex>` (for example `sha256:810f...`), and because `:` is not
//! safe in every filesystem or archive, [`Digest::file_name`] provides the
//! alternate form `<algorithm>.<hex>` that is used to name blob files.
//!
//! Two blobs with an equal digest are interchangeable, which is what makes
//! deduplication in artifact sets and component archives possible.
//!
//! # Examples
//!
//! ```
//! use ocm_digest::Digest;
//!
//! let digest = Digest::from_bytes(b"testdata");
//! assert_eq!(
//!     digest.to_string(),
//!     "sha256:810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50"
//! );
//! assert_eq!(Digest::from_file_name(&digest.file_name()).unwrap(), digest);
//! ```
//!
//! # Available functions
//!
//! - [`compute_file_digest`]: Computes the hash of a file on disk.
//! - [`compute_bytes_digest`]: Computes the hash of a byte slice.
//! - [`HashingWriter`] and [`HashingReader`]: wrap a writer or reader and hash
//!   everything that passes through them.

use std::{
    fmt::{Display, Formatter},
    fs::File,
    io::{Read, Write},
    path::Path,
    str::FromStr,
};

pub use digest;
use digest::Output;
use serde_with::{DeserializeFromStr, SerializeDisplay};
pub use sha2::{Sha256, Sha512};

/// A type alias for the output of a SHA256 hash.
pub type Sha256Hash = sha2::digest::Output<Sha256>;

/// The hash algorithms a [`Digest`] can be tagged with.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, the algorithm used for all newly computed digests.
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
}

impl Algorithm {
    /// Returns the name of the algorithm as it appears in a digest string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// The number of hex characters of an encoded hash of this algorithm.
    pub fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha512 => 128,
        }
    }

    /// Constructs a hasher for this algorithm.
    pub fn hasher(&self) -> Hasher {
        match self {
            Algorithm::Sha256 => Hasher::Sha256(Sha256::default()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::default()),
        }
    }
}

impl Display for Algorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(ParseDigestError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// An error that can occur when parsing a [`Digest`] from a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDigestError {
    /// The string does not contain an algorithm separator.
    #[error("'{0}' is not a digest, expected '<algorithm>:<hex>'")]
    MissingSeparator(String),

    /// The algorithm is not known.
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    /// The encoded hash is not valid for the algorithm.
    #[error("invalid {algorithm} hash '{hex}'")]
    InvalidHash {
        /// The algorithm the hash was tagged with.
        algorithm: Algorithm,
        /// The offending hash.
        hex: String,
    },
}

/// An algorithm-tagged content hash.
///
/// The hex representation is always stored lowercase so that two digests of
/// the same content compare equal regardless of how they were spelled.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr,
)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Constructs a digest from an algorithm and a hex encoded hash.
    pub fn new(algorithm: Algorithm, hex: impl Into<String>) -> Result<Self, ParseDigestError> {
        let hex = hex.into().to_ascii_lowercase();
        match hex::decode(&hex) {
            Ok(hash) if hash.len() * 2 == algorithm.hex_len() => Ok(Self { algorithm, hex }),
            _ => Err(ParseDigestError::InvalidHash { algorithm, hex }),
        }
    }

    /// Computes the SHA-256 digest of the given bytes.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        Self::from_sha256(&compute_bytes_digest::<Sha256>(bytes))
    }

    /// Constructs a digest from the raw output of a SHA-256 hasher.
    pub fn from_sha256(hash: &Sha256Hash) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(hash),
        }
    }

    /// Hashes everything that can be read from `reader` with the given
    /// algorithm. Returns the digest and the number of bytes read.
    pub fn from_reader(
        algorithm: Algorithm,
        reader: &mut impl Read,
    ) -> Result<(Self, u64), std::io::Error> {
        let mut hasher = algorithm.hasher();
        let size = std::io::copy(reader, &mut hasher)?;
        Ok((hasher.finalize(), size))
    }

    /// Parses a digest from its filesystem-safe form `<algorithm>.<hex>`.
    pub fn from_file_name(name: &str) -> Result<Self, ParseDigestError> {
        let (algorithm, hex) = name
            .split_once('.')
            .ok_or_else(|| ParseDigestError::MissingSeparator(name.to_string()))?;
        Self::new(algorithm.parse()?, hex)
    }

    /// Returns the algorithm this digest was computed with.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Returns the lowercase hex encoded hash.
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Returns the filesystem-safe name of this digest, `<algorithm>.<hex>`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.algorithm, self.hex)
    }
}

impl Display for Digest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| ParseDigestError::MissingSeparator(s.to_string()))?;
        Self::new(algorithm.parse()?, hex)
    }
}

/// A hasher for one of the supported [`Algorithm`]s, usable where the
/// algorithm is only known at runtime.
#[derive(Clone)]
pub enum Hasher {
    /// A SHA-256 hasher
    Sha256(Sha256),
    /// A SHA-512 hasher
    Sha512(Sha512),
}

impl Hasher {
    /// Feeds more bytes into the hasher.
    pub fn update(&mut self, bytes: &[u8]) {
        match self {
            Hasher::Sha256(h) => digest::Digest::update(h, bytes),
            Hasher::Sha512(h) => digest::Digest::update(h, bytes),
        }
    }

    /// Consumes the hasher and returns the digest of everything fed to it.
    pub fn finalize(self) -> Digest {
        match self {
            Hasher::Sha256(h) => Digest {
                algorithm: Algorithm::Sha256,
                hex: hex::encode(digest::Digest::finalize(h)),
            },
            Hasher::Sha512(h) => Digest {
                algorithm: Algorithm::Sha512,
                hex: hex::encode(digest::Digest::finalize(h)),
            },
        }
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Compute a hash of the file at the specified location.
pub fn compute_file_digest<D: digest::Digest + Default + Write>(
    path: impl AsRef<Path>,
) -> Result<Output<D>, std::io::Error> {
    let mut file = File::open(path)?;
    let mut hasher = D::default();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Compute a hash of the specified bytes.
pub fn compute_bytes_digest<D: digest::Digest + Default>(bytes: impl AsRef<[u8]>) -> Output<D> {
    let mut hasher = D::default();
    hasher.update(bytes);
    hasher.finalize()
}

/// A simple object that provides a [`Write`] implementation that also immediately hashes the bytes
/// written to it. Call [`HashingWriter::finalize`] to retrieve both the original `impl Write`
/// object as well as the digest.
pub struct HashingWriter<W> {
    writer: W,
    hasher: Hasher,
    size: u64,
}

impl<W> HashingWriter<W> {
    /// Constructs a new instance from a writer, hashing with `algorithm`.
    pub fn new(writer: W, algorithm: Algorithm) -> Self {
        Self {
            writer,
            hasher: algorithm.hasher(),
            size: 0,
        }
    }

    /// Consumes this instance and returns the original writer, the digest and the number of bytes
    /// written to this instance.
    pub fn finalize(self) -> (W, Digest, u64) {
        (self.writer, self.hasher.finalize(), self.size)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let bytes = self.writer.write(buf)?;
        self.hasher.update(&buf[..bytes]);
        self.size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

/// A simple object that provides a [`Read`] implementation that also immediately hashes the bytes
/// read from it. Call [`HashingReader::finalize`] to retrieve both the original `impl Read`
/// object as well as the digest.
pub struct HashingReader<R> {
    reader: R,
    hasher: Hasher,
    size: u64,
}

impl<R> HashingReader<R> {
    /// Constructs a new instance from a reader, hashing with `algorithm`.
    pub fn new(reader: R, algorithm: Algorithm) -> Self {
        Self {
            reader,
            hasher: algorithm.hasher(),
            size: 0,
        }
    }

    /// Consumes this instance and returns the original reader, the digest and the number of bytes
    /// read from this instance.
    pub fn finalize(self) -> (R, Digest, u64) {
        (self.reader, self.hasher.finalize(), self.size)
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let bytes_read = self.reader.read(buf)?;
        self.hasher.update(&buf[..bytes_read]);
        self.size += bytes_read as u64;
        Ok(bytes_read)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;
    use std::io::Read;

    #[rstest]
    #[case(
        "1234567890",
        "c775e7b757ede630cd0aa1113bd102661ab38829ca52a6422ab782862f268646"
    )]
    #[case(
        "Hello, world!",
        "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
    )]
    fn test_compute_file_sha256(#[case] input: &str, #[case] expected_hash: &str) {
        let temp_dir = tempfile::tempdir().unwrap();
        let file_path = temp_dir.path().join("test");
        std::fs::write(&file_path, input).unwrap();
        let hash = compute_file_digest::<Sha256>(&file_path).unwrap();

        assert_eq!(format!("{hash:x}"), expected_hash);
    }

    #[rstest]
    #[case(
        "testdata",
        "sha256:810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50"
    )]
    #[case(
        "{}",
        "sha256:44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
    )]
    fn test_hashing_reader(#[case] input: &str, #[case] expected: &str) {
        let mut reader = HashingReader::new(std::io::Cursor::new(input), Algorithm::Sha256);
        let mut content = String::new();
        reader.read_to_string(&mut content).unwrap();
        assert_eq!(&content, input);
        let (_, digest, size) = reader.finalize();
        assert_eq!(digest.to_string(), expected);
        assert_eq!(size, input.len() as u64);
        assert_eq!(Digest::from_bytes(input), digest);
    }

    #[test]
    fn test_hashing_writer() {
        let mut writer = HashingWriter::new(Vec::new(), Algorithm::Sha256);
        writer.write_all(b"test").unwrap();
        writer.write_all(b"data").unwrap();
        let (written, digest, size) = writer.finalize();
        assert_eq!(written, b"testdata");
        assert_eq!(size, 8);
        assert_eq!(digest, Digest::from_bytes("testdata"));
    }

    #[test]
    fn test_file_name_form() {
        let digest = Digest::from_bytes("testdata");
        assert_eq!(
            digest.file_name(),
            "sha256.810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50"
        );
        assert_eq!(Digest::from_file_name(&digest.file_name()).unwrap(), digest);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper: Digest = "sha256:810FF2FB242A5DEE4220F2CB0E6A519891FB67F2F828A6CAB4EF8894633B1F50"
            .parse()
            .unwrap();
        assert_eq!(upper, Digest::from_bytes("testdata"));
    }

    #[rstest]
    #[case("810ff2fb")]
    #[case("md5:d41d8cd98f00b204e9800998ecf8427e")]
    #[case("sha256:abc")]
    #[case("sha256:zz0ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50")]
    fn test_parse_invalid(#[case] input: &str) {
        assert!(input.parse::<Digest>().is_err());
    }

    #[test]
    fn test_sha512_reader() {
        let (digest, size) =
            Digest::from_reader(Algorithm::Sha512, &mut std::io::Cursor::new("")).unwrap();
        assert_eq!(size, 0);
        assert_eq!(digest.algorithm(), Algorithm::Sha512);
        assert!(digest.hex().starts_with("cf83e1357eefb8bd"));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let digest = Digest::from_bytes("testdata");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(
            json,
            "\"sha256:810ff2fb242a5dee4220f2cb0e6a519891fb67f2f828a6cab4ef8894633b1f50\""
        );
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }
}
