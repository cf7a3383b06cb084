//! Candidate list parsing
//!
//! Input is one candidate per line in the form
//! `address,port[,country[,organization]]`. There is no quoting or escaping;
//! missing metadata defaults to `Unknown`.

use crate::error::{ParseError, SourceError};
use crate::proxy::models::{Candidate, UNKNOWN};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Stateless parser for single candidate lines
pub struct CandidateParser;

impl CandidateParser {
    /// Parse a single line.
    ///
    /// Returns `Ok(None)` for blank lines and `#` comments, and an error for
    /// lines that look like records but cannot be used.
    pub fn parse_line(line_no: usize, line: &str) -> Result<Option<Candidate>, ParseError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }

        let mut parts = line.split(',').map(str::trim);
        let address = parts.next().unwrap_or_default();
        let port = match parts.next() {
            Some(port) if !address.is_empty() => port,
            _ => {
                return Err(ParseError::MissingPort {
                    line: line_no,
                    raw: line.to_string(),
                })
            }
        };

        let port = match port.parse::<u16>() {
            Ok(port) if port != 0 => port,
            _ => {
                return Err(ParseError::InvalidPort {
                    line: line_no,
                    port: port.to_string(),
                })
            }
        };

        let country = non_empty_or_unknown(parts.next());
        let organization = non_empty_or_unknown(parts.next());

        Ok(Some(
            Candidate::new(address, port)
                .with_country(country)
                .with_organization(organization),
        ))
    }

    /// Parse every usable candidate in a string, dropping bad lines
    #[cfg(test)]
    pub(crate) fn parse_string(content: &str) -> Vec<Candidate> {
        content
            .lines()
            .enumerate()
            .filter_map(|(idx, line)| Self::parse_line(idx + 1, line).ok().flatten())
            .collect()
    }
}

fn non_empty_or_unknown(field: Option<&str>) -> String {
    match field {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => UNKNOWN.to_string(),
    }
}

/// Counters shared between a [`CandidateSource`] and whoever reports on it
#[derive(Debug, Clone, Default)]
pub struct SourceStats {
    parsed: Arc<AtomicUsize>,
    skipped: Arc<AtomicUsize>,
    read_error: Arc<Mutex<Option<io::Error>>>,
}

impl SourceStats {
    pub fn parsed(&self) -> usize {
        self.parsed.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    /// The I/O error that ended the source early, if any
    pub fn take_read_error(&self) -> Option<io::Error> {
        match self.read_error.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn set_read_error(&self, error: io::Error) {
        match self.read_error.lock() {
            Ok(mut slot) => *slot = Some(error),
            Err(poisoned) => *poisoned.into_inner() = Some(error),
        }
    }
}

/// Lazy, single-pass reader over a candidate list.
///
/// Malformed or undecodable lines are logged and skipped. A read error ends
/// the sequence and is kept in [`SourceStats`] for the caller to report.
pub struct CandidateSource<R> {
    path: PathBuf,
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
    stats: SourceStats,
}

impl CandidateSource<BufReader<File>> {
    /// Open a candidate list on disk
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => SourceError::Missing(path.to_path_buf()),
            _ => SourceError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        Ok(Self::from_reader(path, BufReader::new(file)))
    }
}

impl<R: BufRead> CandidateSource<R> {
    /// Wrap any buffered reader. `path` is only used for diagnostics.
    pub fn from_reader<P: AsRef<Path>>(path: P, reader: R) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            reader,
            buf: Vec::new(),
            line_no: 0,
            stats: SourceStats::default(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }
}

impl<R: BufRead> Iterator for CandidateSource<R> {
    type Item = Candidate;

    fn next(&mut self) -> Option<Candidate> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    error!(path = %self.path.display(), line = self.line_no + 1, "read failed: {}", e);
                    self.stats.set_read_error(e);
                    return None;
                }
            }
            self.line_no += 1;

            let parsed = match std::str::from_utf8(&self.buf) {
                Ok(line) => CandidateParser::parse_line(self.line_no, line),
                Err(_) => Err(ParseError::InvalidUtf8 { line: self.line_no }),
            };
            match parsed {
                Ok(Some(candidate)) => {
                    self.stats.parsed.fetch_add(1, Ordering::Relaxed);
                    return Some(candidate);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(path = %self.path.display(), "skipping record: {}", e);
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_parse_full_record() {
        let candidate = CandidateParser::parse_line(1, "1.2.3.4,8080,US,Org")
            .unwrap()
            .unwrap();
        assert_eq!(candidate.address, "1.2.3.4");
        assert_eq!(candidate.port, 8080);
        assert_eq!(candidate.country, "US");
        assert_eq!(candidate.organization, "Org");
    }

    #[test]
    fn test_parse_defaults_metadata() {
        let candidate = CandidateParser::parse_line(1, "1.2.3.4,8080").unwrap().unwrap();
        assert_eq!(candidate.country, UNKNOWN);
        assert_eq!(candidate.organization, UNKNOWN);

        let candidate = CandidateParser::parse_line(1, "1.2.3.4,8080,SG").unwrap().unwrap();
        assert_eq!(candidate.country, "SG");
        assert_eq!(candidate.organization, UNKNOWN);

        let candidate = CandidateParser::parse_line(1, "1.2.3.4,8080,,Org").unwrap().unwrap();
        assert_eq!(candidate.country, UNKNOWN);
        assert_eq!(candidate.organization, "Org");
    }

    #[test]
    fn test_parse_trims_fields() {
        let candidate = CandidateParser::parse_line(1, "  1.2.3.4 , 443 , ID , Some ISP \r")
            .unwrap()
            .unwrap();
        assert_eq!(candidate.canonical_key(), "1.2.3.4,443,ID,Some ISP");
    }

    #[test]
    fn test_parse_empty_and_comment_lines() {
        assert_eq!(CandidateParser::parse_line(1, ""), Ok(None));
        assert_eq!(CandidateParser::parse_line(1, "   "), Ok(None));
        assert_eq!(CandidateParser::parse_line(1, "# proxies"), Ok(None));
    }

    #[test]
    fn test_parse_invalid_port() {
        for bad in ["1.2.3.4,abc", "1.2.3.4,0", "1.2.3.4,65536", "1.2.3.4,-1", "1.2.3.4,"] {
            let err = CandidateParser::parse_line(7, bad).unwrap_err();
            assert!(matches!(err, ParseError::InvalidPort { line: 7, .. }), "{bad}");
        }
    }

    #[test]
    fn test_parse_missing_port() {
        let err = CandidateParser::parse_line(2, "1.2.3.4").unwrap_err();
        assert!(matches!(err, ParseError::MissingPort { line: 2, .. }));

        let err = CandidateParser::parse_line(2, ",8080").unwrap_err();
        assert!(matches!(err, ParseError::MissingPort { .. }));
    }

    #[test]
    fn test_parse_string_drops_bad_lines() {
        let content = "1.1.1.1,80,US,A\n# comment\n2.2.2.2,abc\n3.3.3.3,8080\n";
        let candidates = CandidateParser::parse_string(content);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[1].address, "3.3.3.3");
    }

    #[test]
    fn test_source_is_lazy_and_counts() {
        let input = "1.1.1.1,80\nbad,port\n\n2.2.2.2,443,DE,Hetzner\n4.4.4.4\n";
        let mut source = CandidateSource::from_reader("mem", Cursor::new(input));
        let stats = source.stats();

        let first = source.next().unwrap();
        assert_eq!(first.address, "1.1.1.1");
        assert_eq!(stats.parsed(), 1);
        assert_eq!(stats.skipped(), 0);

        let rest: Vec<_> = source.collect();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].organization, "Hetzner");
        assert_eq!(stats.parsed(), 2);
        assert_eq!(stats.skipped(), 2);
    }

    #[test]
    fn test_source_skips_undecodable_line() {
        let input: &[u8] = b"1.1.1.1,80\n2.2.2.2,80,\xff\xfe,Org\n3.3.3.3,80\n4.4.4.4,80\n";
        let source = CandidateSource::from_reader("mem", Cursor::new(input));
        let stats = source.stats();

        let addresses: Vec<_> = source.map(|c| c.address).collect();
        assert_eq!(addresses, ["1.1.1.1", "3.3.3.3", "4.4.4.4"]);
        assert_eq!(stats.parsed(), 3);
        assert_eq!(stats.skipped(), 1);
        assert!(stats.take_read_error().is_none());
    }

    /// Yields its data, then fails every read
    struct FailingReader {
        data: Cursor<Vec<u8>>,
    }

    impl io::Read for FailingReader {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            match self.data.read(out)? {
                0 => Err(io::Error::new(io::ErrorKind::Other, "disk gone")),
                n => Ok(n),
            }
        }
    }

    #[test]
    fn test_source_keeps_read_error() {
        let reader = FailingReader {
            data: Cursor::new(b"1.1.1.1,80\n2.2.2.2,80\n".to_vec()),
        };
        let source = CandidateSource::from_reader("mem", BufReader::new(reader));
        let stats = source.stats();

        let candidates: Vec<_> = source.collect();
        assert_eq!(candidates.len(), 2);
        let err = stats.take_read_error().unwrap();
        assert_eq!(err.to_string(), "disk gone");
        assert!(stats.take_read_error().is_none());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");
        match CandidateSource::open(&path) {
            Err(SourceError::Missing(p)) => assert_eq!(p, path),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected missing file"),
        }
    }

    #[test]
    fn test_open_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.txt");
        std::fs::write(&path, "9.9.9.9,3128,NL,Org\n").unwrap();
        let candidates: Vec<_> = CandidateSource::open(&path).unwrap().collect();
        assert_eq!(candidates, vec![Candidate::new("9.9.9.9", 3128)
            .with_country("NL")
            .with_organization("Org")]);
    }
}
