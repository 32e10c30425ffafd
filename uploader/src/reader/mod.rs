//! Line-oriented file reader with encoding auto-detection.
//!
//! Turns a user-selected [`RawFile`] into a [`LineSet`]: the ordered,
//! non-blank lines every later stage works on. Nothing phone-specific
//! happens here.

use std::ops::Deref;
use std::path::Path;

use serde::Serialize;

use crate::api::logs::{log_info, log_success};
use crate::error::{ParseError, ParseResult};

/// Largest sample handed to chardet.
const SNIFF_LEN: usize = 64 * 1024;

/// Single-byte encoding used when a non-UTF-8 file cannot be identified.
const FALLBACK_ENCODING: &str = "windows-1252";

/// UTF-8 byte order mark.
const UTF8_BOM: &str = "\u{feff}";

/// What the selected file will be used for.
///
/// Tab-separated files are shown in previews but never uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePurpose {
    Preview,
    Upload,
}

/// A selected file, loaded fully in memory.
#[derive(Debug, Clone)]
pub struct RawFile {
    name: String,
    bytes: Vec<u8>,
}

impl RawFile {
    /// Wrap bytes received from elsewhere (e.g. a multipart field).
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk.
    pub async fn open(path: impl AsRef<Path>) -> ParseResult<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| ParseError::ReadFailure(format!("{}: {}", path.display(), e)))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("contacts.txt")
            .to_string();
        Ok(Self { name, bytes })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lower-cased extension, if the name has one.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
    }

    /// Reject file types the given purpose does not accept.
    pub fn ensure_supported(&self, purpose: FilePurpose) -> ParseResult<()> {
        match (self.extension().as_deref(), purpose) {
            (None, _) | (Some("txt"), _) | (Some("csv"), _) => Ok(()),
            (Some("tsv"), FilePurpose::Preview) => Ok(()),
            (Some(ext), _) => Err(ParseError::UnsupportedExtension(format!(".{}", ext))),
        }
    }
}

/// Ordered, non-blank lines of a file.
///
/// `len()` is the total line count used for all downstream accounting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineSet {
    lines: Vec<String>,
    encoding: String,
}

impl LineSet {
    /// Build a line set from already-split lines, dropping blank ones.
    ///
    /// Only spaces and carriage returns are stripped: a trailing tab is an
    /// empty last field and stays.
    pub fn from_lines<I, S>(lines: I) -> ParseResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let lines: Vec<String> = lines
            .into_iter()
            .filter(|l| !l.as_ref().trim().is_empty())
            .map(|l| l.as_ref().trim_matches(|c| c == ' ' || c == '\r').to_string())
            .collect();

        if lines.is_empty() {
            return Err(ParseError::EmptyFile);
        }

        Ok(Self {
            lines,
            encoding: "utf-8".to_string(),
        })
    }

    /// Encoding the source file was decoded with.
    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn as_slice(&self) -> &[String] {
        &self.lines
    }
}

impl Deref for LineSet {
    type Target = [String];

    fn deref(&self) -> &[String] {
        &self.lines
    }
}

/// Detect the encoding of raw bytes using chardet
///
/// The whole buffer must be valid UTF-8 to be read as UTF-8. Otherwise
/// chardet guesses from the lines holding non-ASCII bytes, and a guess that
/// is UTF-8, ASCII or unknown falls back to Windows-1252.
pub fn detect_encoding(bytes: &[u8]) -> String {
    if std::str::from_utf8(bytes).is_ok() {
        return "utf-8".to_string();
    }

    let sample = non_ascii_sample(bytes);
    let charset = chardet::detect(&sample).0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "" | "ascii" | "utf-8" | "utf8" => FALLBACK_ENCODING.to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        other if encoding_rs::Encoding::for_label(other.as_bytes()).is_some() => {
            other.to_string()
        }
        _ => FALLBACK_ENCODING.to_string(),
    }
}

/// Lines containing non-ASCII bytes, up to [`SNIFF_LEN`] bytes.
fn non_ascii_sample(bytes: &[u8]) -> Vec<u8> {
    let mut sample = Vec::new();
    for line in bytes.split(|&b| b == b'\n').filter(|l| !l.is_ascii()) {
        if sample.len() + line.len() + 1 > SNIFF_LEN && !sample.is_empty() {
            break;
        }
        sample.extend_from_slice(line);
        sample.push(b'\n');
    }
    sample
}

/// Decode bytes to a string using the given encoding.
///
/// Unknown encodings fall back to lossy UTF-8.
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => String::from_utf8_lossy(bytes).into_owned(),
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.into_owned(),
        label => match encoding_rs::Encoding::for_label(label.as_bytes()) {
            Some(enc) => enc.decode(bytes).0.into_owned(),
            None => String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

/// Heuristic binary check: NUL bytes never appear in text we accept.
fn looks_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0)
}

/// Decode a file and split it into its [`LineSet`].
///
/// Fails with [`ParseError::EmptyFile`] when no non-blank line remains and
/// with [`ParseError::ReadFailure`] for binary input.
pub fn read_lines(file: &RawFile) -> ParseResult<LineSet> {
    log_info(format!("📖 Reading {} ({} bytes)...", file.name(), file.size()));

    let bytes = file.bytes();
    if bytes.is_empty() {
        return Err(ParseError::EmptyFile);
    }
    if looks_binary(bytes) {
        return Err(ParseError::ReadFailure(format!(
            "{} does not look like a text file",
            file.name()
        )));
    }

    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(&content);

    let mut line_set = LineSet::from_lines(content.lines())?;
    line_set.encoding = encoding;

    log_success(format!(
        "Read {} lines (encoding: {})",
        line_set.len(),
        line_set.encoding
    ));
    Ok(line_set)
}

/// Read a file from disk and split it into lines.
pub async fn read_path(path: impl AsRef<Path>) -> ParseResult<(RawFile, LineSet)> {
    let file = RawFile::open(path).await?;
    let lines = read_lines(&file)?;
    Ok((file, lines))
}
