//! Preview of a contact file before upload.
//!
//! Infers the field separator from the first line and parses a handful of
//! sample rows so the user can confirm the file looks right. Advisory only:
//! nothing here changes how the file is chunked or uploaded.

use serde::{Serialize, Serializer};

use crate::api::logs::{log_info, log_success};
use crate::error::{ParseError, ParseResult};
use crate::reader::{read_lines, FilePurpose, LineSet, RawFile};

/// Maximum number of parsed rows shown to the user.
pub const MAX_SAMPLE_ROWS: usize = 5;

/// Header used when the file has a single column of phone numbers.
pub const SINGLE_COLUMN_HEADER: &str = "telefone";

/// Field separator of a contact file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Tab,
    Semicolon,
    Pipe,
    Comma,
    /// Single column, one record per line.
    None,
}

impl Separator {
    /// Candidates in detection priority order.
    const PRIORITY: [Separator; 4] = [
        Separator::Tab,
        Separator::Semicolon,
        Separator::Pipe,
        Separator::Comma,
    ];

    pub fn as_char(self) -> Option<char> {
        match self {
            Separator::Tab => Some('\t'),
            Separator::Semicolon => Some(';'),
            Separator::Pipe => Some('|'),
            Separator::Comma => Some(','),
            Separator::None => None,
        }
    }

    /// Human-readable name for logs and the CLI.
    pub fn label(self) -> &'static str {
        match self {
            Separator::Tab => "TAB",
            Separator::Semicolon => ";",
            Separator::Pipe => "|",
            Separator::Comma => ",",
            Separator::None => "none",
        }
    }
}

impl Serialize for Separator {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_char() {
            Some(c) => serializer.serialize_str(c.encode_utf8(&mut [0; 4])),
            None => serializer.serialize_none(),
        }
    }
}

/// Read-only view shown to the user before committing to an upload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub headers: Vec<String>,
    pub separator: Separator,
    pub sample_rows: Vec<Vec<String>>,
    /// Data rows, excluding the header line when there is one.
    pub total_rows: usize,
}

/// Pick the separator by testing, in order, tab, semicolon, pipe, comma.
pub fn detect_separator(first_line: &str) -> Separator {
    Separator::PRIORITY
        .into_iter()
        .find(|sep| sep.as_char().is_some_and(|c| first_line.contains(c)))
        .unwrap_or(Separator::None)
}

/// Split one line into fields, honouring double quotes.
pub fn parse_row(line: &str, separator: Separator, line_number: usize) -> ParseResult<Vec<String>> {
    let Some(delimiter) = separator.as_char() else {
        return Ok(vec![line.trim().to_string()]);
    };

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(line.as_bytes());

    let mut record = csv::StringRecord::new();
    match reader.read_record(&mut record) {
        Ok(true) => Ok(record.iter().map(str::to_string).collect()),
        Ok(false) => Ok(Vec::new()),
        Err(e) => Err(ParseError::Preview {
            line: line_number,
            message: e.to_string(),
        }),
    }
}

/// Build the preview for a line set.
pub fn build_preview(lines: &LineSet) -> ParseResult<Preview> {
    let first = lines.first().ok_or(ParseError::EmptyFile)?;
    let separator = detect_separator(first);

    let (headers, data_start) = match separator {
        Separator::None => (vec![SINGLE_COLUMN_HEADER.to_string()], 0),
        sep => (parse_row(first, sep, 1)?, 1),
    };

    let sample_rows = lines
        .iter()
        .enumerate()
        .skip(data_start)
        .take(MAX_SAMPLE_ROWS)
        .map(|(idx, line)| parse_row(line, separator, idx + 1))
        .collect::<ParseResult<Vec<_>>>()?;

    let preview = Preview {
        headers,
        separator,
        sample_rows,
        total_rows: lines.len() - data_start,
    };

    log_info(format!("🔎 Detected separator: '{}'", separator.label()));
    log_success(format!(
        "{} column(s), {} row(s)",
        preview.headers.len(),
        preview.total_rows
    ));
    Ok(preview)
}

/// Preview-only path: accepts `.tsv` in addition to upload file types.
pub fn preview_file(file: &RawFile) -> ParseResult<Preview> {
    file.ensure_supported(FilePurpose::Preview)?;
    let lines = read_lines(file)?;
    build_preview(&lines)
}
