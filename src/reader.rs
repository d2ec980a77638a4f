// Canonical Reader: raw statement bytes -> (body rows, header row)
//
// Decoding walks a fixed encoding fallback list. Splitting uses the csv crate in
// flexible mode, so rows keep their natural width; consumers must guard index
// access with `.get()`.

use crate::error::{IntakeError, Result};
use csv::ReaderBuilder;
use encoding_rs::{Encoding, UTF_16BE, UTF_16LE, UTF_8, WINDOWS_1252};
use serde::{Deserialize, Serialize};
use tracing::debug;

// ============================================================================
// ENCODINGS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextEncoding {
    Utf8,
    Utf16Le,
    Utf16Be,
    Latin1,
    Windows1252,
    Ascii,
}

/// Tried in order after the declared encoding and any byte-order mark.
/// Windows-1252 maps every byte, so Latin-1 is only reached when declared.
pub const FALLBACK_ENCODINGS: [TextEncoding; 6] = [
    TextEncoding::Utf8,
    TextEncoding::Utf16Le,
    TextEncoding::Utf16Be,
    TextEncoding::Ascii,
    TextEncoding::Windows1252,
    TextEncoding::Latin1,
];

impl TextEncoding {
    /// Resolve a WHATWG label ("utf-8", "latin1", "cp1252", "utf-16le", ...).
    ///
    /// WHATWG folds ISO-8859-1 into windows-1252; the raw "latin1" and
    /// "iso-8859-1" labels are kept distinct here so a caller can ask for the
    /// strict one-byte-per-char mapping.
    pub fn from_label(label: &str) -> Option<Self> {
        let lower = label.trim().to_ascii_lowercase();
        match lower.as_str() {
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => return Some(TextEncoding::Latin1),
            "ascii" | "us-ascii" => return Some(TextEncoding::Ascii),
            _ => {}
        }
        let encoding = Encoding::for_label(lower.as_bytes())?;
        if encoding == UTF_8 {
            Some(TextEncoding::Utf8)
        } else if encoding == UTF_16LE {
            Some(TextEncoding::Utf16Le)
        } else if encoding == UTF_16BE {
            Some(TextEncoding::Utf16Be)
        } else if encoding == WINDOWS_1252 {
            Some(TextEncoding::Windows1252)
        } else {
            None
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Windows1252 => "windows-1252",
            TextEncoding::Ascii => "US-ASCII",
        }
    }

    /// Strict decode: `None` on any malformed sequence.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            // NUL bytes are valid UTF-8 but mean UTF-16 text without a BOM
            TextEncoding::Utf8 if bytes.contains(&0) => None,
            TextEncoding::Utf8 => UTF_8
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
            TextEncoding::Utf16Le => {
                if !looks_like_utf16(bytes, 1) {
                    return None;
                }
                UTF_16LE
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|s| s.into_owned())
            }
            TextEncoding::Utf16Be => {
                if !looks_like_utf16(bytes, 0) {
                    return None;
                }
                UTF_16BE
                    .decode_without_bom_handling_and_without_replacement(bytes)
                    .map(|s| s.into_owned())
            }
            TextEncoding::Latin1 => Some(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Windows1252 => WINDOWS_1252
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|s| s.into_owned()),
            TextEncoding::Ascii => {
                if bytes.is_ascii() && !bytes.contains(&0) {
                    Some(bytes.iter().map(|&b| b as char).collect())
                } else {
                    None
                }
            }
        }
    }
}

/// Any even-length byte string decodes as UTF-16, so require the shape of
/// mostly-ASCII UTF-16 text: an even length and NUL high bytes in at least a
/// third of the code units. `zero_offset` is 1 for LE, 0 for BE.
fn looks_like_utf16(bytes: &[u8], zero_offset: usize) -> bool {
    if bytes.is_empty() || bytes.len() % 2 != 0 {
        return false;
    }
    let units = bytes.len() / 2;
    let zero_high = bytes
        .chunks_exact(2)
        .filter(|unit| unit[zero_offset] == 0)
        .count();
    zero_high * 3 >= units
}

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];
const UTF16LE_BOM: &[u8] = &[0xFF, 0xFE];
const UTF16BE_BOM: &[u8] = &[0xFE, 0xFF];

/// A byte-order mark settles the encoding before any guessing.
fn sniff_bom(bytes: &[u8]) -> Option<(TextEncoding, usize)> {
    if bytes.starts_with(UTF8_BOM) {
        Some((TextEncoding::Utf8, UTF8_BOM.len()))
    } else if bytes.starts_with(UTF16LE_BOM) {
        Some((TextEncoding::Utf16Le, UTF16LE_BOM.len()))
    } else if bytes.starts_with(UTF16BE_BOM) {
        Some((TextEncoding::Utf16Be, UTF16BE_BOM.len()))
    } else {
        None
    }
}

/// Decode with the declared encoding first, then a byte-order mark's
/// encoding, then the fallback list. A mark is stripped whichever encoding wins.
pub fn decode_text(bytes: &[u8], declared: Option<TextEncoding>) -> Result<(String, TextEncoding)> {
    let mut candidates: Vec<TextEncoding> = Vec::with_capacity(FALLBACK_ENCODINGS.len() + 2);
    let mut body = bytes;

    if let Some(encoding) = declared {
        candidates.push(encoding);
    }
    if let Some((encoding, bom_len)) = sniff_bom(bytes) {
        if !candidates.contains(&encoding) {
            candidates.push(encoding);
        }
        body = &bytes[bom_len..];
    }
    for encoding in FALLBACK_ENCODINGS {
        if !candidates.contains(&encoding) {
            candidates.push(encoding);
        }
    }

    for encoding in candidates {
        if let Some(text) = encoding.decode(body) {
            let text = text.strip_prefix('\u{feff}').map(str::to_string).unwrap_or(text);
            debug!(encoding = encoding.name(), bytes = bytes.len(), "decoded statement text");
            return Ok((text, encoding));
        }
    }

    Err(IntakeError::InvalidInput(format!(
        "{} bytes could not be decoded in any supported encoding",
        bytes.len()
    )))
}

/// Fold "\r\n" and lone "\r" into "\n".
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

// ============================================================================
// READ OPTIONS / TABLE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadOptions {
    pub delimiter: u8,
    pub has_header_row: bool,
    pub skip_empty_lines: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            delimiter: b',',
            has_header_row: true,
            skip_empty_lines: true,
        }
    }
}

impl ReadOptions {
    pub fn tab_separated() -> Self {
        ReadOptions {
            delimiter: b'\t',
            ..Self::default()
        }
    }

    pub fn with_header_row(mut self, has_header_row: bool) -> Self {
        self.has_header_row = has_header_row;
        self
    }
}

/// Decoded grid. Rows are not padded to the header width.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub encoding: TextEncoding,
}

fn is_blank(row: &[String]) -> bool {
    row.iter().all(|cell| cell.trim().is_empty())
}

/// "Column 1" ... "Column N"
pub fn positional_headers(width: usize) -> Vec<String> {
    (1..=width).map(|i| format!("Column {}", i)).collect()
}

/// Split decoded text into cells.
pub fn split_records(text: &str, options: &ReadOptions) -> Result<Vec<Vec<String>>> {
    let normalized = normalize_line_endings(text);
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter)
        .double_quote(true)
        .from_reader(normalized.as_bytes());

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        let row: Vec<String> = record.iter().map(|cell| cell.to_string()).collect();
        if options.skip_empty_lines && is_blank(&row) {
            continue;
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Arrange split records into (headers, body).
pub fn into_table(records: Vec<Vec<String>>, has_header_row: bool) -> (Vec<String>, Vec<Vec<String>>) {
    if !has_header_row {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        return (positional_headers(width), records);
    }

    let mut iter = records.into_iter().skip_while(|row| is_blank(row));
    match iter.next() {
        Some(header) => {
            let headers = header.into_iter().map(|h| h.trim().to_string()).collect();
            (headers, iter.collect())
        }
        None => (Vec::new(), Vec::new()),
    }
}

/// Decode, split and arrange a delimited statement file.
pub fn read_table(
    bytes: &[u8],
    declared: Option<TextEncoding>,
    options: &ReadOptions,
) -> Result<CanonicalTable> {
    let (text, encoding) = decode_text(bytes, declared)?;
    let records = split_records(&text, options)?;
    let (headers, rows) = into_table(records, options.has_header_row);
    debug!(
        columns = headers.len(),
        rows = rows.len(),
        encoding = encoding.name(),
        "read canonical table"
    );
    Ok(CanonicalTable {
        headers,
        rows,
        encoding,
    })
}

/// Turn extracted document text into positional rows: one row per non-blank
/// line, cells split on tabs or runs of two or more spaces.
pub fn rows_from_text(text: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let normalized = normalize_line_endings(text);
    let rows: Vec<Vec<String>> = normalized
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(split_text_line)
        .collect();
    into_table(rows, false)
}

fn split_text_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    for tab_part in line.split('\t') {
        let mut current = String::new();
        let mut spaces = 0usize;
        for ch in tab_part.chars() {
            if ch == ' ' {
                spaces += 1;
                continue;
            }
            if spaces >= 2 && !current.trim().is_empty() {
                cells.push(current.trim().to_string());
                current.clear();
            } else if spaces > 0 {
                current.push(' ');
            }
            spaces = 0;
            current.push(ch);
        }
        if !current.trim().is_empty() {
            cells.push(current.trim().to_string());
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(text: &str) -> CanonicalTable {
        read_table(text.as_bytes(), None, &ReadOptions::default()).unwrap()
    }

    #[test]
    fn test_quoted_field_with_comma_and_doubled_quotes() {
        let table = read("Name,Amount\n\"Jane, \"\"Jay\"\" Doe\",10.00\n");
        assert_eq!(table.headers, vec!["Name", "Amount"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], "Jane, \"Jay\" Doe");
        assert_eq!(table.rows[0][1], "10.00");
    }

    #[test]
    fn test_line_ending_variants() {
        let table = read("A,B\r\n1,2\r3,4\n5,6");
        assert_eq!(table.rows, vec![
            vec!["1".to_string(), "2".to_string()],
            vec!["3".to_string(), "4".to_string()],
            vec!["5".to_string(), "6".to_string()],
        ]);
    }

    #[test]
    fn test_strips_utf8_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"Date,Amount\n01/02/2025,5\n");
        let table = read_table(&bytes, None, &ReadOptions::default()).unwrap();
        assert_eq!(table.headers[0], "Date");
        assert_eq!(table.encoding, TextEncoding::Utf8);
    }

    #[test]
    fn test_blank_rows_dropped_and_header_is_first_non_blank() {
        let table = read("\n,,\nDate,Payee\n\n01/02/2025,Shop\n , \n");
        assert_eq!(table.headers, vec!["Date", "Payee"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_blank_rows_kept_when_requested() {
        let options = ReadOptions {
            skip_empty_lines: false,
            ..ReadOptions::default()
        };
        let table = read_table(b"Date,Payee\n,\n01/02/2025,Shop\n", None, &options).unwrap();
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn test_positional_headers_without_header_row() {
        let options = ReadOptions::default().with_header_row(false);
        let table = read_table(b"a,b\nc,d,e\n", None, &options).unwrap();
        assert_eq!(table.headers, vec!["Column 1", "Column 2", "Column 3"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].len(), 2, "short rows are not padded");
    }

    #[test]
    fn test_unterminated_quote_is_literal() {
        let table = read("Payee,Memo\nAcme,\"open quote, never closed\nnext line");
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], "Acme");
        assert!(table.rows[0][1].starts_with("open quote, never closed"));
        assert!(table.rows[0][1].contains("next line"));
    }

    #[test]
    fn test_single_byte_fallback_matches_utf8_row_count() {
        let utf8 = "Date,Payee,Amount\n01/02/2025,Caf\u{e9} M\u{fc}ller,-4.50\n01/03/2025,Cr\u{e8}me,-2.00\n";
        let latin1: Vec<u8> = utf8.chars().map(|c| c as u32 as u8).collect();
        assert!(std::str::from_utf8(&latin1).is_err());

        let from_utf8 = read_table(utf8.as_bytes(), None, &ReadOptions::default()).unwrap();
        let from_latin1 = read_table(&latin1, None, &ReadOptions::default()).unwrap();

        assert_eq!(from_latin1.encoding, TextEncoding::Windows1252);
        assert_eq!(from_latin1.rows.len(), from_utf8.rows.len());
        assert_eq!(from_latin1.rows[0][1], "Caf\u{e9} M\u{fc}ller");
    }

    #[test]
    fn test_windows1252_fallback_before_latin1() {
        let bytes = b"Payee,Amount\nEuro \x80 fee,1.00\n";
        let table = read_table(bytes, None, &ReadOptions::default()).unwrap();
        assert_eq!(table.encoding, TextEncoding::Windows1252);
        assert_eq!(table.rows[0][0], "Euro \u{20ac} fee");
    }

    #[test]
    fn test_declared_latin1_keeps_c1_bytes() {
        let (text, encoding) = decode_text(b"\x80", Some(TextEncoding::Latin1)).unwrap();
        assert_eq!(encoding, TextEncoding::Latin1);
        assert_eq!(text, "\u{80}");
    }

    #[test]
    fn test_declared_encoding_wins_over_bom() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice(b"\xe9");
        let (text, encoding) = decode_text(&bytes, Some(TextEncoding::Windows1252)).unwrap();
        assert_eq!(encoding, TextEncoding::Windows1252);
        assert_eq!(text, "\u{e9}");
    }

    #[test]
    fn test_utf16le_with_bom() {
        let mut bytes = vec![0xFF, 0xFE];
        for unit in "Date,Amount\n01/02/2025,5\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_le_bytes());
        }
        let table = read_table(&bytes, None, &ReadOptions::default()).unwrap();
        assert_eq!(table.encoding, TextEncoding::Utf16Le);
        assert_eq!(table.headers, vec!["Date", "Amount"]);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn test_utf16be_without_bom() {
        let mut bytes = Vec::new();
        for unit in "A,B\n1,2\n".encode_utf16() {
            bytes.extend_from_slice(&unit.to_be_bytes());
        }
        let (text, encoding) = decode_text(&bytes, None).unwrap();
        assert_eq!(encoding, TextEncoding::Utf16Be);
        assert_eq!(text, "A,B\n1,2\n");
    }

    #[test]
    fn test_declared_encoding_tried_first() {
        let bytes = [0x93u8, b'h', b'i', 0x94];
        let (text, encoding) = decode_text(&bytes, Some(TextEncoding::Windows1252)).unwrap();
        assert_eq!(encoding, TextEncoding::Windows1252);
        assert_eq!(text, "\u{201c}hi\u{201d}");
    }

    #[test]
    fn test_encoding_labels() {
        assert_eq!(TextEncoding::from_label("UTF-8"), Some(TextEncoding::Utf8));
        assert_eq!(TextEncoding::from_label("latin1"), Some(TextEncoding::Latin1));
        assert_eq!(TextEncoding::from_label("cp1252"), Some(TextEncoding::Windows1252));
        assert_eq!(TextEncoding::from_label("utf-16le"), Some(TextEncoding::Utf16Le));
        assert_eq!(TextEncoding::from_label("klingon"), None);
    }

    #[test]
    fn test_tab_delimiter() {
        let table = read_table(b"Date\tPayee\n01/02/2025\tShop, Inc\n", None, &ReadOptions::tab_separated()).unwrap();
        assert_eq!(table.rows[0][1], "Shop, Inc");
    }

    #[test]
    fn test_rows_from_document_text() {
        let text = "ACME BANK  Statement\n\nStatement Beginning Balance     $1,200.00\nStatement Ending Balance\t$950.10\n";
        let (headers, rows) = rows_from_text(text);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1], vec!["Statement Beginning Balance", "$1,200.00"]);
        assert_eq!(rows[2], vec!["Statement Ending Balance", "$950.10"]);
        assert_eq!(headers, vec!["Column 1", "Column 2"]);
    }

    #[test]
    fn test_empty_input() {
        let table = read("");
        assert!(table.headers.is_empty());
        assert!(table.rows.is_empty());
    }
}
