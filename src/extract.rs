//! Text extraction for the documents the knowledge base can ingest.
//!
//! Dispatches on file extension and returns cleaned UTF-8 text: carriage
//! returns removed, every line trimmed, blank lines dropped.
//!
//! | Extension | Reader |
//! |-----------|--------|
//! | `.pdf` | `pdf-extract` |
//! | `.txt`, `.md` | read as UTF-8 |
//! | `.docx` | `word/document.xml`, one line per paragraph |
//! | `.pptx` | `ppt/slides/slideN.xml` in slide order, one line per paragraph |
//! | `.xlsx` | a `--- Sheet: name ---` header, then one line per row (`a | b | c`) |
//! | `.json` | objects as `key: value | key: value`, arrays one item per line |
//! | `.csv` | one line per record (`a | b | c`), ragged rows allowed |

use std::borrow::Cow;
use std::io::Read;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};

use crate::error::{KbError, Result};

pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "docx", "json", "md", "pdf", "pptx", "txt", "xlsx"];

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
const XLSX_MAX_SHEETS: usize = 100;
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;

type Archive<'a> = zip::ZipArchive<std::io::Cursor<&'a [u8]>>;

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Whether `path` has an extension [`extract_file`] can read.
pub fn is_supported(path: &Path) -> bool {
    extension_of(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Read `path` and return its cleaned text.
///
/// Fails with [`KbError::Extraction`] for unsupported extensions, unreadable
/// content, or documents that contain no text.
pub fn extract_file(path: &Path) -> Result<String> {
    let ext = extension_of(path).unwrap_or_default();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(KbError::Extraction(format!(
            "unsupported format '.{}' for {}; supported: {}",
            ext,
            path.display(),
            SUPPORTED_EXTENSIONS.join(", ")
        )));
    }

    let bytes = std::fs::read(path)
        .map_err(|e| KbError::Extraction(format!("cannot read {}: {}", path.display(), e)))?;
    let text = extract_bytes(&bytes, &ext)?;
    let cleaned = clean(&text);
    if cleaned.is_empty() {
        return Err(KbError::Extraction(format!(
            "no text could be extracted from {}",
            path.display()
        )));
    }
    Ok(cleaned)
}

/// Extract raw (uncleaned) text from bytes of the given extension.
pub fn extract_bytes(bytes: &[u8], ext: &str) -> Result<String> {
    match ext {
        "pdf" => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| KbError::Extraction(format!("PDF: {}", e))),
        "txt" | "md" => String::from_utf8(bytes.to_vec())
            .map_err(|_| KbError::Extraction("text file is not valid UTF-8".into())),
        "docx" => extract_docx(bytes),
        "pptx" => extract_pptx(bytes),
        "xlsx" => extract_xlsx(bytes),
        "json" => extract_json(bytes),
        "csv" => extract_csv(bytes),
        other => Err(KbError::Extraction(format!("unsupported format '.{}'", other))),
    }
}

/// Remove `\r`, trim each line, and drop blank lines.
pub fn clean(raw: &str) -> String {
    raw.replace('\r', "")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Names of supported files directly inside `dir`, sorted.
pub fn list_supported_files(dir: &Path) -> Result<Vec<String>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(list_error(dir, e)),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| list_error(dir, e))?;
        let path = entry.path();
        if path.is_file() && is_supported(&path) {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

fn list_error(dir: &Path, e: std::io::Error) -> KbError {
    KbError::Extraction(format!("cannot list {}: {}", dir.display(), e))
}

// ============ OOXML ============

fn ooxml_err(e: impl std::fmt::Display) -> KbError {
    KbError::Extraction(format!("OOXML: {}", e))
}

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>> {
    zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(ooxml_err)
}

fn read_zip_entry_bounded(archive: &mut Archive<'_>, name: &str) -> Result<Vec<u8>> {
    let entry = archive.by_name(name).map_err(ooxml_err)?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(ooxml_err)?;
    if out.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ooxml_err(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, MAX_XML_ENTRY_BYTES
        )));
    }
    Ok(out)
}

/// Entries matching `{prefix}N.xml`, ordered by N.
fn numbered_entries(archive: &Archive<'_>, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(prefix) && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    names.sort_by_key(|name| {
        name.trim_start_matches(prefix)
            .trim_end_matches(".xml")
            .parse::<u32>()
            .unwrap_or(u32::MAX)
    });
    names
}

fn text_of(te: &quick_xml::events::BytesText<'_>) -> String {
    te.unescape().map(Cow::into_owned).unwrap_or_default()
}

/// Collect `<t>` text, ending a line at each closing `<p>`.
///
/// Works for both WordprocessingML (`w:p`/`w:t`) and DrawingML (`a:p`/`a:t`).
fn paragraph_text(xml: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_t = true,
            Ok(Event::Text(te)) if in_t => out.push_str(&text_of(&te)),
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml")?;
    paragraph_text(&xml)
}

fn extract_pptx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let mut out = String::new();
    for name in numbered_entries(&archive, "ppt/slides/slide") {
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        out.push_str(&paragraph_text(&xml)?);
        out.push('\n');
    }
    Ok(out)
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| String::from_utf8_lossy(a.value.as_ref()).into_owned())
}

fn extract_xlsx(bytes: &[u8]) -> Result<String> {
    let mut archive = open_archive(bytes)?;
    let shared = read_shared_strings(&mut archive)?;
    let titles = read_sheet_titles(&mut archive)?;

    let mut out = String::new();
    for (idx, name) in numbered_entries(&archive, "xl/worksheets/sheet")
        .into_iter()
        .take(XLSX_MAX_SHEETS)
        .enumerate()
    {
        let title = titles.get(idx).cloned().unwrap_or_else(|| {
            name.trim_start_matches("xl/worksheets/")
                .trim_end_matches(".xml")
                .to_string()
        });
        out.push_str(&format!("--- Sheet: {} ---\n", title));
        let xml = read_zip_entry_bounded(&mut archive, &name)?;
        out.push_str(&sheet_rows(&xml, &shared)?);
    }
    Ok(out)
}

fn read_shared_strings(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    // Workbooks with only numbers have no shared string table
    if !archive.file_names().any(|n| n == "xl/sharedStrings.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/sharedStrings.xml")?;
    let mut strings = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"t" => in_t = true,
                _ => {}
            },
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&text_of(&te));
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.extend(current.take()),
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

fn read_sheet_titles(archive: &mut Archive<'_>) -> Result<Vec<String>> {
    if !archive.file_names().any(|n| n == "xl/workbook.xml") {
        return Ok(Vec::new());
    }
    let xml = read_zip_entry_bounded(archive, "xl/workbook.xml")?;
    let mut titles = Vec::new();
    let mut reader = quick_xml::Reader::from_reader(xml.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                if let Some(name) = attr_value(&e, b"name") {
                    titles.push(name);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(titles)
}

#[derive(Clone, Copy, PartialEq)]
enum CellKind {
    Shared,
    Inline,
    Literal,
}

/// One line per `<row>`, cells joined with `" | "`.
fn sheet_rows(xml: &[u8], shared: &[String]) -> Result<String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut kind = CellKind::Literal;
    let mut value = String::new();
    let mut capturing = false;
    let mut cells = 0usize;

    loop {
        if cells >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => row.clear(),
                b"c" => {
                    kind = match attr_value(&e, b"t").as_deref() {
                        Some("s") => CellKind::Shared,
                        Some("inlineStr") => CellKind::Inline,
                        _ => CellKind::Literal,
                    };
                    value.clear();
                }
                b"v" => capturing = true,
                b"t" if kind == CellKind::Inline => capturing = true,
                _ => {}
            },
            Ok(Event::Text(te)) if capturing => value.push_str(&text_of(&te)),
            Ok(Event::Empty(e)) if e.local_name().as_ref() == b"c" => {
                row.push(String::new());
                cells += 1;
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => capturing = false,
                b"c" => {
                    let cell = match kind {
                        CellKind::Shared => value
                            .trim()
                            .parse::<usize>()
                            .ok()
                            .and_then(|i| shared.get(i).cloned())
                            .unwrap_or_default(),
                        CellKind::Inline | CellKind::Literal => value.clone(),
                    };
                    row.push(cell);
                    cells += 1;
                }
                b"row" => {
                    if row.iter().any(|c| !c.is_empty()) {
                        out.push_str(&row.join(" | "));
                        out.push('\n');
                    }
                    row.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml_err(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ JSON ============

fn extract_json(bytes: &[u8]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| KbError::Extraction(format!("JSON: {}", e)))?;
    Ok(flatten_json(&value))
}

fn scalar_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn object_line(map: &serde_json::Map<String, serde_json::Value>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}: {}", k, scalar_text(v)))
        .collect::<Vec<_>>()
        .join(" | ")
}

/// Objects become one `key: value | ...` line; arrays one line per element.
fn flatten_json(value: &serde_json::Value) -> String {
    let items: Vec<&serde_json::Value> = match value {
        serde_json::Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(map) => object_line(map),
            other => scalar_text(other),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ============ CSV ============

fn extract_csv(bytes: &[u8]) -> Result<String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut lines = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| KbError::Extraction(format!("CSV: {}", e)))?;
        lines.push(record.iter().collect::<Vec<_>>().join(" | "));
    }
    Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clean_strips_blank_lines_and_padding() {
        assert_eq!(clean("  a  \r\n\r\n\tb\n   \nc"), "a\nb\nc");
        assert_eq!(clean(" \n \r\n"), "");
    }

    #[test]
    fn unsupported_extension_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.rtf");
        std::fs::write(&path, "hello").unwrap();
        let err = extract_file(&path).unwrap_err();
        assert!(matches!(err, KbError::Extraction(_)));
    }

    #[test]
    fn unreadable_file_is_reported_at_extraction() {
        let dir = TempDir::new().unwrap();
        let err = extract_file(&dir.path().join("absent.txt")).unwrap_err();
        assert!(matches!(err, KbError::Extraction(_)));
        assert_eq!(err.stage(), crate::error::Stage::Extraction);
        assert!(err.to_string().contains("absent.txt"));
    }

    #[test]
    fn csv_rows_join_with_pipes() {
        let csv = b"peril,covered\nflood,\"no, separate policy\"\nhail,yes,after deductible\n";
        assert_eq!(
            extract_bytes(csv, "csv").unwrap(),
            "peril | covered\nflood | no, separate policy\nhail | yes | after deductible"
        );
        assert!(matches!(
            extract_bytes(b"a,b\n\xff\xfe,c\n", "csv"),
            Err(KbError::Extraction(_))
        ));
    }

    #[test]
    fn blank_text_file_is_extraction_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "  \n\n  ").unwrap();
        assert!(matches!(extract_file(&path), Err(KbError::Extraction(_))));
    }

    #[test]
    fn markdown_is_cleaned() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Guide.MD");
        std::fs::write(&path, "# Title\r\n\r\n  Body line  \n").unwrap();
        assert_eq!(extract_file(&path).unwrap(), "# Title\nBody line");
    }

    #[test]
    fn json_objects_and_arrays_flatten() {
        let json = br#"[{"age": 31, "name": "Ana"}, "loose", 7]"#;
        assert_eq!(
            extract_bytes(json, "json").unwrap(),
            "age: 31 | name: Ana\nloose\n7"
        );
        let single = br#"{"flood": false, "policy": "HO-3"}"#;
        assert_eq!(
            extract_bytes(single, "json").unwrap(),
            "flood: false | policy: HO-3"
        );
    }

    #[test]
    fn invalid_inputs_return_errors() {
        assert!(matches!(
            extract_bytes(b"not a pdf", "pdf"),
            Err(KbError::Extraction(_))
        ));
        assert!(matches!(
            extract_bytes(b"not a zip", "docx"),
            Err(KbError::Extraction(_))
        ));
        assert!(matches!(
            extract_bytes(b"{ nope", "json"),
            Err(KbError::Extraction(_))
        ));
    }

    #[test]
    fn paragraphs_become_lines() {
        let xml = br#"<w:document xmlns:w="x"><w:body>
            <w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
            <w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
        </w:body></w:document>"#;
        let text = clean(&paragraph_text(xml).unwrap());
        assert_eq!(text, "Hello world\nSecond & last");
    }

    #[test]
    fn sheet_rows_resolve_shared_strings() {
        let shared = vec!["Peril".to_string(), "Flood".to_string()];
        let xml = br#"<worksheet><sheetData>
            <row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1"><v>12.5</v></c></row>
            <row r="2"><c r="A2" t="s"><v>1</v></c><c r="B2" t="inlineStr"><is><t>excluded</t></is></c></row>
        </sheetData></worksheet>"#;
        assert_eq!(
            sheet_rows(xml, &shared).unwrap(),
            "Peril | 12.5\nFlood | excluded\n"
        );
    }

    #[test]
    fn list_supported_files_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["b.pdf", "a.txt", "c.exe", "d.docx"] {
            std::fs::write(dir.path().join(name), "x").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.md")).unwrap();
        assert_eq!(
            list_supported_files(dir.path()).unwrap(),
            vec!["a.txt", "b.pdf", "d.docx"]
        );
        assert!(list_supported_files(&dir.path().join("missing"))
            .unwrap()
            .is_empty());
    }
}
