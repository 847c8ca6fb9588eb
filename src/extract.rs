//! Text extraction for binary documents (PDF, OOXML, legacy Excel).
//!
//! Callers hand over bytes plus a MIME type and get UTF-8 text back.
//! Extraction never panics: malformed input yields an [`ExtractError`].
//!
//! | Format | Reader | Output |
//! |--------|--------|--------|
//! | PDF | `pdf-extract` | one string per page |
//! | DOCX | `zip` + `quick-xml` | paragraphs separated by newlines |
//! | XLSX | `zip` + `quick-xml` | one [`Sheet`] per worksheet, rendered as CSV |
//! | XLS | `calamine` | same as XLSX |
//!
//! Worksheet grids are bounded: references past column `XFD` or row
//! 1,048,576 are rejected, and so is any grid larger than
//! [`MAX_GRID_CELLS`].

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::io::{Cursor, Read};

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_DOCX: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const MIME_XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Maximum sheets to process in an xlsx.
const XLSX_MAX_SHEETS: usize = 100;
/// Maximum cells to process per sheet.
const XLSX_MAX_CELLS_PER_SHEET: usize = 100_000;
/// Last addressable column (`XFD`).
const MAX_COLUMNS: usize = 16_384;
/// Last addressable row.
const MAX_ROWS: usize = 1_048_576;
/// Upper bound on rows × width of a rendered sheet.
pub const MAX_GRID_CELLS: usize = 1_000_000;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
}

fn ooxml(e: impl std::fmt::Display) -> ExtractError {
    ExtractError::Ooxml(e.to_string())
}

/// A worksheet reduced to a grid of display strings.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    /// Renders the grid as CSV. Short rows are padded to the widest row.
    pub fn to_csv(&self) -> String {
        let width = self.rows.iter().map(|r| r.len()).max().unwrap_or(0);
        self.rows
            .iter()
            .map(|row| {
                (0..width)
                    .map(|i| csv_field(row.get(i).map(String::as_str).unwrap_or("")))
                    .collect::<Vec<_>>()
                    .join(",")
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Extracts plain text from binary content.
pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => Ok(extract_pdf_pages(bytes)?.join("\n")),
        MIME_DOCX => extract_docx(bytes),
        MIME_XLSX => Ok(extract_workbook(bytes)?
            .iter()
            .map(Sheet::to_csv)
            .collect::<Vec<_>>()
            .join("\n\n")),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

// ============ PDF ============

/// Text of each page, in page order.
pub fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

// ============ ZIP helpers ============

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

fn open_archive(bytes: &[u8]) -> Result<Archive<'_>, ExtractError> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(ooxml)
}

fn has_entry(archive: &Archive<'_>, name: &str) -> bool {
    archive.file_names().any(|n| n == name)
}

fn read_zip_entry_bounded(
    archive: &mut Archive<'_>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive.by_name(name).map_err(ooxml)?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(ooxml)?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Ooxml(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn attr(e: &BytesStart<'_>, local: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == local)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

// ============ DOCX ============

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = open_archive(bytes)?;
    if !has_entry(&archive, "word/document.xml") {
        return Err(ExtractError::Ooxml(
            "word/document.xml not found".to_string(),
        ));
    }
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    extract_paragraph_text(&xml)
}

fn numeric_suffix(name: &str, prefix: &str) -> u32 {
    name.trim_start_matches(prefix)
        .trim_end_matches(".xml")
        .parse::<u32>()
        .unwrap_or(u32::MAX)
}

/// Collects `<*:t>` runs. `<*:p>` ends a line, `<*:tab>` and `<*:br>` map
/// to tab and newline.
fn extract_paragraph_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut in_t = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    in_t = true;
                }
            }
            Ok(Event::Text(te)) if in_t => {
                out.push_str(&te.unescape().map_err(ooxml)?);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_t = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

// ============ XLSX ============

/// Every worksheet in workbook order, up to the sheet limit.
pub fn extract_workbook(bytes: &[u8]) -> Result<Vec<Sheet>, ExtractError> {
    let mut archive = open_archive(bytes)?;
    let shared_strings = if has_entry(&archive, "xl/sharedStrings.xml") {
        let xml = read_zip_entry_bounded(&mut archive, "xl/sharedStrings.xml", MAX_XML_ENTRY_BYTES)?;
        parse_shared_strings(&xml)?
    } else {
        Vec::new()
    };

    let mut sheets = Vec::new();
    for (name, path) in list_worksheets(&mut archive)?
        .into_iter()
        .take(XLSX_MAX_SHEETS)
    {
        if !has_entry(&archive, &path) {
            tracing::warn!(sheet = %name, path = %path, "worksheet part missing, skipping");
            continue;
        }
        let xml = read_zip_entry_bounded(&mut archive, &path, MAX_XML_ENTRY_BYTES)?;
        let rows = parse_sheet_rows(&xml, &shared_strings)?;
        sheets.push(Sheet { name, rows });
    }
    Ok(sheets)
}

fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut strings = Vec::new();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    // Phonetic runs (<rPh>) repeat the text in another script.
    let mut in_phonetic = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"si" => current = Some(String::new()),
                b"rPh" => in_phonetic = true,
                b"t" => in_t = !in_phonetic,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if e.local_name().as_ref() == b"si" {
                    strings.push(String::new());
                }
            }
            Ok(Event::Text(te)) if in_t => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&te.unescape().map_err(ooxml)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"si" => strings.push(current.take().unwrap_or_default()),
                b"rPh" => in_phonetic = false,
                b"t" => in_t = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(strings)
}

/// `(display name, zip path)` for each worksheet, in workbook order.
///
/// Falls back to numbered `xl/worksheets/sheetN.xml` parts when the
/// workbook manifest is missing.
fn list_worksheets(archive: &mut Archive<'_>) -> Result<Vec<(String, String)>, ExtractError> {
    if has_entry(archive, "xl/workbook.xml") && has_entry(archive, "xl/_rels/workbook.xml.rels") {
        let workbook = read_zip_entry_bounded(archive, "xl/workbook.xml", MAX_XML_ENTRY_BYTES)?;
        let rels = read_zip_entry_bounded(
            archive,
            "xl/_rels/workbook.xml.rels",
            MAX_XML_ENTRY_BYTES,
        )?;
        let targets = parse_relationships(&rels)?;
        let declared = parse_workbook_sheets(&workbook)?;
        return Ok(declared
            .into_iter()
            .filter_map(|(name, rel_id)| {
                targets.get(&rel_id).map(|target| (name, resolve_target(target)))
            })
            .collect());
    }

    let mut paths: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(|s| s.to_string())
        .collect();
    paths.sort_by_key(|name| numeric_suffix(name, "xl/worksheets/sheet"));
    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(i, p)| (format!("Sheet{}", i + 1), p))
        .collect())
}

fn resolve_target(target: &str) -> String {
    match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None => format!("xl/{}", target),
    }
}

fn parse_workbook_sheets(xml: &[u8]) -> Result<Vec<(String, String)>, ExtractError> {
    let mut sheets = Vec::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(id)) = (attr(&e, b"name"), attr(&e, b"id")) {
                    sheets.push((name, id));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(sheets)
}

fn parse_relationships(xml: &[u8]) -> Result<HashMap<String, String>, ExtractError> {
    let mut rels = HashMap::new();
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) | Ok(Event::Empty(e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                if let (Some(id), Some(target)) = (attr(&e, b"Id"), attr(&e, b"Target")) {
                    rels.insert(id, target);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(rels)
}

struct PendingCell {
    col: usize,
    kind: Option<String>,
    raw: String,
}

/// Zero-based column index from an A1-style reference (`"AB12"` → 27).
/// `Ok(None)` when the reference carries no column letters.
fn column_index(reference: &str) -> Result<Option<usize>, ExtractError> {
    let letters = reference.bytes().take_while(|b| b.is_ascii_alphabetic());
    let mut n = 0usize;
    let mut any = false;
    for b in letters {
        any = true;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add((b.to_ascii_uppercase() - b'A' + 1) as usize))
            .filter(|&n| n <= MAX_COLUMNS)
            .ok_or_else(|| out_of_range("column", reference))?;
    }
    Ok(any.then(|| n - 1))
}

/// Zero-based row index from a 1-based `r` attribute.
fn row_index(value: &str) -> Result<usize, ExtractError> {
    match value.trim().parse::<usize>() {
        Ok(r) if (1..=MAX_ROWS).contains(&r) => Ok(r - 1),
        _ => Err(out_of_range("row", value)),
    }
}

fn out_of_range(what: &str, reference: &str) -> ExtractError {
    ExtractError::Ooxml(format!("{} out of range in cell reference {:?}", what, reference))
}

fn cell_display(cell: &PendingCell, shared: &[String]) -> String {
    match cell.kind.as_deref() {
        Some("s") => cell
            .raw
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i).cloned())
            .unwrap_or_default(),
        Some("b") => match cell.raw.trim() {
            "1" => "TRUE".to_string(),
            _ => "FALSE".to_string(),
        },
        _ => cell.raw.clone(),
    }
}

/// Rows of display strings plus the widest row seen so far.
#[derive(Default)]
struct Grid {
    rows: Vec<Vec<String>>,
    width: usize,
}

impl Grid {
    fn place(&mut self, row: usize, col: usize, value: String) -> Result<(), ExtractError> {
        if value.is_empty() {
            return Ok(());
        }
        if row >= MAX_ROWS || col >= MAX_COLUMNS {
            return Err(ExtractError::Ooxml(format!(
                "cell at row {} column {} is outside the worksheet",
                row + 1,
                col + 1
            )));
        }
        let height = self.rows.len().max(row + 1);
        let width = self.width.max(col + 1);
        if height * width > MAX_GRID_CELLS {
            return Err(ExtractError::Ooxml(format!(
                "sheet grid of {} x {} cells exceeds limit ({})",
                height, width, MAX_GRID_CELLS
            )));
        }
        if self.rows.len() <= row {
            self.rows.resize_with(row + 1, Vec::new);
        }
        let r = &mut self.rows[row];
        if r.len() <= col {
            r.resize(col + 1, String::new());
        }
        r[col] = value;
        self.width = width;
        Ok(())
    }
}

fn parse_sheet_rows(xml: &[u8], shared: &[String]) -> Result<Vec<Vec<String>>, ExtractError> {
    let mut grid = Grid::default();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut row_idx = 0usize;
    let mut next_row = 0usize;
    let mut next_col = 0usize;
    let mut cell: Option<PendingCell> = None;
    let mut in_value = false;
    let mut cell_count = 0usize;

    loop {
        if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
            break;
        }
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = match attr(&e, b"r") {
                        Some(r) => row_index(&r)?,
                        None => next_row,
                    };
                    next_row = row_idx + 1;
                    next_col = 0;
                }
                b"c" => {
                    let col = match attr(&e, b"r") {
                        Some(r) => column_index(&r)?.unwrap_or(next_col),
                        None => next_col,
                    };
                    next_col = col + 1;
                    cell = Some(PendingCell {
                        col,
                        kind: attr(&e, b"t"),
                        raw: String::new(),
                    });
                }
                b"v" | b"t" if cell.is_some() => in_value = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"row" => {
                    row_idx = match attr(&e, b"r") {
                        Some(r) => row_index(&r)?,
                        None => next_row,
                    };
                    next_row = row_idx + 1;
                }
                b"c" => {
                    next_col = match attr(&e, b"r") {
                        Some(r) => column_index(&r)?.unwrap_or(next_col),
                        None => next_col,
                    } + 1;
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_value => {
                if let Some(c) = cell.as_mut() {
                    c.raw.push_str(&te.unescape().map_err(ooxml)?);
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"v" | b"t" => in_value = false,
                b"c" => {
                    if let Some(c) = cell.take() {
                        let value = cell_display(&c, shared);
                        grid.place(row_idx, c.col, value)?;
                        cell_count += 1;
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ooxml(e)),
            _ => {}
        }
        buf.clear();
    }
    Ok(grid.rows)
}

// ============ XLS ============

/// Every worksheet of a legacy (BIFF) workbook, read with `calamine`.
///
/// The format is sniffed from the bytes, so an OOXML workbook saved under
/// an `.xls` name reads too.
pub fn extract_legacy_workbook(bytes: &[u8]) -> Result<Vec<Sheet>, ExtractError> {
    use calamine::Reader as _;

    let spreadsheet = |e: calamine::Error| ExtractError::Spreadsheet(e.to_string());
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(spreadsheet)?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().into_iter().take(XLSX_MAX_SHEETS) {
        let range = workbook.worksheet_range(&name).map_err(spreadsheet)?;
        let (top, left) = range.start().unwrap_or((0, 0));
        let mut grid = Grid::default();
        let mut cell_count = 0usize;
        'rows: for (i, row) in range.rows().enumerate() {
            for (j, value) in row.iter().enumerate() {
                if cell_count >= XLSX_MAX_CELLS_PER_SHEET {
                    break 'rows;
                }
                let value = value.to_string();
                if value.is_empty() {
                    continue;
                }
                grid.place(top as usize + i, left as usize + j, value)?;
                cell_count += 1;
            }
        }
        sheets.push(Sheet { name, rows: grid.rows });
    }
    Ok(sheets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
            for (name, body) in entries {
                zip.start_file(*name, zip::write::SimpleFileOptions::default())
                    .unwrap();
                zip.write_all(body.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf
    }

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_text(b"foo", "application/octet-stream").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn presentations_are_not_extracted() {
        let mime = "application/vnd.openxmlformats-officedocument.presentationml.presentation";
        let err = extract_text(b"PK", mime).unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn invalid_zip_returns_error_for_docx() {
        let err = extract_text(b"not a zip", MIME_DOCX).unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let doc = zip_with(&[(
            "word/document.xml",
            r#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
<w:p><w:r><w:t>A</w:t><w:tab/><w:t>B &amp; C</w:t></w:r></w:p>
</w:body></w:document>"#,
        )]);
        let text = extract_text(&doc, MIME_DOCX).unwrap();
        assert_eq!(text, "Hello world\nA\tB & C");
    }

    #[test]
    fn docx_without_document_part_fails() {
        let doc = zip_with(&[("word/other.xml", "<x/>")]);
        let err = extract_text(&doc, MIME_DOCX).unwrap_err();
        assert!(err.to_string().contains("word/document.xml not found"));
    }

    fn sample_workbook() -> Vec<u8> {
        zip_with(&[
            (
                "xl/workbook.xml",
                r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>
<sheet name="Sales" sheetId="1" r:id="rId2"/><sheet name="Notes" sheetId="2" r:id="rId1"/>
</sheets></workbook>"#,
            ),
            (
                "xl/_rels/workbook.xml.rels",
                r#"<Relationships><Relationship Id="rId1" Target="worksheets/sheet2.xml"/><Relationship Id="rId2" Target="/xl/worksheets/sheet1.xml"/></Relationships>"#,
            ),
            (
                "xl/sharedStrings.xml",
                r#"<sst><si><t>Region</t></si><si><r><t>Total</t></r><r><t xml:space="preserve"> (USD)</t></r></si><si><t>North, East</t></si></sst>"#,
            ),
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData>
<row r="1"><c r="A1" t="s"><v>0</v></c><c r="B1" t="s"><v>1</v></c></row>
<row r="2"><c r="A2" t="s"><v>2</v></c><c r="C2"><f>SUM(1,2)</f><v>3</v></c></row>
<row r="3"><c r="B3" t="b"><v>1</v></c></row>
</sheetData></worksheet>"#,
            ),
            (
                "xl/worksheets/sheet2.xml",
                r#"<worksheet><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>say "hi"</t></is></c></row></sheetData></worksheet>"#,
            ),
        ])
    }

    #[test]
    fn workbook_sheets_follow_manifest_order() {
        let sheets = extract_workbook(&sample_workbook()).unwrap();
        let names: Vec<_> = sheets.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Sales", "Notes"]);
        assert_eq!(
            sheets[0].to_csv(),
            "Region,Total (USD),\n\"North, East\",,3\n,TRUE,"
        );
        assert_eq!(sheets[1].to_csv(), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn workbook_without_manifest_uses_numbered_parts() {
        let book = zip_with(&[
            (
                "xl/worksheets/sheet1.xml",
                r#"<worksheet><sheetData><row><c><v>1</v></c><c><v>2</v></c></row></sheetData></worksheet>"#,
            ),
        ]);
        let sheets = extract_workbook(&book).unwrap();
        assert_eq!(sheets[0].name, "Sheet1");
        assert_eq!(sheets[0].to_csv(), "1,2");
    }

    #[test]
    fn column_letters_map_to_indices() {
        assert_eq!(column_index("A1").unwrap(), Some(0));
        assert_eq!(column_index("Z9").unwrap(), Some(25));
        assert_eq!(column_index("AB12").unwrap(), Some(27));
        assert_eq!(column_index("XFD1").unwrap(), Some(16_383));
        assert_eq!(column_index("12").unwrap(), None);
    }

    #[test]
    fn overlong_column_reference_is_rejected() {
        assert!(matches!(column_index("XFE1"), Err(ExtractError::Ooxml(_))));
        let long = format!("{}1", "A".repeat(40));
        assert!(matches!(column_index(&long), Err(ExtractError::Ooxml(_))));

        let xml = format!(
            r#"<worksheet><sheetData><row r="1"><c r="{}"><v>1</v></c></row></sheetData></worksheet>"#,
            long
        );
        let book = zip_with(&[("xl/worksheets/sheet1.xml", xml.as_str())]);
        let err = extract_workbook(&book).unwrap_err();
        assert!(err.to_string().contains("column out of range"), "{}", err);
    }

    #[test]
    fn rows_past_the_sheet_limit_are_rejected() {
        let book = zip_with(&[(
            "xl/worksheets/sheet1.xml",
            r#"<worksheet><sheetData><row r="1048577"><c><v>1</v></c></row></sheetData></worksheet>"#,
        )]);
        let err = extract_workbook(&book).unwrap_err();
        assert!(err.to_string().contains("row out of range"), "{}", err);
    }

    #[test]
    fn sparse_cells_cannot_blow_up_the_grid() {
        let book = zip_with(&[(
            "xl/worksheets/sheet1.xml",
            r#"<worksheet><sheetData><row r="1"><c r="A1"><v>1</v></c></row><row r="200000"><c r="ZZ200000"><v>2</v></c></row></sheetData></worksheet>"#,
        )]);
        let err = extract_workbook(&book).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"), "{}", err);

        let book = zip_with(&[(
            "xl/worksheets/sheet1.xml",
            r#"<worksheet><sheetData><row r="1"><c r="XFD1"><v>edge</v></c></row></sheetData></worksheet>"#,
        )]);
        let sheets = extract_workbook(&book).unwrap();
        assert_eq!(sheets[0].rows[0].len(), 16_384);
    }

    const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
    const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

    #[test]
    fn legacy_reader_sniffs_ooxml_bytes() {
        let workbook = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><workbook xmlns="{}" xmlns:r="{}"><sheets><sheet name="Budget" sheetId="1" r:id="rId1"/></sheets></workbook>"#,
            MAIN_NS, REL_NS
        );
        let rels = r#"<?xml version="1.0" encoding="UTF-8"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#;
        let sheet = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?><worksheet xmlns="{}"><sheetData><row r="1"><c r="A1" t="inlineStr"><is><t>Item</t></is></c><c r="B1" t="inlineStr"><is><t>Cost</t></is></c></row><row r="2"><c r="A2" t="inlineStr"><is><t>Rent, March</t></is></c><c r="B2"><v>1200</v></c></row></sheetData></worksheet>"#,
            MAIN_NS
        );
        let book = zip_with(&[
            ("xl/workbook.xml", workbook.as_str()),
            ("xl/_rels/workbook.xml.rels", rels),
            ("xl/worksheets/sheet1.xml", sheet.as_str()),
        ]);

        let sheets = extract_legacy_workbook(&book).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].name, "Budget");
        let csv = sheets[0].to_csv();
        assert!(csv.starts_with("Item,Cost\n"), "{}", csv);
        assert!(csv.contains("\"Rent, March\",1200"), "{}", csv);
    }

    #[test]
    fn legacy_reader_rejects_garbage() {
        let err = extract_legacy_workbook(b"\xd0\xcf\x11\xe0 not really").unwrap_err();
        assert!(matches!(err, ExtractError::Spreadsheet(_)));
    }
}
