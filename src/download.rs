//! Renders a single assistant response as a downloadable document.
//!
//! | Format | Output | Built with |
//! |--------|--------|------------|
//! | `pdf` | A4 pages, Helvetica, wrapped body | `lopdf` |
//! | `docx` | Word-compatible HTML saved as `.doc` | string templates |
//! | `xlsx` | one-sheet workbook (`Response`) | `zip` |
//! | `txt` | markdown stripped | `regex` |
//! | `md` | original markdown under a heading | none |
//!
//! Every format carries a "Lumo AI Response" title and a
//! "Generated on:" timestamp.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::str::FromStr;

pub const DEFAULT_FILENAME: &str = "lumo-ai-response";
const TITLE: &str = "Lumo AI Response";
/// Upper bound on suggested formats.
const MAX_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadFormat {
    Pdf,
    Docx,
    Xlsx,
    Txt,
    Md,
}

impl DownloadFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadFormat::Pdf => "pdf",
            DownloadFormat::Docx => "docx",
            DownloadFormat::Xlsx => "xlsx",
            DownloadFormat::Txt => "txt",
            DownloadFormat::Md => "md",
        }
    }
}

impl FromStr for DownloadFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(DownloadFormat::Pdf),
            "docx" | "doc" | "word" => Ok(DownloadFormat::Docx),
            "xlsx" | "excel" => Ok(DownloadFormat::Xlsx),
            "txt" | "text" => Ok(DownloadFormat::Txt),
            "md" | "markdown" => Ok(DownloadFormat::Md),
            other => bail!(
                "invalid download format: {} (expected pdf, docx, xlsx, txt, or md)",
                other
            ),
        }
    }
}

/// A rendered file.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub mime: &'static str,
    pub extension: &'static str,
}

impl Rendered {
    pub fn filename(&self, stem: &str) -> String {
        format!("{}.{}", stem, self.extension)
    }
}

pub fn render(content: &str, format: DownloadFormat, now: DateTime<Utc>) -> Result<Rendered> {
    let generated = format!("Generated on: {}", now.format("%Y-%m-%d %H:%M:%S UTC"));
    Ok(match format {
        DownloadFormat::Txt => Rendered {
            bytes: format!("{}\n{}\n\n{}", TITLE, generated, clean_for_text(content)).into_bytes(),
            mime: "text/plain; charset=utf-8",
            extension: "txt",
        },
        DownloadFormat::Md => Rendered {
            bytes: format!("# {}\n\n*{}*\n\n{}", TITLE, generated, content).into_bytes(),
            mime: "text/markdown; charset=utf-8",
            extension: "md",
        },
        DownloadFormat::Docx => Rendered {
            bytes: render_word_html(content, &generated).into_bytes(),
            mime: "application/msword",
            extension: "doc",
        },
        DownloadFormat::Xlsx => Rendered {
            bytes: render_xlsx(content, &generated)?,
            mime: "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            extension: "xlsx",
        },
        DownloadFormat::Pdf => Rendered {
            bytes: render_pdf(content, &generated)?,
            mime: "application/pdf",
            extension: "pdf",
        },
    })
}

// ============ Markdown cleanup ============

static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*(.*?)\*\*").expect("valid regex"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*(.*?)\*").expect("valid regex"));
static CODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"`(.*?)`").expect("valid regex"));
static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"#{1,6}\s").expect("valid regex"));
static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("valid regex"));

/// Strips inline markdown, keeping the text.
pub fn clean_for_text(content: &str) -> String {
    let s = BOLD.replace_all(content, "$1");
    let s = ITALIC.replace_all(&s, "$1");
    let s = CODE.replace_all(&s, "$1");
    let s = HEADING.replace_all(&s, "");
    let s = LINK.replace_all(&s, "$1");
    s.trim().to_string()
}

pub(crate) fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Escapes the content, then maps bold, italic and code spans to HTML.
pub fn clean_for_word(content: &str) -> String {
    let escaped = escape_html(content);
    let s = BOLD.replace_all(&escaped, "<strong>$1</strong>");
    let s = ITALIC.replace_all(&s, "<em>$1</em>");
    let s = CODE.replace_all(&s, "<code>$1</code>");
    s.replace('\n', "<br>").trim().to_string()
}

fn render_word_html(content: &str, generated: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <title>{title}</title>
  <style>
    body {{ font-family: Arial, sans-serif; line-height: 1.6; margin: 40px; }}
    h1 {{ color: #333; border-bottom: 2px solid #333; }}
    .timestamp {{ color: #666; font-size: 12px; margin-bottom: 20px; }}
    .content {{ white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>{title}</h1>
  <div class="timestamp">{generated}</div>
  <div class="content">{body}</div>
</body>
</html>
"#,
        title = TITLE,
        generated = generated,
        body = clean_for_word(content)
    )
}

// ============ Tables ============

/// Rows of pipe- or tab-separated tables found in the content.
pub fn extract_table_data(content: &str) -> Vec<Vec<String>> {
    let mut table = Vec::new();
    for line in content.lines() {
        if line.contains('|') && line.split('|').count() > 2 {
            let row: Vec<String> = line
                .split('|')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if !row.is_empty() {
                table.push(row);
            }
        } else if line.contains('\t') {
            let row: Vec<String> = line.split('\t').map(|c| c.trim().to_string()).collect();
            if row.len() > 1 {
                table.push(row);
            }
        }
    }
    table
}

/// Suggested download formats for the content, best first.
pub fn detect_content_type(content: &str) -> Vec<DownloadFormat> {
    let mut suggestions = Vec::new();
    if !extract_table_data(content).is_empty() {
        suggestions.push(DownloadFormat::Xlsx);
    }
    if content.chars().count() > 100 {
        suggestions.push(DownloadFormat::Pdf);
    }
    suggestions.extend([DownloadFormat::Docx, DownloadFormat::Txt, DownloadFormat::Md]);

    let mut unique: Vec<DownloadFormat> = Vec::new();
    for f in suggestions {
        if !unique.contains(&f) {
            unique.push(f);
        }
    }
    unique.truncate(MAX_SUGGESTIONS);
    unique
}

// ============ XLSX ============

fn escape_xml(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r') || !c.is_control())
        .collect::<String>()
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn column_name(mut index: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

fn sheet_xml(rows: &[Vec<String>]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    for (r, row) in rows.iter().enumerate() {
        xml.push_str(&format!(r#"<row r="{}">"#, r + 1));
        for (c, value) in row.iter().enumerate() {
            if value.is_empty() {
                continue;
            }
            xml.push_str(&format!(
                r#"<c r="{}{}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_name(c),
                r + 1,
                escape_xml(value)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

fn render_xlsx(content: &str, generated: &str) -> Result<Vec<u8>> {
    let table = extract_table_data(content);
    let rows = if table.is_empty() {
        let mut rows = vec![
            vec![TITLE.to_string()],
            vec![generated.to_string()],
            vec![String::new()],
        ];
        rows.extend(content.split('\n').map(|l| vec![l.to_string()]));
        rows
    } else {
        table
    };

    let parts: [(&str, String); 5] = [
        (
            "[Content_Types].xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/><Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/></Types>"#
                .to_string(),
        ),
        (
            "_rels/.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#
                .to_string(),
        ),
        (
            "xl/workbook.xml",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets><sheet name="Response" sheetId="1" r:id="rId1"/></sheets></workbook>"#
                .to_string(),
        ),
        (
            "xl/_rels/workbook.xml.rels",
            r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/></Relationships>"#
                .to_string(),
        ),
        ("xl/worksheets/sheet1.xml", sheet_xml(&rows)),
    ];

    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(&mut buf));
        for (name, body) in &parts {
            zip.start_file(*name, zip::write::SimpleFileOptions::default())
                .with_context(|| format!("failed to add {} to workbook", name))?;
            zip.write_all(body.as_bytes())?;
        }
        zip.finish()?;
    }
    Ok(buf)
}

// ============ PDF ============

const PAGE_WIDTH_PT: f64 = 595.0;
const PAGE_HEIGHT_PT: f64 = 842.0;
const PAGE_HEIGHT_MM: f64 = 297.0;
const MARGIN_MM: f64 = 20.0;
const LINE_STEP_MM: f64 = 7.0;
/// Characters per body line at 12pt Helvetica across a 170mm column.
const WRAP_CHARS: usize = 80;

fn mm_to_pt(mm: f64) -> f64 {
    mm * 72.0 / 25.4
}

/// Greedy word wrap. Words longer than a line are split.
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let mut line = String::new();
        let mut line_len = 0usize;
        for word in paragraph.split_whitespace() {
            let mut word: Vec<char> = word.chars().collect();
            while word.len() > width {
                if line_len > 0 {
                    lines.push(std::mem::take(&mut line));
                    line_len = 0;
                }
                let rest = word.split_off(width);
                lines.push(word.into_iter().collect());
                word = rest;
            }
            let needed = if line_len == 0 { word.len() } else { line_len + 1 + word.len() };
            if needed > width && line_len > 0 {
                lines.push(std::mem::take(&mut line));
                line_len = 0;
            }
            if line_len > 0 {
                line.push(' ');
                line_len += 1;
            }
            line_len += word.len();
            line.extend(word);
        }
        lines.push(line);
    }
    lines
}

/// Encodes text for a WinAnsi Type1 font; characters outside Latin-1 become `?`.
fn pdf_string(text: &str) -> Object {
    let bytes: Vec<u8> = text
        .chars()
        .map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' })
        .collect();
    Object::string_literal(bytes)
}

fn text_op(font: &str, size: i64, x_mm: f64, y_mm: f64, text: &str) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new(
            "Tf",
            vec![Object::Name(font.as_bytes().to_vec()), Object::Integer(size)],
        ),
        Operation::new(
            "Td",
            vec![
                Object::Real(mm_to_pt(x_mm) as f32),
                Object::Real((PAGE_HEIGHT_PT - mm_to_pt(y_mm)) as f32),
            ],
        ),
        Operation::new("Tj", vec![pdf_string(text)]),
        Operation::new("ET", vec![]),
    ]
}

fn render_pdf(content: &str, generated: &str) -> Result<Vec<u8>> {
    // Lay out pages first: each page is a list of text operations.
    let mut pages: Vec<Vec<Operation>> = Vec::new();
    let mut ops = Vec::new();
    ops.extend(text_op("F2", 16, MARGIN_MM, 20.0, TITLE));
    ops.extend(text_op("F1", 10, MARGIN_MM, 30.0, generated));

    let mut y = 45.0;
    for line in wrap_text(&clean_for_text(content), WRAP_CHARS) {
        if y > PAGE_HEIGHT_MM - MARGIN_MM {
            pages.push(std::mem::take(&mut ops));
            y = MARGIN_MM;
        }
        if !line.is_empty() {
            ops.extend(text_op("F1", 12, MARGIN_MM, y, &line));
        }
        y += LINE_STEP_MM;
    }
    pages.push(ops);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let regular = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            "F1" => regular,
            "F2" => bold,
        },
    });

    let mut kids = Vec::with_capacity(pages.len());
    for operations in pages {
        let stream = Content { operations }
            .encode()
            .context("failed to encode PDF page")?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, stream));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(PAGE_WIDTH_PT as f32),
                Object::Real(PAGE_HEIGHT_PT as f32),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut out = Vec::new();
    doc.save_to(&mut out).context("failed to write PDF")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn text_strips_markdown() {
        let cleaned = clean_for_text("## Title\n**bold** and *it* with `code` and [link](http://x)");
        assert_eq!(cleaned, "Title\nbold and it with code and link");
    }

    #[test]
    fn txt_and_md_headers() {
        let txt = render("**hi**", DownloadFormat::Txt, now()).unwrap();
        assert_eq!(
            String::from_utf8(txt.bytes).unwrap(),
            "Lumo AI Response\nGenerated on: 2024-01-02 03:04:05 UTC\n\nhi"
        );
        let md = render("**hi**", DownloadFormat::Md, now()).unwrap();
        assert_eq!(
            String::from_utf8(md.bytes.clone()).unwrap(),
            "# Lumo AI Response\n\n*Generated on: 2024-01-02 03:04:05 UTC*\n\n**hi**"
        );
        assert_eq!(md.filename(DEFAULT_FILENAME), "lumo-ai-response.md");
    }

    #[test]
    fn word_html_escapes_then_formats() {
        assert_eq!(
            clean_for_word("**a<b>**\n`x & y`"),
            "<strong>a&lt;b&gt;</strong><br><code>x &amp; y</code>"
        );
        let doc = render("hello", DownloadFormat::Docx, now()).unwrap();
        assert_eq!(doc.extension, "doc");
        let html = String::from_utf8(doc.bytes).unwrap();
        assert!(html.contains("<h1>Lumo AI Response</h1>"));
        assert!(html.contains(r#"<div class="content">hello</div>"#));
    }

    #[test]
    fn table_rows_from_pipes_and_tabs() {
        let content = "Intro\n| Name | Age |\n|------|-----|\n| Ann | 31 |\nx\ty\nsolo\t";
        let table = extract_table_data(content);
        assert_eq!(table[0], ["Name", "Age"]);
        assert_eq!(table[1], ["------", "-----"]);
        assert_eq!(table[2], ["Ann", "31"]);
        assert_eq!(table[3], ["x", "y"]);
        assert_eq!(table[4], ["solo", ""]);
    }

    #[test]
    fn suggestions_prioritise_tables_and_length() {
        assert_eq!(
            detect_content_type("short"),
            [DownloadFormat::Docx, DownloadFormat::Txt, DownloadFormat::Md]
        );
        let long_table = format!("| a | b |\n{}", "z".repeat(120));
        assert_eq!(
            detect_content_type(&long_table),
            [
                DownloadFormat::Xlsx,
                DownloadFormat::Pdf,
                DownloadFormat::Docx,
                DownloadFormat::Txt,
                DownloadFormat::Md
            ]
        );
    }

    #[test]
    fn xlsx_readable_by_extractor() {
        let out = render("| City | Pop |\n| Oslo | 700k |", DownloadFormat::Xlsx, now()).unwrap();
        let sheets = crate::extract::extract_workbook(&out.bytes).unwrap();
        assert_eq!(sheets[0].name, "Response");
        assert_eq!(sheets[0].to_csv(), "City,Pop\nOslo,700k");

        let plain = render("line one\nline & two", DownloadFormat::Xlsx, now()).unwrap();
        let sheets = crate::extract::extract_workbook(&plain.bytes).unwrap();
        let csv = sheets[0].to_csv();
        assert!(csv.starts_with("Lumo AI Response\nGenerated on: 2024-01-02 03:04:05 UTC\n\nline one"));
        assert!(csv.ends_with("line & two"));
    }

    #[test]
    fn pdf_has_header_and_pages() {
        let long: String = (0..120).map(|i| format!("Line {}\n", i)).collect();
        let out = render(&long, DownloadFormat::Pdf, now()).unwrap();
        assert!(out.bytes.starts_with(b"%PDF-1.5"));
        let doc = Document::load_mem(&out.bytes).unwrap();
        assert!(doc.get_pages().len() >= 3);
    }

    #[test]
    fn wrapping_respects_width() {
        let lines = wrap_text("aaa bbb ccc\n\ndddddddddd", 7);
        assert_eq!(lines, ["aaa bbb", "ccc", "", "ddddddd", "ddd"]);
    }

    #[test]
    fn column_names() {
        assert_eq!(column_name(0), "A");
        assert_eq!(column_name(25), "Z");
        assert_eq!(column_name(26), "AA");
        assert_eq!(column_name(27), "AB");
    }

    #[test]
    fn format_parsing() {
        assert_eq!("DOC".parse::<DownloadFormat>().unwrap(), DownloadFormat::Docx);
        assert!("png".parse::<DownloadFormat>().is_err());
    }
}
