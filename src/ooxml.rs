//! Raw access to the XLSX package behind a workbook.
//!
//! calamine hands out cell values only; pictures, styles and sheet geometry
//! are read straight from the zip parts. A sheet is found through
//! `xl/workbook.xml` (sheet name → rel id) and `xl/_rels/workbook.xml.rels`
//! (rel id → part). Element and attribute names are matched on their local
//! name so prefixed and default-namespace documents read the same.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use quick_xml::Reader as XmlReader;
use quick_xml::events::{BytesStart, Event};
use zip::ZipArchive;

pub type XmlSource<'a> = XmlReader<&'a [u8]>;

pub fn xml_reader(xml: &str) -> XmlSource<'_> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);
    reader
}

/// Unescaped value of the attribute with local name `name`.
pub fn attr(e: &BytesStart<'_>, reader: &XmlSource<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .filter_map(std::result::Result::ok)
        .find(|a| a.key.local_name().as_ref() == name)
        .and_then(|a| a.decode_and_unescape_value(reader).ok())
        .map(|v| v.into_owned())
}

/// Resolve a relationship target against the directory of the part that owns it.
pub fn resolve_part(base_dir: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut parts: Vec<&str> = base_dir.split('/').filter(|p| !p.is_empty()).collect();
    for segment in target.split('/') {
        match segment {
            ".." => {
                parts.pop();
            }
            "." | "" => {}
            s => parts.push(s),
        }
    }
    parts.join("/")
}

pub fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

pub fn part_dir(part: &str) -> &str {
    part.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// A relationship target and its type URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    pub target: String,
    pub kind: String,
}

/// rel id → relationship
pub fn parse_relationships(xml: &str) -> HashMap<String, Relationship> {
    let mut relationships = HashMap::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.local_name().as_ref() == b"Relationship" => {
                let id = attr(&e, &reader, b"Id");
                let target = attr(&e, &reader, b"Target");
                if let (Some(id), Some(target)) = (id, target) {
                    let kind = attr(&e, &reader, b"Type").unwrap_or_default();
                    relationships.insert(id, Relationship { target, kind });
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    relationships
}

/// Rel id of the sheet called `sheet` in `xl/workbook.xml`.
fn sheet_rel_id(xml: &str, sheet: &str) -> Option<String> {
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(e) | Event::Start(e)) if e.local_name().as_ref() == b"sheet" => {
                if attr(&e, &reader, b"name").as_deref() == Some(sheet) {
                    return attr(&e, &reader, b"id");
                }
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

pub struct Package {
    archive: ZipArchive<File>,
}

impl Package {
    pub fn open(path: &Path) -> Option<Self> {
        let file = File::open(path).ok()?;
        ZipArchive::new(file).ok().map(|archive| Self { archive })
    }

    pub fn read_text(&mut self, name: &str) -> Option<String> {
        let mut entry = self.archive.by_name(name).ok()?;
        let mut text = String::new();
        entry.read_to_string(&mut text).ok()?;
        Some(text)
    }

    pub fn read_bytes(&mut self, name: &str) -> Option<Vec<u8>> {
        let mut entry = self.archive.by_name(name).ok()?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).ok()?;
        Some(bytes)
    }

    /// Part name of the worksheet called `sheet`, e.g. `xl/worksheets/sheet1.xml`.
    pub fn sheet_part(&mut self, sheet: &str) -> Option<String> {
        let rel_id = sheet_rel_id(&self.read_text("xl/workbook.xml")?, sheet)?;
        let rels = parse_relationships(&self.read_text("xl/_rels/workbook.xml.rels")?);
        let rel = rels.get(&rel_id)?;
        Some(resolve_part("xl", &rel.target))
    }

    /// First relationship of `part` whose type ends with `/{kind}`, resolved.
    pub fn related_part(&mut self, part: &str, kind: &str) -> Option<String> {
        let rels = parse_relationships(&self.read_text(&rels_path(part))?);
        let suffix = format!("/{kind}");
        rels.values()
            .find(|rel| rel.kind.ends_with(&suffix))
            .map(|rel| resolve_part(part_dir(part), &rel.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_and_absolute_targets() {
        assert_eq!(resolve_part("xl", "worksheets/sheet1.xml"), "xl/worksheets/sheet1.xml");
        assert_eq!(resolve_part("xl/worksheets", "../drawings/drawing1.xml"), "xl/drawings/drawing1.xml");
        assert_eq!(resolve_part("xl", "/xl/worksheets/sheet2.xml"), "xl/worksheets/sheet2.xml");
        assert_eq!(rels_path("xl/drawings/drawing1.xml"), "xl/drawings/_rels/drawing1.xml.rels");
        assert_eq!(part_dir("xl/workbook.xml"), "xl");
    }

    #[test]
    fn parses_relationship_attributes_in_any_order() {
        let xml = r#"<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
            <Relationship Target="../media/image1.png" Id="rId1" Type="http://x/relationships/image"/>
            <Relationship Id="rId2" Type="http://x/relationships/drawing" Target="../drawings/drawing1.xml"/>
            </Relationships>"#;
        let rels = parse_relationships(xml);
        assert_eq!(rels["rId1"].target, "../media/image1.png");
        assert!(rels["rId2"].kind.ends_with("/drawing"));
    }

    #[test]
    fn sheet_names_are_unescaped_before_matching() {
        let xml = r#"<workbook xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>
            <sheet name="Summary" sheetId="1" r:id="rId1"/>
            <sheet name="Bob&#39;s &amp; Co" sheetId="2" r:id="rId2"/>
            </sheets></workbook>"#;
        assert_eq!(sheet_rel_id(xml, "Bob's & Co").as_deref(), Some("rId2"));
        assert_eq!(sheet_rel_id(xml, "Summary").as_deref(), Some("rId1"));
        assert_eq!(sheet_rel_id(xml, "Missing"), None);
    }
}
