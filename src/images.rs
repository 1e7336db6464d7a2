//! Template images: pulled out of the XLSX package once, reused per invoice.
//!
//! Pictures hang off the sheet's drawing part: the sheet rels point at the
//! drawing, whose anchors name a cell and a rel id that resolves to
//! `xl/media/*`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use quick_xml::events::Event;
use tracing::{debug, info, warn};

use crate::grid::CellRef;
use crate::model::PlacedImage;
use crate::ooxml::{Package, attr, parse_relationships, part_dir, rels_path, resolve_part, xml_reader};
use crate::settings::Layout;
use crate::template::Template;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FromField {
    Col,
    Row,
}

/// (rel id, top-left anchor) for every picture in a drawing part.
fn parse_drawing(xml: &str) -> Vec<(String, CellRef)> {
    let mut pictures = Vec::new();
    let mut reader = xml_reader(xml);
    let mut buf = Vec::new();

    let mut in_anchor = false;
    let mut in_from = false;
    let mut field = None;
    let mut embed: Option<String> = None;
    let mut col: Option<u16> = None;
    let mut row: Option<u32> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"twoCellAnchor" | b"oneCellAnchor" => {
                    in_anchor = true;
                    (embed, col, row) = (None, None, None);
                }
                b"from" if in_anchor => in_from = true,
                b"col" if in_from => field = Some(FromField::Col),
                b"row" if in_from => field = Some(FromField::Row),
                b"blip" if in_anchor => embed = attr(&e, &reader, b"embed"),
                _ => {}
            },
            Ok(Event::Empty(e)) if in_anchor && e.local_name().as_ref() == b"blip" => {
                embed = attr(&e, &reader, b"embed");
            }
            Ok(Event::Text(t)) => {
                if let (Some(which), Ok(text)) = (field, t.unescape()) {
                    match which {
                        FromField::Col => col = text.trim().parse().ok(),
                        FromField::Row => row = text.trim().parse().ok(),
                    }
                }
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"col" | b"row" => field = None,
                b"from" => in_from = false,
                b"twoCellAnchor" | b"oneCellAnchor" => {
                    if let (Some(rel_id), Some(col), Some(row)) = (embed.take(), col, row) {
                        pictures.push((rel_id, CellRef::new(row, col)));
                    }
                    in_anchor = false;
                }
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    pictures
}

/// An image embedded in the template sheet.
#[derive(Debug, Clone)]
pub struct TemplateImage {
    pub name: String,
    pub data: Vec<u8>,
    pub anchor: CellRef,
}

/// Pictures anchored on `sheet` inside the XLSX at `path`.
pub fn extract_sheet_images(path: &Path, sheet: &str) -> Vec<TemplateImage> {
    let Some(mut package) = Package::open(path) else {
        debug!(path = %path.display(), "template is not a zip package, no images");
        return Vec::new();
    };
    let Some(sheet_part) = package.sheet_part(sheet) else {
        return Vec::new();
    };
    let Some(drawing) = package.related_part(&sheet_part, "drawing") else {
        return Vec::new();
    };
    let Some(drawing_xml) = package.read_text(&drawing) else {
        return Vec::new();
    };
    let rels = package
        .read_text(&rels_path(&drawing))
        .map(|xml| parse_relationships(&xml))
        .unwrap_or_default();

    let mut images = Vec::new();
    for (rel_id, anchor) in parse_drawing(&drawing_xml) {
        let Some(rel) = rels.get(&rel_id) else {
            warn!(rel_id = %rel_id, "picture without relationship in template drawing");
            continue;
        };
        let media = resolve_part(part_dir(&drawing), &rel.target);
        match package.read_bytes(&media) {
            Some(data) => images.push(TemplateImage {
                name: media.rsplit('/').next().unwrap_or(&media).to_string(),
                data,
                anchor,
            }),
            None => warn!(media = %media, "could not read template image"),
        }
    }
    images
}

/// Image bytes per template, read on first use and shared afterwards.
#[derive(Debug, Default)]
pub struct ImageCache {
    entries: HashMap<PathBuf, Rc<[PlacedImage]>>,
}

impl ImageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Template pictures at their own anchors, or the fallback logo shifted
    /// right of the default anchor when the template has none.
    pub fn images_for(&mut self, template: &Template, layout: &Layout, fallback_logo: &Path) -> Rc<[PlacedImage]> {
        let key = template.identity();
        if let Some(hit) = self.entries.get(&key) {
            return Rc::clone(hit);
        }

        let place = |name: String, data: Vec<u8>, anchor: CellRef| PlacedImage {
            name,
            data: Rc::from(data),
            anchor,
            width: layout.logo_width,
            height: layout.logo_height,
        };

        let mut placed: Vec<PlacedImage> = extract_sheet_images(&template.path, &template.layout_sheet)
            .into_iter()
            .map(|img| place(img.name, img.data, img.anchor))
            .collect();

        if placed.is_empty() {
            if let Some(image) = read_fallback(fallback_logo) {
                let anchor = layout.logo_anchor.shifted_right(layout.fallback_logo_offset);
                let name = fallback_logo
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "logo.png".to_string());
                placed.push(place(name, image, anchor));
            }
        }

        info!(template = %key.display(), images = placed.len(), "cached template images");
        let placed: Rc<[PlacedImage]> = placed.into();
        self.entries.insert(key, Rc::clone(&placed));
        placed
    }
}

fn read_fallback(path: &Path) -> Option<Vec<u8>> {
    if !path.exists() {
        return None;
    }
    match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read fallback logo");
            None
        }
    }
}

/// Extension by magic number, for writers that need a file name.
pub fn sniff_extension(data: &[u8]) -> &'static str {
    match data {
        [0x89, b'P', b'N', b'G', ..] => "png",
        [0xFF, 0xD8, 0xFF, ..] => "jpg",
        [b'G', b'I', b'F', ..] => "gif",
        [b'B', b'M', ..] => "bmp",
        _ => "png",
    }
}

#[cfg(test)]
pub(crate) fn tiny_png() -> Vec<u8> {
    // 1×1 transparent PNG
    vec![
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
        0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
        0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
        0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
        0x42, 0x60, 0x82,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Grid;

    #[test]
    fn parses_drawing_anchors() {
        let xml = r#"<xdr:wsDr xmlns:xdr="x" xmlns:a="a" xmlns:r="r"><xdr:twoCellAnchor editAs="oneCell">
            <xdr:from><xdr:col>5</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>0</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:from>
            <xdr:to><xdr:col>8</xdr:col><xdr:colOff>0</xdr:colOff><xdr:row>4</xdr:row><xdr:rowOff>0</xdr:rowOff></xdr:to>
            <xdr:pic><xdr:blipFill><a:blip r:embed="rId1"/></xdr:blipFill></xdr:pic>
            </xdr:twoCellAnchor></xdr:wsDr>"#;
        assert_eq!(parse_drawing(xml), [("rId1".to_string(), CellRef::new(0, 5))]);
    }

    #[test]
    fn parses_default_namespace_drawings() {
        let xml = r#"<wsDr xmlns="http://schemas.openxmlformats.org/drawingml/2006/spreadsheetDrawing"
            xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main"
            xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
            <oneCellAnchor><from><col>2</col><colOff>0</colOff><row>3</row><rowOff>0</rowOff></from>
            <ext cx="1" cy="1"/><pic><blipFill><a:blip r:embed="rId7"></a:blip></blipFill></pic><clientData/></oneCellAnchor>
            <twoCellAnchor><from><col>1</col><row>1</row></from><sp><txBody/></sp></twoCellAnchor>
            </wsDr>"#;
        assert_eq!(parse_drawing(xml), [("rId7".to_string(), CellRef::new(3, 2))]);
    }

    #[test]
    fn extracts_images_written_by_xlsxwriter() {
        use rust_xlsxwriter::{Image, Workbook};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.xlsx");
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Bob's Invoice").unwrap();
        let image = Image::new_from_buffer(&tiny_png()).unwrap();
        sheet.insert_image(0, 6, &image).unwrap();
        workbook.save(&path).unwrap();

        let images = extract_sheet_images(&path, "Bob's Invoice");
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].anchor, CellRef::new(0, 6));
        assert_eq!(images[0].data, tiny_png());
        assert!(extract_sheet_images(&path, "Missing").is_empty());
    }

    #[test]
    fn cache_reads_fallback_once_and_shifts_it_right() {
        let dir = tempfile::tempdir().unwrap();
        let logo = dir.path().join("logo.png");
        fs::write(&logo, tiny_png()).unwrap();

        let template = Template {
            path: dir.path().join("not-a-workbook.xlsx"),
            layout_sheet: "Invoice".to_string(),
            sheet_names: vec!["Invoice".to_string()],
            invoice: Grid::new(),
            rules: None,
        };
        let layout = Layout::default();
        let mut cache = ImageCache::new();

        let first = cache.images_for(&template, &layout, &logo);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].anchor.to_string(), "J1");
        assert_eq!((first[0].width, first[0].height), (400, 200));

        fs::remove_file(&logo).unwrap();
        let second = cache.images_for(&template, &layout, &logo);
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn no_template_image_and_no_fallback_means_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template {
            path: dir.path().join("missing.xlsx"),
            layout_sheet: "Invoice".to_string(),
            sheet_names: Vec::new(),
            invoice: Grid::new(),
            rules: None,
        };
        let mut cache = ImageCache::new();
        let images = cache.images_for(&template, &Layout::default(), &dir.path().join("logo.png"));
        assert!(images.is_empty());
        assert_eq!(sniff_extension(&tiny_png()), "png");
    }
}
