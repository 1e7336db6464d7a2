//! Line highlighting rules: text fragment → fill color, first match wins.

use indexmap::IndexMap;
use tracing::debug;

use crate::model::HexColor;

/// Sheets that may hold the rules, in lookup order.
pub const RULE_SHEETS: [&str; 2] = ["Highlighting", "Highlights"];

/// Named colors accepted in the color column.
pub const COLOR_NAMES: [(&str, &str); 16] = [
    ("red", "FF0000"),
    ("green", "00FF00"),
    ("blue", "0000FF"),
    ("yellow", "FFFF00"),
    ("orange", "FFA500"),
    ("purple", "800080"),
    ("pink", "FFC0CB"),
    ("brown", "A52A2A"),
    ("gray", "808080"),
    ("grey", "808080"),
    ("light blue", "87CEEB"),
    ("light green", "90EE90"),
    ("light yellow", "FFFFE0"),
    ("light pink", "FFB6C1"),
    ("light gray", "D3D3D3"),
    ("light grey", "D3D3D3"),
];

const COMMENT_PREFIXES: [&str; 3] = ["===", "•", "#"];
const SECTION_HEADERS: [&str; 3] = ["standard colors:", "light colors:", "custom hex:"];

fn named_color(name: &str) -> Option<&'static str> {
    let name = name.trim().to_lowercase();
    COLOR_NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, hex)| *hex)
}

/// Color name (any case) or six hex digits with optional `#`.
pub fn resolve_color(spec: &str) -> Option<HexColor> {
    match named_color(spec) {
        Some(hex) => HexColor::parse(hex),
        None => HexColor::parse(spec),
    }
}

/// Reference rows in the rules sheet that are not rules.
fn is_scaffolding(text: &str) -> bool {
    let lower = text.to_lowercase();
    COMMENT_PREFIXES.iter().any(|p| text.starts_with(p))
        || SECTION_HEADERS.contains(&lower.as_str())
        || named_color(&lower).is_some()
}

#[derive(Debug, Clone, Default)]
pub struct HighlightRules {
    rules: IndexMap<String, HexColor>,
}

impl HighlightRules {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(match text, color spec)` rows that follow the header row.
    pub fn from_rows<I, A, B>(rows: I) -> Self
    where
        I: IntoIterator<Item = (A, B)>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        let mut out = Self::new();
        for (text, color) in rows {
            let text = text.as_ref().trim();
            if text.is_empty() || is_scaffolding(text) {
                continue;
            }
            match resolve_color(color.as_ref()) {
                Some(hex) => out.insert(text, hex),
                None => debug!(text, color = color.as_ref(), "skipping rule with unknown color"),
            }
        }
        out
    }

    /// A repeated key keeps its position and takes the new color.
    pub fn insert(&mut self, text: &str, color: HexColor) {
        self.rules.insert(text.to_lowercase(), color);
    }

    /// Color of the first rule contained in `description`, ignoring case.
    pub fn match_color(&self, description: &str) -> Option<&HexColor> {
        let description = description.to_lowercase();
        self.rules
            .iter()
            .find(|(text, _)| description.contains(text.as_str()))
            .map(|(_, color)| color)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HexColor)> {
        self.rules.iter().map(|(t, c)| (t.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
