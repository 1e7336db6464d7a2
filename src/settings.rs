use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{InvoiceError, Result};
use crate::grid::{CellRef, Column, Region};
use crate::orders::SortKey;

const LOCAL_CONFIG: &str = "invoices.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// One worksheet per order
    #[default]
    Xlsx,
    /// One page (or more) per order, compiled with Typst
    Pdf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub orders: PathBuf,
    pub template: PathBuf,
    pub output: PathBuf,
    /// Used when the template embeds no image.
    pub logo: PathBuf,
    pub format: OutputFormat,
    pub sort: SortKey,
    pub layout: Layout,
    pub footer: Footer,
    pub converters: Converters,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            orders: PathBuf::from("orders.csv"),
            template: PathBuf::from("config.xlsx"),
            output: PathBuf::from("generated_invoices.xlsx"),
            logo: PathBuf::from("logo.png"),
            format: OutputFormat::Xlsx,
            sort: SortKey::None,
            layout: Layout::default(),
            footer: Footer::default(),
            converters: Converters::default(),
        }
    }
}

/// Where things live on the template's layout sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layout {
    pub sheet: String,
    pub order_label: CellRef,
    pub order_date: CellRef,
    pub billing_name: CellRef,
    pub street: CellRef,
    pub city_line: CellRef,
    /// 1-based, as shown in a spreadsheet.
    pub first_item_row: u32,
    pub quantity_column: Column,
    pub description_column: Column,
    pub unit_price_column: Column,
    pub line_total_column: Column,
    pub quantity_width: f64,
    pub description_width: f64,
    pub unit_price_width: f64,
    pub line_total_width: f64,
    pub row_height: f64,
    pub totals_region: Region,
    pub print_start_column: Column,
    pub min_print_rows: u32,
    pub logo_anchor: CellRef,
    pub logo_width: u32,
    pub logo_height: u32,
    pub fallback_logo_offset: u16,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            sheet: "Invoice".to_string(),
            order_label: CellRef::new(1, 1),
            order_date: CellRef::new(4, 6),
            billing_name: CellRef::new(2, 1),
            street: CellRef::new(3, 1),
            city_line: CellRef::new(4, 1),
            first_item_row: 8,
            quantity_column: Column(1),
            description_column: Column(2),
            unit_price_column: Column(5),
            line_total_column: Column(6),
            quantity_width: 8.0,
            description_width: 52.0,
            unit_price_width: 12.0,
            line_total_width: 14.0,
            row_height: 22.0,
            totals_region: Region::new(CellRef::new(29, 7), CellRef::new(54, 11)),
            print_start_column: Column(1),
            min_print_rows: 40,
            logo_anchor: CellRef::new(0, 5),
            logo_width: 400,
            logo_height: 200,
            fallback_logo_offset: 4,
        }
    }
}

impl Layout {
    pub fn column_widths(&self) -> Vec<(u16, f64)> {
        vec![
            (self.quantity_column.0, self.quantity_width),
            (self.description_column.0, self.description_width),
            (self.unit_price_column.0, self.unit_price_width),
            (self.line_total_column.0, self.line_total_width),
        ]
    }
}

/// Closing texts printed under the totals by the PDF renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Footer {
    pub thank_you: String,
    pub policy: String,
}

impl Default for Footer {
    fn default() -> Self {
        Self {
            thank_you: "Thank you for your order.\nHappy planting!".to_string(),
            policy: "We do not offer refunds once you have left the premises. All sales are final. \
                     Please check the contents of your order carefully to make sure there are no errors. \
                     Staff are available to assist and correct errors."
                .to_string(),
        }
    }
}

/// External programs invoked out of process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Converters {
    pub typst: String,
    pub office: String,
}

impl Default for Converters {
    fn default() -> Self {
        Self {
            typst: "typst".to_string(),
            office: "soffice".to_string(),
        }
    }
}

fn get_config_path() -> Option<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "order-invoices", "app")?;
    Some(proj_dirs.config_dir().join("settings.toml"))
}

impl Settings {
    /// Resolve and read the settings file. Returns the file used, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = match explicit {
            Some(p) => Some(p.to_path_buf()),
            None => [Some(PathBuf::from(LOCAL_CONFIG)), get_config_path()]
                .into_iter()
                .flatten()
                .find(|p| p.exists()),
        };

        let Some(path) = path else {
            debug!("no settings file found, using defaults");
            return Ok((Self::default(), None));
        };

        let content = fs::read_to_string(&path)?;
        let settings = Self::from_toml(&content).map_err(|source| InvoiceError::Config {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "loaded settings");
        Ok((settings, Some(path)))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
