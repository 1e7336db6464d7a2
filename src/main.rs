mod error;
mod grid;
mod highlight;
mod images;
mod model;
mod ooxml;
mod orders;
mod output;
mod pipeline;
mod render;
mod settings;
mod styles;
mod summary;
mod template;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use crate::error::Result;
use crate::orders::{SortKey, load_orders, sort_groups};
use crate::pipeline::RunOptions;
use crate::settings::{OutputFormat, Settings};
use crate::summary::OrderSummary;
use crate::template::Template;

#[derive(Parser)]
#[command(name = "order-invoices", version, about = "Batch invoices from an order export and a spreadsheet template")]
struct Cli {
    /// Settings file (defaults to ./invoices.toml, then the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate one invoice per order
    Generate {
        /// Orders CSV export
        #[arg(long)]
        orders: Option<PathBuf>,
        /// Template workbook with the Invoice sheet
        #[arg(long)]
        template: Option<PathBuf>,
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        /// Also convert the workbook to PDF with the office suite
        #[arg(long)]
        pdf: bool,
        /// No progress bar or status lines
        #[arg(short, long)]
        quiet: bool,
    },
    /// List orders found in the export
    List {
        #[arg(long)]
        orders: Option<PathBuf>,
        #[arg(long, value_enum)]
        sort: Option<SortKey>,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the highlight rules read from the template
    Rules {
        #[arg(long)]
        template: Option<PathBuf>,
    },
    /// Show the effective configuration
    Config,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        let _ = Cli::command().print_help();
        return ExitCode::SUCCESS;
    };

    match run(command, cli.config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands, config: Option<PathBuf>) -> Result<()> {
    let (mut settings, config_path) = Settings::load(config.as_deref())?;

    match command {
        Commands::Generate { orders, template, output, format, sort, pdf, quiet } => {
            if let Some(orders) = orders {
                settings.orders = orders;
            }
            if let Some(template) = template {
                settings.template = template;
            }
            if let Some(output) = output {
                settings.output = output;
            }
            if let Some(format) = format {
                settings.format = format;
            }
            if let Some(sort) = sort {
                settings.sort = sort;
            }

            let report = pipeline::generate(&settings, RunOptions { convert_pdf: pdf, quiet })?;
            if !quiet {
                println!("{}", summary::run_table(&report));
                if let Some(pdf) = &report.pdf {
                    println!("✅ PDF Generated: {}", pdf.display());
                }
                if settings.format == OutputFormat::Xlsx {
                    println!("📄 To print invoices: open {} and print the entire workbook", report.output.display());
                }
            }
        }
        Commands::List { orders, sort, json } => {
            let path = orders.unwrap_or(settings.orders);
            let mut groups = load_orders(&path)?;
            sort_groups(&mut groups, sort.unwrap_or(settings.sort));
            let listing: Vec<OrderSummary> = groups.iter().map(OrderSummary::from_group).collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("{}", summary::orders_table(&listing));
            }
        }
        Commands::Rules { template } => {
            let path = template.unwrap_or(settings.template);
            let template = Template::load(&path, &settings.layout.sheet)?;
            let rules = template.highlight_rules();
            if rules.is_empty() {
                println!("📭 No highlight rules in {}", path.display());
            } else {
                println!("{}", summary::rules_table(&rules));
            }
        }
        Commands::Config => {
            match &config_path {
                Some(path) => println!("📁 Settings file: {}", path.display()),
                None => println!("📁 No settings file found, using defaults"),
            }
            println!("{}", settings.to_toml());
        }
    }
    Ok(())
}
