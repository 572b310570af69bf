//! labels - product list tooling for the label generator
//!
//! Usage:
//!   labels import <file.json>       Replace the stored product list
//!   labels list [filters]           Show products matching the filters
//!   labels batches                  List batch labels
//!   labels generate [filters] ...   Emit a label job for the selection

use anyhow::{Context, Result};
use labelgate::catalog::{batches, Product};
use labelgate::filter::ProductFilter;
use labelgate::selection::Selection;
use labelgate::store::{ProductStore, StoreError};
use serde::Serialize;
use std::collections::BTreeSet;
use std::env;
use std::path::PathBuf;

/// Label job handed to the label settings/rendering step
#[derive(Debug, Serialize)]
struct LabelJob {
    count: usize,
    products: Vec<Product>,
}

/// Filters shared by `list` and `generate`
#[derive(Debug, Default)]
struct FilterOptions {
    search: String,
    batches: BTreeSet<String>,
}

impl FilterOptions {
    fn to_filter(&self) -> ProductFilter {
        ProductFilter::new(&self.search, self.batches.clone())
    }
}

#[derive(Debug, Default)]
struct GenerateOptions {
    filter: FilterOptions,
    ids: Vec<String>,
    all: bool,
    invert: bool,
}

/// CLI command structure
#[derive(Debug)]
enum Command {
    Import { file: PathBuf },
    List(FilterOptions),
    Batches,
    Generate(GenerateOptions),
    Help,
    Version,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    let (store_path, rest) = extract_store_flag(&args[1..]);
    let store = match store_path {
        Some(path) => ProductStore::new(path),
        None => match env::var("LABELGATE_STORE") {
            Ok(path) => ProductStore::new(path),
            Err(_) => ProductStore::default_location(),
        },
    };

    match parse_command(&rest)? {
        Command::Help => print_help(),
        Command::Version => println!("labels {}", labelgate::VERSION),
        Command::Import { file } => handle_import(&store, file)?,
        Command::List(opts) => handle_list(&store, opts)?,
        Command::Batches => handle_batches(&store)?,
        Command::Generate(opts) => handle_generate(&store, opts)?,
    }

    Ok(())
}

/// Pull `--store <path>` out of the argument list
fn extract_store_flag(args: &[String]) -> (Option<PathBuf>, Vec<String>) {
    let mut store = None;
    let mut rest = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--store" {
            store = iter.next().map(PathBuf::from);
        } else {
            rest.push(arg.clone());
        }
    }
    (store, rest)
}

fn parse_command(args: &[String]) -> Result<Command> {
    if args.is_empty() {
        return Ok(Command::Help);
    }

    let command = match args[0].as_str() {
        "help" | "--help" | "-h" => Command::Help,
        "version" | "--version" | "-v" => Command::Version,
        "import" => match args.get(1) {
            Some(file) => Command::Import { file: PathBuf::from(file) },
            None => anyhow::bail!("usage: labels import <file.json>"),
        },
        "list" | "ls" => Command::List(parse_filter_options(&args[1..])),
        "batches" => Command::Batches,
        "generate" | "gen" => Command::Generate(parse_generate_options(&args[1..])),
        other => anyhow::bail!("unknown command '{}'; run `labels help` for usage", other),
    };
    Ok(command)
}

fn parse_filter_options(args: &[String]) -> FilterOptions {
    let search = args
        .iter()
        .position(|a| a == "--search" || a == "-s")
        .and_then(|i| args.get(i + 1).cloned())
        .unwrap_or_default();

    let batches = args
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == "--batch" || *a == "-b")
        .filter_map(|(i, _)| args.get(i + 1).cloned())
        .collect();

    FilterOptions { search, batches }
}

fn parse_generate_options(args: &[String]) -> GenerateOptions {
    let ids = args
        .iter()
        .enumerate()
        .filter(|(_, a)| *a == "--id")
        .filter_map(|(i, _)| args.get(i + 1).cloned())
        .collect();

    GenerateOptions {
        filter: parse_filter_options(args),
        ids,
        all: args.iter().any(|a| a == "--all"),
        invert: args.iter().any(|a| a == "--invert"),
    }
}

/// Load the product list, turning "nothing usable stored" into import guidance
fn load_products(store: &ProductStore) -> Result<Vec<Product>> {
    match store.load() {
        Ok(products) => Ok(products),
        Err(e) if e.needs_import() => {
            let hint = match e {
                StoreError::Parse { .. } => "the stored product list could not be read",
                _ => "no product list has been imported yet",
            };
            anyhow::bail!("{}; run `labels import <file.json>` first", hint)
        }
        Err(e) => Err(e.into()),
    }
}

fn handle_import(store: &ProductStore, file: PathBuf) -> Result<()> {
    let products = store
        .import_file(&file)
        .with_context(|| format!("Failed to import {}", file.display()))?;

    println!("Imported {} products into {}", products.len(), store.path().display());
    Ok(())
}

fn handle_list(store: &ProductStore, opts: FilterOptions) -> Result<()> {
    let products = load_products(store)?;
    let visible = opts.to_filter().apply(&products);

    println!(
        "{:<38} {:<24} {:<14} {:<12} {:<16} {:>8}",
        "ID", "PRODUCT", "ORDER", "CODE", "BATCH", "QTY"
    );
    for p in &visible {
        println!(
            "{:<38} {:<24} {:<14} {:<12} {:<16} {:>8}",
            p.id,
            p.product_name,
            p.order_number,
            p.product_code,
            p.remarks,
            p.quantity_text()
        );
    }
    println!("\n{} of {} products shown", visible.len(), products.len());
    Ok(())
}

fn handle_batches(store: &ProductStore) -> Result<()> {
    let products = load_products(store)?;
    for batch in batches(&products) {
        println!("{}", batch);
    }
    Ok(())
}

fn handle_generate(store: &ProductStore, opts: GenerateOptions) -> Result<()> {
    let products = load_products(store)?;
    let job = build_label_job(&products, &opts)?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

/// Apply the filters, then `--id`/`--all`/`--invert` within the visible rows,
/// and resolve the selection against the full list.
fn build_label_job(products: &[Product], opts: &GenerateOptions) -> Result<LabelJob> {
    let visible = opts.filter.to_filter().apply(products);

    let mut selection = Selection::from_ids(opts.ids.iter().cloned());
    if opts.all {
        selection.select_all(&visible);
    }
    if opts.invert {
        selection.invert(&visible);
    }

    let selected = selection.resolve(products);
    if selected.is_empty() {
        anyhow::bail!("no products selected; use --id <id>, --all or --invert");
    }

    Ok(LabelJob {
        count: selected.len(),
        products: selected,
    })
}

fn print_help() {
    println!(
        r#"
labels - product list tooling for the label generator

USAGE:
    labels [--store <path>] <command> [options]

COMMANDS:
    import <file.json>       Replace the stored product list
    list                     Show products matching the filters
    batches                  List batch labels
    generate                 Emit a label job (JSON) for the selected products
    version                  Show version

FILTERS (list, generate):
    --search, -s <term>      Case- and space-insensitive search
    --batch, -b <label>      Restrict to a batch (repeatable)

SELECTION (generate):
    --id <id>                Select a product (repeatable)
    --all                    Select every product matching the filters
    --invert                 Invert the selection within the filtered rows

ENVIRONMENT:
    LABELGATE_STORE          Product list path (default: ~/.labelgate/labelData.json)
"#
    );
}
