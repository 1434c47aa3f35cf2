//! Command line driver: expand and/or parse one page against a template
//! registry dump.

use std::{fs, time::Instant};
use wikitext_rs::{
    ExpansionContext, NodeChild, PageRecord, SourceRegistry, WikiNode, parse,
};

fn usage<T>(err: &'static str) -> anyhow::Result<T> {
    let exe = std::env::args().next().unwrap_or_default();
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Usage: {exe} [options] <page.txt>\n");
    println!("Options:");
    println!("    --templates <dump.json>: page records captured from a dump");
    println!("                             (also WIKI_TEMPLATES_FILE)");
    println!("    --title <title>: page title (default: Page)");
    println!("    --pre-expand: expand only templates flagged for pre-expansion");
    println!("    --tree: print the parse tree instead of expanding");
    println!("    --timeout <seconds>: per-page expansion deadline\n");
    Err(anyhow::Error::msg(err))
}

/// Prints an indented parse tree for debugging.
fn print_tree(node: &WikiNode, indent: usize) {
    println!("{}{:?} {:?}", " ".repeat(indent), node.kind, node.args);
    for (name, value) in &node.attrs {
        println!("{}    {name}={value}", " ".repeat(indent));
    }
    for child in &node.children {
        match child {
            NodeChild::Text(text) => println!("{}{text:?}", " ".repeat(indent + 2)),
            NodeChild::Node(node) => print_tree(node, indent + 2),
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut args = pico_args::Arguments::from_env();
    let templates_path: Option<String> = args.opt_value_from_str("--templates")?;
    let title: String = args
        .opt_value_from_str("--title")?
        .unwrap_or_else(|| "Page".to_string());
    let pre_expand = args.contains("--pre-expand");
    let tree = args.contains("--tree");
    let timeout: Option<u64> = args.opt_value_from_str("--timeout")?;

    let page_path = if let Some(path) = args.opt_free_from_str::<String>()? {
        path
    } else if let Ok(path) = std::env::var("WIKI_PAGE_FILE") {
        path
    } else {
        return usage("Missing page file argument");
    };
    if !args.finish().is_empty() {
        return usage("Unknown extra arguments passed");
    }

    let text = fs::read_to_string(&page_path)?;

    if tree {
        let out = parse(&title, &text);
        print_tree(&out.root, 0);
        for diagnostic in &out.diagnostics {
            eprintln!("{diagnostic}");
        }
        return Ok(());
    }

    let templates_path = templates_path
        .or_else(|| std::env::var("WIKI_TEMPLATES_FILE").ok());
    let registry = match &templates_path {
        Some(path) => {
            let start = Instant::now();
            let records: Vec<PageRecord> = serde_json::from_str(&fs::read_to_string(path)?)?;
            let registry = SourceRegistry::from_pages(records);
            log::info!("loaded template registry in {:.2?}", start.elapsed());
            registry
        }
        None => SourceRegistry::from_pages([]),
    };

    let mut ctx = ExpansionContext::new(&registry);
    if let Some(seconds) = timeout {
        ctx.set_deadline(Some(
            Instant::now() + std::time::Duration::from_secs(seconds),
        ));
    }

    let start = Instant::now();
    let expanded = if pre_expand {
        ctx.expand_selected(&title, &text, registry.pre_expand_names())
    } else {
        ctx.expand(&title, &text)
    };
    log::info!("expanded {title} in {:.2?}", start.elapsed());

    for diagnostic in ctx.take_diagnostics() {
        eprintln!("{diagnostic}");
    }
    println!("{expanded}");
    Ok(())
}
