//! Small tester program for XML input: parse a file through the
//! pipeline with selectable features and dump the resulting tree or a
//! SAX trace.

use std::fs;
use std::path::PathBuf;
use std::process::exit;

use anyhow::{Context, Result};
use clap::Parser;

use xylem::{
    builder::BuildOutput,
    config::{
        CREATE_CDATA_NODES_FEATURE, CREATE_ENTITY_REF_NODES_FEATURE,
        DEFER_NODE_EXPANSION_FEATURE, INCLUDE_COMMENTS_FEATURE, NAMESPACES_FEATURE,
        VALIDATION_FEATURE,
    },
    event::{Attribute, QName},
    parser::{DomParser, SaxParser},
    sax::SaxContentHandler,
};

#[derive(Parser)]
#[command(name = "xylemlint", about = "Parse an XML file and dump its structure")]
struct Cli {
    /// Input file.
    file: PathBuf,

    /// Disable namespace processing.
    #[arg(long)]
    no_namespaces: bool,

    /// Enable DTD validation (attribute defaulting, ignorable
    /// whitespace classification).
    #[arg(long)]
    validate: bool,

    /// Build through the deferred store and materialize at the end.
    #[arg(long)]
    defer: bool,

    /// Drop comment nodes.
    #[arg(long)]
    no_comments: bool,

    /// Fold CDATA sections into text.
    #[arg(long)]
    no_cdata: bool,

    /// Collapse entity references into their expansion.
    #[arg(long)]
    collapse_entities: bool,

    /// Print a SAX event trace instead of the tree outline.
    #[arg(long)]
    sax: bool,

    /// Suppress the dump; only report diagnostics.
    #[arg(long)]
    quiet: bool,
}

struct TraceHandler;

impl SaxContentHandler for TraceHandler {
    fn start_element(&mut self, name: &QName, attributes: &[&Attribute]) {
        let attrs: Vec<String> = attributes
            .iter()
            .map(|a| format!("{}={:?}", a.name.raw, a.value))
            .collect();
        println!("start-element {} [{}]", name.raw, attrs.join(" "));
    }

    fn end_element(&mut self, name: &QName) {
        println!("end-element {}", name.raw);
    }

    fn characters(&mut self, text: &str) {
        println!("characters {text:?}");
    }

    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {
        println!("pi {target} {data:?}");
    }

    fn skipped_entity(&mut self, name: &str) {
        println!("skipped-entity {name}");
    }
}

fn main() {
    if let Err(err) = run() {
        eprintln!("xylemlint: {err:#}");
        exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let bytes = fs::read(&cli.file)
        .with_context(|| format!("cannot read {}", cli.file.display()))?;
    let system_id = cli.file.display().to_string();

    if cli.sax {
        let mut parser = SaxParser::new();
        parser.set_feature(NAMESPACES_FEATURE, !cli.no_namespaces)?;
        parser.set_feature(VALIDATION_FEATURE, cli.validate)?;
        parser.set_content_handler(Box::new(TraceHandler));
        let result = parser.parse_bytes(&bytes, Some(&system_id));
        report(parser.reporter());
        result.context("parse failed")?;
        return Ok(());
    }

    let mut parser = DomParser::new();
    parser.set_feature(NAMESPACES_FEATURE, !cli.no_namespaces)?;
    parser.set_feature(VALIDATION_FEATURE, cli.validate)?;
    parser.set_feature(DEFER_NODE_EXPANSION_FEATURE, cli.defer)?;
    parser.set_feature(INCLUDE_COMMENTS_FEATURE, !cli.no_comments)?;
    parser.set_feature(CREATE_CDATA_NODES_FEATURE, !cli.no_cdata)?;
    parser.set_feature(CREATE_ENTITY_REF_NODES_FEATURE, !cli.collapse_entities)?;

    let result = parser.parse_bytes(&bytes, Some(&system_id));
    report(parser.reporter());
    let output = result.context("parse failed")?;
    let doc = match output {
        BuildOutput::Tree(doc) => doc,
        BuildOutput::Deferred(store) => store.materialize(),
    };
    if !cli.quiet {
        print!("{}", doc.outline());
    }
    Ok(())
}

fn report(reporter: xylem::error::SharedErrorReporter) {
    for (severity, diagnostic) in reporter.borrow().diagnostics() {
        eprintln!("{severity}: {diagnostic}");
    }
}
