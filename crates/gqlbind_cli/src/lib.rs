//! Command-line interface for gqlbind.
//!
//! # Usage
//!
//! ```bash
//! # Validate fragments and operations
//! gqlbind check fragments.graphql operations.graphql
//!
//! # Print the composed document of one operation, as sent to the server
//! gqlbind compose --operation GetDocument --wire *.graphql
//!
//! # Write the persisted-document manifest
//! gqlbind manifest -o manifest.json *.graphql
//!
//! # Format files
//! gqlbind fmt operations.graphql
//!
//! # Print the syntax tree of a file
//! gqlbind parse operations.graphql
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use gqlbind_core::Report;
use gqlbind_document::{CatalogError, CompiledOperation, OperationCatalog};
use gqlbind_syntax::{parse, print, print_with_options, PrintOptions};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "gqlbind")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check fragments and operations for errors
    Check {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print composed operation documents
    Compose {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Only print this operation
        #[arg(short, long)]
        operation: Option<String>,

        /// Print the wire document, without `@client` fields
        #[arg(long)]
        wire: bool,

        /// Print JSON instead of GraphQL
        #[arg(long)]
        json: bool,
    },

    /// Write the persisted-document manifest
    Manifest {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Format GraphQL files
    #[command(alias = "format")]
    Fmt {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Check if files are formatted (don't modify)
        #[arg(long)]
        check: bool,

        /// Indentation size
        #[arg(long, default_value = "2")]
        indent: usize,

        /// Use tabs instead of spaces
        #[arg(long)]
        tabs: bool,
    },

    /// Parse a GraphQL file and print the syntax tree
    Parse {
        /// File to parse
        file: PathBuf,
    },
}

/// A source file read from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub text: String,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
        }
    }

    fn read(path: &Path) -> std::io::Result<Self> {
        Ok(Self::new(path, std::fs::read_to_string(path)?))
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

/// A problem found while building a catalog.
#[derive(Debug)]
pub enum Problem {
    /// A syntax error, located in its file.
    Syntax(Report),
    Catalog(CatalogError),
}

impl Problem {
    fn render(&self) {
        match self {
            Self::Syntax(report) => {
                let mut out = String::new();
                match miette::GraphicalReportHandler::new().render_report(&mut out, report) {
                    Ok(()) => eprint!("{out}"),
                    Err(_) => eprintln!("{} {}", "error".red().bold(), report),
                }
            }
            Self::Catalog(err) => {
                eprintln!("{} [{}] {}", "error".red().bold(), err.code(), err);
            }
        }
    }
}

pub fn run(cli: Cli) -> Result<i32, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Check { files } => check_files(&files, cli.verbose),
        Commands::Compose {
            files,
            operation,
            wire,
            json,
        } => compose_files(&files, operation.as_deref(), wire, json),
        Commands::Manifest { files, output } => write_manifest(&files, output.as_deref()),
        Commands::Fmt {
            files,
            check,
            indent,
            tabs,
        } => format_files(&files, check, indent, tabs, cli.verbose),
        Commands::Parse { file } => parse_file(&file),
    }
}

/// Parses every source and compiles them into one catalog.
///
/// Syntax errors are reported per file and stop the build; catalog errors
/// are all collected.
pub fn build_catalog(sources: &[SourceFile]) -> Result<OperationCatalog, Vec<Problem>> {
    let mut problems = Vec::new();
    for source in sources {
        let result = parse(&source.text);
        problems.extend(
            result
                .diagnostics
                .into_vec()
                .into_iter()
                .filter(|d| d.is_error())
                .map(|d| Problem::Syntax(Report::new(source.name(), source.text.clone(), d))),
        );
    }
    if !problems.is_empty() {
        return Err(problems);
    }

    let mut builder = OperationCatalog::builder();
    for source in sources {
        builder.add_document_str(&source.text);
    }
    builder
        .build()
        .map_err(|errors| errors.into_iter().map(Problem::Catalog).collect())
}

fn load_catalog(files: &[PathBuf]) -> Result<Option<OperationCatalog>, Box<dyn std::error::Error>> {
    let sources = files
        .iter()
        .map(|path| SourceFile::read(path))
        .collect::<std::io::Result<Vec<_>>>()?;

    match build_catalog(&sources) {
        Ok(catalog) => Ok(Some(catalog)),
        Err(problems) => {
            for problem in &problems {
                problem.render();
            }
            eprintln!(
                "{} {} problem(s) found",
                "Error:".red().bold(),
                problems.len()
            );
            Ok(None)
        }
    }
}

fn check_files(files: &[PathBuf], verbose: bool) -> Result<i32, Box<dyn std::error::Error>> {
    let Some(catalog) = load_catalog(files)? else {
        return Ok(1);
    };

    if verbose {
        for op in catalog.iter() {
            println!(
                "{} {} {} ({} fragment(s), {} local field(s))",
                "OK".green(),
                op.kind.as_str(),
                op.name,
                op.fragments.len(),
                op.local_fields.len()
            );
        }
    }

    tracing::info!(
        files = files.len(),
        operations = catalog.len(),
        fragments = catalog.fragments().len(),
        "catalog checked"
    );
    println!(
        "{} {} operation(s), {} fragment(s) in {} file(s)",
        "Success:".green().bold(),
        catalog.len(),
        catalog.fragments().len(),
        files.len()
    );
    Ok(0)
}

fn compose_files(
    files: &[PathBuf],
    operation: Option<&str>,
    wire: bool,
    json: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let Some(catalog) = load_catalog(files)? else {
        return Ok(1);
    };

    let selected: Vec<&CompiledOperation> = match operation {
        Some(name) => match catalog.get(name) {
            Some(op) => vec![op],
            None => {
                eprintln!("{} unknown operation `{}`", "Error:".red().bold(), name);
                return Ok(1);
            }
        },
        None => catalog.iter().collect(),
    };

    if json {
        let out: serde_json::Map<String, serde_json::Value> = selected
            .iter()
            .map(|op| {
                let document = if wire { &op.wire_text } else { &op.text };
                let entry = serde_json::json!({
                    "kind": op.kind.as_str(),
                    "document": document,
                    "fragments": op.fragments,
                    "localFields": op.local_fields,
                });
                (op.name.clone(), entry)
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    let printed: Vec<String> = selected
        .iter()
        .map(|op| print(if wire { &op.wire_document } else { &op.document }))
        .collect();
    println!("{}", printed.join("\n"));
    Ok(0)
}

fn write_manifest(files: &[PathBuf], output: Option<&Path>) -> Result<i32, Box<dyn std::error::Error>> {
    let Some(catalog) = load_catalog(files)? else {
        return Ok(1);
    };

    let manifest = catalog.manifest().to_json_pretty()?;
    match output {
        Some(path) => {
            std::fs::write(path, manifest)?;
            tracing::info!(operations = catalog.len(), path = %path.display(), "manifest written");
            println!("{} {}", "Generated".green(), path.display());
        }
        None => println!("{}", manifest),
    }
    Ok(0)
}

fn format_files(
    files: &[PathBuf],
    check_only: bool,
    indent: usize,
    use_tabs: bool,
    verbose: bool,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut needs_formatting = false;
    let mut failed = false;
    let options = PrintOptions {
        indent_size: indent,
        use_tabs,
        ..Default::default()
    };

    for file in files {
        let source = SourceFile::read(file)?;
        let Some(formatted) = format_source(&source, options.clone()) else {
            failed = true;
            continue;
        };

        if source.text == formatted {
            if verbose {
                println!("{} {}", "Unchanged".dimmed(), file.display());
            }
        } else if check_only {
            needs_formatting = true;
            println!("{} {}", "Would format".yellow(), file.display());
        } else {
            std::fs::write(file, &formatted)?;
            println!("{} {}", "Formatted".green(), file.display());
        }
    }

    Ok(i32::from(failed || (check_only && needs_formatting)))
}

/// Reprints a file; `None` when it does not parse.
fn format_source(source: &SourceFile, options: PrintOptions) -> Option<String> {
    let result = parse(&source.text);
    if result.has_errors() {
        for diagnostic in result.diagnostics.into_vec() {
            Problem::Syntax(Report::new(source.name(), source.text.clone(), diagnostic)).render();
        }
        return None;
    }
    Some(print_with_options(&result.document, options))
}

fn parse_file(file: &Path) -> Result<i32, Box<dyn std::error::Error>> {
    let source = SourceFile::read(file)?;
    let result = parse(&source.text);

    if result.has_errors() {
        for diagnostic in result.diagnostics.into_vec() {
            Problem::Syntax(Report::new(source.name(), source.text.clone(), diagnostic)).render();
        }
        return Ok(1);
    }

    println!("{:#?}", result.document);
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENTS: &str = "
        fragment DocumentBasicInfo on Document { id title }
        fragment DocumentContents on Document { ciphertext plaintext @client }
    ";

    #[test]
    fn test_cli_parse() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compose_arguments() {
        let cli = Cli::try_parse_from([
            "gqlbind",
            "compose",
            "--operation",
            "GetDocument",
            "--wire",
            "ops.graphql",
        ])
        .unwrap();

        match cli.command {
            Commands::Compose {
                files,
                operation,
                wire,
                json,
            } => {
                assert_eq!(files, vec![PathBuf::from("ops.graphql")]);
                assert_eq!(operation.as_deref(), Some("GetDocument"));
                assert!(wire);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_build_catalog_across_files() {
        let sources = [
            SourceFile::new("fragments.graphql", FRAGMENTS),
            SourceFile::new(
                "ops.graphql",
                "query GetDocument($id: ID!) { document(id: $id) { ...DocumentBasicInfo ...DocumentContents } }",
            ),
        ];

        let catalog = build_catalog(&sources).unwrap();
        let op = catalog.get("GetDocument").unwrap();
        assert_eq!(op.fragments, vec!["DocumentBasicInfo", "DocumentContents"]);
        assert!(!op.wire_text.contains("plaintext"));
    }

    #[test]
    fn test_build_catalog_reports_syntax_errors_per_file() {
        let sources = [
            SourceFile::new("fragments.graphql", FRAGMENTS),
            SourceFile::new("broken.graphql", "query Broken { document("),
        ];

        let problems = build_catalog(&sources).unwrap_err();
        assert!(!problems.is_empty());
        assert!(problems.iter().all(|p| matches!(p, Problem::Syntax(_))));
    }

    #[test]
    fn test_build_catalog_reports_undefined_fragment() {
        let sources = [SourceFile::new(
            "ops.graphql",
            "query GetDocument { document(id: 1) { ...Missing } }",
        )];

        let problems = build_catalog(&sources).unwrap_err();
        assert_eq!(problems.len(), 1);
        match &problems[0] {
            Problem::Catalog(err) => assert_eq!(err.code(), "E0010"),
            other => panic!("unexpected problem: {other:?}"),
        }
    }

    #[test]
    fn test_format_source() {
        let source = SourceFile::new("ops.graphql", "query Q{a b}");
        let formatted = format_source(&source, PrintOptions::default()).unwrap();
        assert!(formatted.starts_with("query Q {"));
        assert!(format_source(&SourceFile::new("bad.graphql", "query {"), PrintOptions::default()).is_none());
    }
}
