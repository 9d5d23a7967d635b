use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::Command;

use protoworld_kernel::ComponentRegistry;
use protoworld_prototype::{ComponentCatalog, PrototypeStore};

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for protoworld")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run fmt, clippy and tests
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates, warnings denied
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Load and resolve a template directory without spawning anything
    Validate {
        dir: PathBuf,
        /// Fail when a template names a component type with no built-in
        #[arg(long)]
        strict: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            cargo("fmt", &["fmt", "--all", "--", "--check"])?;
            cargo("clippy", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?;
            cargo("test", &["test", "--workspace"])?;
        }
        Commands::Fmt => cargo("fmt", &["fmt", "--all", "--", "--check"])?,
        Commands::Clippy => {
            cargo("clippy", &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"])?
        }
        Commands::Test => cargo("test", &["test", "--workspace"])?,
        Commands::Doc => cargo("doc", &["doc", "--workspace", "--no-deps"])?,
        Commands::Validate { dir, strict } => validate(&dir, strict)?,
    }

    Ok(())
}

fn cargo(label: &str, args: &[&str]) -> Result<()> {
    println!("==> Running cargo {label}");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("cargo {label} failed");
    }
    Ok(())
}

fn validate(dir: &Path, strict: bool) -> Result<()> {
    println!("==> Validating templates in {}", dir.display());
    let registry = ComponentRegistry::with_builtins();
    let mut store = PrototypeStore::new();
    store.load_dir(dir, None)?;
    let report = store.resolve_inheritance()?;

    let mut unknown = Vec::new();
    for prototype in store.iter() {
        for type_name in prototype.components().type_names() {
            if !registry.contains_component(type_name) {
                unknown.push(format!("{}: {}", prototype.id(), type_name));
            }
        }
    }
    println!(
        "{} templates, {} resolved, {} unknown component references",
        store.len(),
        report.resolved,
        unknown.len()
    );
    for line in &unknown {
        println!("  {line}");
    }
    if strict && !unknown.is_empty() {
        anyhow::bail!("template validation failed");
    }
    Ok(())
}
