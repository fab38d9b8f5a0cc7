//! Thin command-line wrapper around [`fsh_core`]. Owns everything the core
//! library deliberately stays out of: reading `.fsh` files and dependency
//! package JSON off disk, loading a configuration file, wiring a tracing
//! subscriber, and writing the assembled package back out as one JSON file
//! per artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use fsh_core::config::CompilerConfig;
use fsh_core::import::SourceFile;
use fsh_core::{Compiler, Package};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "fsh")]
#[command(about = "Compile a shorthand authoring project into target-format JSON resources")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile every `.fsh` file under a project directory.
    Build {
        /// Directory containing `.fsh` source files, searched recursively.
        #[arg(default_value = ".")]
        project_path: PathBuf,

        /// Output directory for generated resources.
        #[arg(short, long, default_value = "fsh-generated")]
        output: PathBuf,

        /// Path to a JSON configuration file (canonical/version/fhirVersion/...).
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory of already-fetched dependency package JSON documents,
        /// searched recursively. May be given more than once.
        #[arg(short, long = "dependency")]
        dependencies: Vec<PathBuf>,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Build { project_path, output, config, dependencies } => {
            run_build(&project_path, &output, config.as_deref(), &dependencies)
        }
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            error!(%err, "fsh build failed");
            ExitCode::FAILURE
        }
    }
}

fn run_build(
    project_path: &Path,
    output: &Path,
    config_path: Option<&Path>,
    dependency_dirs: &[PathBuf],
) -> anyhow::Result<ExitCode> {
    let config = match config_path {
        Some(path) => {
            let text = fs::read_to_string(path)?;
            serde_json::from_str(&text)?
        }
        None => CompilerConfig::default(),
    };

    let sources = collect_sources(project_path)?;
    info!(count = sources.len(), path = %project_path.display(), "collected source files");

    let mut dependency_documents = Vec::new();
    for dir in dependency_dirs {
        collect_dependency_documents(dir, &mut dependency_documents)?;
    }
    info!(count = dependency_documents.len(), "loaded dependency package documents");

    let (package, diags) = Compiler::compile(&sources, &dependency_documents, &config)?;

    for diagnostic in diags.sorted() {
        match diagnostic.severity {
            fsh_core::diagnostics::Severity::Error => error!("{diagnostic}"),
            fsh_core::diagnostics::Severity::Warning => warn!("{diagnostic}"),
            fsh_core::diagnostics::Severity::Info => info!("{diagnostic}"),
        }
    }

    write_package(output, &package)?;

    Ok(if diags.error_count() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Recursively collect every `.fsh` file under `root`.
fn collect_sources(root: &Path) -> anyhow::Result<Vec<SourceFile>> {
    let mut sources = Vec::new();
    for path in files_with_extension(root, "fsh")? {
        let text = fs::read_to_string(&path)?;
        sources.push(SourceFile { path: Some(path), text });
    }
    Ok(sources)
}

/// Recursively collect every `*.json` document under `root`, parsed as a
/// raw dependency-package structured-definition document (§6 "opaque
/// archives whose contents are parsed as JSON").
fn collect_dependency_documents(root: &Path, out: &mut Vec<serde_json::Value>) -> anyhow::Result<()> {
    for path in files_with_extension(root, "json")? {
        let text = fs::read_to_string(&path)?;
        out.push(serde_json::from_str(&text)?);
    }
    Ok(())
}

/// Every file under `root` (recursively, in sorted order for determinism)
/// whose extension matches `extension`. `root` itself may be a file.
fn files_with_extension(root: &Path, extension: &str) -> anyhow::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    collect_paths(root, extension, &mut out)?;
    Ok(out)
}

fn collect_paths(path: &Path, extension: &str, out: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    if path.is_file() {
        if path.extension().and_then(|e| e.to_str()) == Some(extension) {
            out.push(path.to_path_buf());
        }
        return Ok(());
    }
    let mut entries: Vec<_> = fs::read_dir(path)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.path());
    for entry in entries {
        collect_paths(&entry.path(), extension, out)?;
    }
    Ok(())
}

/// Write every artifact in `package` to `output/<kind>/<ResourceType>-<id>.json`.
fn write_package(output: &Path, package: &Package) -> anyhow::Result<()> {
    write_kind(output, "profiles", package.profiles.iter().map(|s| (s.resource_type.as_str(), s.id.as_deref().unwrap_or(s.name.as_str()), s)))?;
    write_kind(output, "extensions", package.extensions.iter().map(|s| (s.resource_type.as_str(), s.id.as_deref().unwrap_or(s.name.as_str()), s)))?;
    write_kind(output, "logicals", package.logicals.iter().map(|s| (s.resource_type.as_str(), s.id.as_deref().unwrap_or(s.name.as_str()), s)))?;
    write_kind(output, "resources", package.resources.iter().map(|s| (s.resource_type.as_str(), s.id.as_deref().unwrap_or(s.name.as_str()), s)))?;
    write_kind(output, "valuesets", package.value_sets.iter().map(|v| (v.resource_type.as_str(), v.id.as_deref().unwrap_or(v.name.as_str()), v)))?;
    write_kind(output, "codesystems", package.code_systems.iter().map(|c| (c.resource_type.as_str(), c.id.as_deref().unwrap_or(c.name.as_str()), c)))?;

    for artifact in &package.instances {
        let instance_dir = output.join(artifact.usage.dir_name());
        fs::create_dir_all(&instance_dir)?;
        let resource_type = artifact.resource.get("resourceType").and_then(|v| v.as_str()).unwrap_or("Instance");
        let id = artifact.resource.get("id").and_then(|v| v.as_str()).unwrap_or("unknown");
        let path = instance_dir.join(Package::file_name(resource_type, id));
        fs::write(path, serde_json::to_string_pretty(&artifact.resource)?)?;
    }

    Ok(())
}

fn write_kind<'a, T: serde::Serialize + 'a>(
    output: &Path,
    subdir: &str,
    artifacts: impl Iterator<Item = (&'a str, &'a str, T)>,
) -> anyhow::Result<()> {
    let dir = output.join(subdir);
    fs::create_dir_all(&dir)?;
    for (resource_type, id, artifact) in artifacts {
        let path = dir.join(Package::file_name(resource_type, id));
        fs::write(path, serde_json::to_string_pretty(&artifact)?)?;
    }
    Ok(())
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("fsh=info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
