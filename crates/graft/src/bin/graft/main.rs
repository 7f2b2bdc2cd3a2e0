mod cli;

use anyhow::Context;
use graft::manifest::Manifest;
use graft::schema::ProviderSchemas;
use graft::{patch, vendor};
use std::path::Path;

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GRAFT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    for new_path in cli.directory.iter() {
        match new_path.canonicalize() {
            Err(e) => {
                eprintln!(
                    "Failed to resolve path for -C/--directory {}\n{}",
                    new_path.display(),
                    e
                );
                std::process::exit(1);
            }
            Ok(cwd) => {
                if let Err(err) = std::env::set_current_dir(&cwd) {
                    eprintln!("Failed to set work directory to {}\n{}", cwd.display(), err);
                    std::process::exit(1);
                }

                tracing::info!(directory=%cwd.display(), "Changed working directory");
            }
        }
    }

    let command_result = match cli.command {
        cli::Command::Absorb(absorb_cli) => absorb(absorb_cli),
        cli::Command::Build(build_cli) => build(build_cli),
        cli::Command::Clean => clean(),
        cli::Command::Scaffold(scaffold_cli) => scaffold(scaffold_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

fn section(message: &str) {
    println!("[+] {message}");
}

fn item(message: impl std::fmt::Display) {
    println!("    - {message}");
}

fn hint(message: &str) {
    println!("-> {message}");
}

pub fn absorb(cli: cli::AbsorbCommand) -> anyhow::Result<()> {
    anyhow::ensure!(
        cli.plan.is_file(),
        "plan file not found: {}",
        cli.plan.display()
    );

    let schemas = match &cli.providers_schema {
        Some(path) => {
            anyhow::ensure!(
                path.is_file(),
                "providers schema file not found: {}",
                path.display()
            );
            Some(ProviderSchemas::load(path)?)
        }
        None => {
            section("Fetching providers schema...");
            match fetch_provider_schemas() {
                Ok(schemas) => Some(schemas),
                Err(e) => {
                    let error = format!("{e:#}");
                    tracing::warn!(%error, "could not fetch providers schema");
                    hint("Continuing without schema. For better results, run with: -p providers.json");
                    None
                }
            }
        }
    };

    section("Reading Terraform plan JSON...");
    let changes = graft::absorb::plan::parse_plan_file(&cli.plan)?;
    if changes.is_empty() {
        hint("No drift detected in the plan. Nothing to absorb.");
        return Ok(());
    }

    section(&format!("Found {} resource(s) with drift...", changes.len()));
    for change in &changes {
        item(&change.address);
    }

    section("Generating manifest...");
    let tree = graft::absorb::build_tree(&changes, schemas.as_ref());
    if tree.is_empty() {
        hint("All drift is in provider computed attributes. Nothing to absorb.");
        return Ok(());
    }

    let manifest = tree.to_hcl()?;
    std::fs::write(&cli.output, manifest)
        .with_context(|| format!("failed to write manifest {}", cli.output.display()))?;

    section(&format!("Manifest saved to {}", cli.output.display()));
    hint("Next steps:\n  1. Review the generated manifest\n  2. Run 'graft build' to apply overrides\n  3. Run 'terraform plan' to verify zero changes");
    Ok(())
}

/// Provider schemas of the work directory as reported by terraform
fn fetch_provider_schemas() -> anyhow::Result<ProviderSchemas> {
    let output = std::process::Command::new("terraform")
        .args(["providers", "schema", "-json"])
        .output()
        .context("failed to run terraform")?;

    anyhow::ensure!(
        output.status.success(),
        "terraform providers schema failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    );

    let schemas = ProviderSchemas::from_json(&String::from_utf8_lossy(&output.stdout))?;
    Ok(schemas)
}

pub fn build(cli: cli::BuildCommand) -> anyhow::Result<()> {
    let root = std::env::current_dir()?;

    let manifest = match &cli.manifest {
        Some(path) => {
            section(&format!("Reading {}...", path.display()));
            Manifest::load(path)?
        }
        None => {
            let paths = Manifest::discover(&root)?;
            if paths.is_empty() {
                hint("No graft manifests found in the current directory.\nCreate one by hand or run 'graft absorb <plan.json>'.");
                return Ok(());
            }

            section(&format!("Reading {} graft manifest(s)...", paths.len()));
            for path in &paths {
                item(file_name(path));
            }
            Manifest::load_all(&paths)?
        }
    };

    section("Vendoring modules...");
    let vendored = vendor::vendor_modules(&root, &manifest)?;
    for key in vendored.keys() {
        item(key);
    }

    section("Applying patches...");
    let reports = patch::apply_patches(&manifest, &root, &vendored)?;
    for (key, report) in &reports {
        let module = if key.is_empty() { "root" } else { key.as_str() };
        item(format!(
            "{module}: {} override(s), removals in {} file(s)",
            report.overrides, report.removed_from
        ));
    }

    if !vendored.is_empty() {
        section("Linking modules...");
        let redirected = vendor::redirect_modules(&root)?;
        item(format!("{redirected} module(s) redirected in modules.json"));
    }

    section("Build complete!");
    Ok(())
}

pub fn clean() -> anyhow::Result<()> {
    let root = std::env::current_dir()?;

    section("Removing build artifacts...");
    let report = vendor::clean(&root)?;
    for path in &report.removed {
        item(file_name(path));
    }

    if let Some(unlinked) = report.unlinked {
        section("Resetting module links...");
        item(format!("{unlinked} entries removed from modules.json"));
        if unlinked > 0 {
            hint("Next Step: Run 'terraform init' to restore original paths.");
        }
    }

    section("Clean complete!");
    Ok(())
}

pub fn scaffold(cli: cli::ScaffoldCommand) -> anyhow::Result<()> {
    let root = std::env::current_dir()?;

    section("Reading module tree...");
    let tree = graft::scaffold::module_tree(&root)?;
    print!("{}", tree.to_tree());

    if tree.children.is_empty() {
        hint("No module calls found. Nothing to scaffold.");
        return Ok(());
    }

    let Some(skeleton) = tree.manifest_skeleton(&cli.targets) else {
        anyhow::bail!("no module matches {}", cli.targets.join(", "));
    };

    anyhow::ensure!(
        !cli.output.exists(),
        "{} already exists, choose another file with -o",
        cli.output.display()
    );
    std::fs::write(&cli.output, skeleton)
        .with_context(|| format!("failed to write manifest {}", cli.output.display()))?;

    section(&format!("Manifest skeleton saved to {}", cli.output.display()));
    hint("Next steps:\n  1. Uncomment the resources to override and add attributes\n  2. Run 'graft build' to apply overrides");
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
