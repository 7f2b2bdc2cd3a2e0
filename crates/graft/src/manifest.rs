//! graft manifests (`*.graft.hcl`)
//!
//! ```hcl
//! override {
//!   resource "azurerm_resource_group" "main" { ... }
//! }
//!
//! module "network" {
//!   source  = "Azure/network/azurerm"
//!   version = "5.3.0"
//!
//!   override {
//!     resource "azurerm_subnet" "subnet" { ... }
//!   }
//!
//!   module "nested" { ... }
//! }
//! ```
//!
//! Several manifests in one directory are merged in file name order, later files win.
use crate::block::{blocks_from_body, Block};
use crate::error::{Error, Result};
use hcl::Expression;
use indexmap::IndexMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const MANIFEST_SUFFIX: &str = ".graft.hcl";
const OVERRIDE: &str = "override";
const MODULE: &str = "module";

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Manifest {
    /// Contents of the top level `override` blocks
    pub overrides: Vec<Block>,
    pub modules: IndexMap<String, ModuleManifest>,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModuleManifest {
    pub name: String,
    pub source: Option<String>,
    pub version: Option<String>,
    pub overrides: Vec<Block>,
    pub modules: IndexMap<String, ModuleManifest>,
}

impl Manifest {
    pub fn parse(content: &str) -> hcl::Result<Self> {
        let blocks = blocks_from_body(hcl::parse(content)?);
        let (overrides, modules) = parse_level(blocks);
        Ok(Manifest { overrides, modules })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::read(path))?;
        Self::parse(&content).map_err(|source| Error::Hcl {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads and merges `paths` in the given order
    pub fn load_all(paths: &[PathBuf]) -> Result<Self> {
        let mut manifest = Manifest::default();
        for path in paths {
            tracing::debug!(path = %path.display(), "loading manifest");
            manifest.merge(Manifest::load(path)?);
        }
        Ok(manifest)
    }

    /// `*.graft.hcl` files in `dir`, sorted by name
    pub fn discover(dir: &Path) -> Result<Vec<PathBuf>> {
        let mut paths = vec![];
        for dir_entry in std::fs::read_dir(dir).map_err(Error::read(dir))? {
            let dir_entry = dir_entry.map_err(Error::read(dir))?;
            let is_manifest = dir_entry
                .file_name()
                .to_string_lossy()
                .ends_with(MANIFEST_SUFFIX);
            if is_manifest && dir_entry.file_type().map_err(Error::read(dir))?.is_file() {
                paths.push(dir_entry.path());
            }
        }
        paths.sort();
        Ok(paths)
    }

    /// Merges `other` on top of `self`
    pub fn merge(&mut self, other: Manifest) {
        merge_override_blocks(&mut self.overrides, other.overrides);
        merge_modules(&mut self.modules, other.modules);
    }

    /// Modules with at least one override block, keyed by their dotted path (`parent.child`)
    pub fn patched_modules(&self) -> BTreeMap<String, &ModuleManifest> {
        let mut patched = BTreeMap::new();
        collect_patched(&self.modules, None, &mut patched);
        patched
    }
}

fn parse_level(blocks: Vec<Block>) -> (Vec<Block>, IndexMap<String, ModuleManifest>) {
    let mut overrides = vec![];
    let mut modules = IndexMap::new();

    for block in blocks {
        match block.ident.as_str() {
            OVERRIDE => overrides.extend(block.blocks),
            MODULE => {
                let module = ModuleManifest::from(block);
                match modules.get_mut(&module.name) {
                    Some(existing) => merge_module(existing, module),
                    None => {
                        modules.insert(module.name.clone(), module);
                    }
                }
            }
            other => tracing::warn!(block = other, "ignoring unknown manifest block"),
        }
    }

    (overrides, modules)
}

impl From<Block> for ModuleManifest {
    fn from(mut block: Block) -> Self {
        let name = block.labels.first().cloned().unwrap_or_default();
        let source = string_attribute(&block, "source");
        let version = string_attribute(&block, "version");

        let (overrides, modules) = parse_level(std::mem::take(&mut block.blocks));
        ModuleManifest {
            name,
            source,
            version,
            overrides,
            modules,
        }
    }
}

fn string_attribute(block: &Block, key: &str) -> Option<String> {
    match block.attributes.get(key)? {
        Expression::String(value) if !value.is_empty() => Some(value.clone()),
        _ => None,
    }
}

fn merge_modules(
    base: &mut IndexMap<String, ModuleManifest>,
    other: IndexMap<String, ModuleManifest>,
) {
    for (name, module) in other {
        match base.get_mut(&name) {
            Some(existing) => merge_module(existing, module),
            None => {
                base.insert(name, module);
            }
        }
    }
}

fn merge_module(base: &mut ModuleManifest, other: ModuleManifest) {
    if other.source.is_some() {
        base.source = other.source;
    }
    if other.version.is_some() {
        base.version = other.version;
    }
    merge_override_blocks(&mut base.overrides, other.overrides);
    merge_modules(&mut base.modules, other.modules);
}

/// Blocks with equal type and labels are merged, others are appended
fn merge_override_blocks(base: &mut Vec<Block>, other: Vec<Block>) {
    for block in other {
        match base.iter_mut().find(|existing| existing.key() == block.key()) {
            Some(existing) => merge_block(existing, block),
            None => base.push(block),
        }
    }
}

/// Attributes of `other` win, nested blocks are merged when their key is unique on both sides
/// and replaced otherwise
fn merge_block(base: &mut Block, other: Block) {
    base.attributes.extend(other.attributes);

    let mut other_blocks: IndexMap<String, Vec<Block>> = IndexMap::new();
    for block in other.blocks {
        other_blocks.entry(block.key()).or_default().push(block);
    }

    for (key, mut blocks) in other_blocks {
        let existing: Vec<usize> = base
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.key() == key)
            .map(|(index, _)| index)
            .collect();

        match (existing.as_slice(), blocks.len()) {
            ([], _) => base.blocks.extend(blocks),
            ([index], 1) => {
                if let Some(block) = blocks.pop() {
                    merge_block(&mut base.blocks[*index], block);
                }
            }
            ([first, ..], _) => {
                let position = *first;
                base.blocks.retain(|block| block.key() != key);
                let position = position.min(base.blocks.len());
                base.blocks.splice(position..position, blocks);
            }
        }
    }
}

fn collect_patched<'a>(
    modules: &'a IndexMap<String, ModuleManifest>,
    parent: Option<&str>,
    patched: &mut BTreeMap<String, &'a ModuleManifest>,
) {
    for (name, module) in modules {
        let key = match parent {
            Some(parent) => format!("{parent}.{name}"),
            None => name.clone(),
        };

        if !module.overrides.is_empty() {
            patched.insert(key.clone(), module);
        }

        collect_patched(&module.modules, Some(&key), patched);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn blocks(input: &str) -> Vec<Block> {
        blocks_from_body(hcl::parse(input).expect("valid hcl"))
    }

    #[test]
    fn parses_overrides_and_modules() {
        let manifest = Manifest::parse(
            r#"
            override {
              resource "azurerm_resource_group" "main" {
                location = "eastus"
              }
              locals {
                prefix = "dev"
              }
            }

            module "network" {
              source = "Azure/network/azurerm"
              version = "5.3.0"

              override {
                resource "azurerm_subnet" "subnet" {
                  name = "x"
                }
              }

              module "nested" {
                override {
                  resource "a" "b" {}
                }
              }
            }

            module "unpatched" {
              source = "./modules/unpatched"
            }
            "#,
        )
        .expect("valid manifest");

        assert_eq!(
            manifest.overrides.iter().map(Block::key).collect::<Vec<_>>(),
            vec!["resource.azurerm_resource_group.main", "locals"]
        );

        let network = &manifest.modules["network"];
        assert_eq!(network.source.as_deref(), Some("Azure/network/azurerm"));
        assert_eq!(network.version.as_deref(), Some("5.3.0"));
        assert_eq!(network.overrides.len(), 1);

        assert_eq!(
            manifest.patched_modules().keys().collect::<Vec<_>>(),
            vec!["network", "network.nested"]
        );
    }

    #[test]
    fn later_manifests_win() {
        let mut manifest = Manifest::parse(
            r#"
            override {
              resource "a" "b" {
                name = "first"
                tags = {}
                rule { name = "one" }
                subnet { name = "s1" }
                subnet { name = "s2" }
              }
            }
            module "network" {
              source = "first"
              version = "1.0.0"
            }
            "#,
        )
        .expect("valid manifest");

        manifest.merge(
            Manifest::parse(
                r#"
                override {
                  resource "a" "b" {
                    name = "second"
                    rule { priority = 1 }
                    subnet { name = "s3" }
                  }
                  resource "a" "c" {}
                }
                module "network" {
                  source = "second"
                  override {
                    resource "x" "y" {}
                  }
                }
                "#,
            )
            .expect("valid manifest"),
        );

        assert_eq!(
            manifest.overrides,
            blocks(
                r#"
                resource "a" "b" {
                  name = "second"
                  tags = {}
                  rule {
                    name = "one"
                    priority = 1
                  }
                  subnet { name = "s3" }
                }
                resource "a" "c" {}
                "#
            )
        );

        let network = &manifest.modules["network"];
        assert_eq!(network.source.as_deref(), Some("second"));
        assert_eq!(network.version.as_deref(), Some("1.0.0"));
        assert_eq!(manifest.patched_modules().len(), 1);
    }

    #[test]
    fn discovers_manifests_in_name_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["b.graft.hcl", "a.graft.hcl", "main.tf", "graft.hcl.bak"] {
            std::fs::write(dir.path().join(name), "").expect("write");
        }

        let paths = Manifest::discover(dir.path()).expect("lists");
        assert_eq!(
            paths,
            vec![dir.path().join("a.graft.hcl"), dir.path().join("b.graft.hcl")]
        );
    }

    #[test]
    fn invalid_manifest_names_the_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.graft.hcl");
        std::fs::write(&path, "override {").expect("write");

        let error = Manifest::load(&path).expect_err("invalid manifest");
        assert!(matches!(&error, Error::Hcl { path: p, .. } if p == &path));
    }
}
