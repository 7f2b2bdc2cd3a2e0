//! applying overrides to module sources
//!
//! For every patched module (and the root module) overrides are applied in four steps:
//!
//! 1. [removal] deletes what the `_graft` directives of the overrides ask for from the source
//! 2. [sources] collects the remaining blocks and locals of the module
//! 3. [inherit] resolves `graft.source` against them
//! 4. [merge] completes overrides of existing blocks, which end up in [OVERRIDE_FILE], while
//!    blocks that do not exist yet end up in [ADD_FILE]
use crate::block::{self, Block};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use removal::Removals;
use sources::{ModuleSources, LOCALS};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub mod inherit;
pub mod merge;
pub mod removal;
pub mod sources;

/// Overrides of existing blocks, picked up by Terraform's override file mechanism
pub const OVERRIDE_FILE: &str = "_graft_override.tf";
/// Blocks and locals that do not exist in the module source
pub const ADD_FILE: &str = "_graft_add.tf";

/// Summary of one patched module
#[derive(Debug, Default, PartialEq)]
pub struct PatchReport {
    pub overrides: usize,
    pub removed_from: usize,
    pub files: Vec<PathBuf>,
}

/// Applies root overrides to `root_dir` and module overrides to their vendored copies
///
/// Returns a report per module key, the root module has the key `""`. Modules that are not
/// vendored are skipped.
pub fn apply_patches(
    manifest: &Manifest,
    root_dir: &Path,
    vendored: &BTreeMap<String, PathBuf>,
) -> Result<BTreeMap<String, PatchReport>> {
    let mut reports = BTreeMap::new();

    if !manifest.overrides.is_empty() {
        let report = apply_overrides(root_dir, manifest.overrides.clone()).map_err(|e| {
            Error::Patch {
                module: "root".to_string(),
                source: Box::new(e),
            }
        })?;
        reports.insert(String::new(), report);
    }

    for (key, module) in manifest.patched_modules() {
        let Some(dir) = vendored.get(&key) else {
            tracing::warn!(module = %key, "module is not vendored, skipping overrides");
            continue;
        };

        let report = apply_overrides(dir, module.overrides.clone()).map_err(|e| Error::Patch {
            module: key.clone(),
            source: Box::new(e),
        })?;
        tracing::debug!(module = %key, dir = %dir.display(), "patched module");
        reports.insert(key, report);
    }

    Ok(reports)
}

/// Applies `overrides` to the module in `dir`
pub fn apply_overrides(dir: &Path, mut overrides: Vec<Block>) -> Result<PatchReport> {
    let removals = Removals::detach(&mut overrides);
    let removed_from = removals.apply(dir)?;

    let sources = ModuleSources::load(dir)?;
    inherit::resolve_inherit_tokens(&mut overrides, &sources);

    let mut files = vec![];
    let override_file = dir.join(OVERRIDE_FILE);
    if write_blocks(&override_file, override_blocks(&overrides, &sources))? {
        files.push(override_file);
    }
    let add_file = dir.join(ADD_FILE);
    if write_blocks(&add_file, add_blocks(&overrides, &sources))? {
        files.push(add_file);
    }

    Ok(PatchReport {
        overrides: overrides.len(),
        removed_from,
        files,
    })
}

/// Overrides of blocks and locals that exist in the module source
pub fn override_blocks(overrides: &[Block], sources: &ModuleSources) -> Vec<Block> {
    let mut blocks = vec![];

    for block in overrides {
        if block.ident == LOCALS {
            blocks.extend(locals_block(block, |name| sources.locals.contains_key(name)));
            continue;
        }

        let Some(existing) = sources.block(&block.key()) else {
            continue;
        };
        if block.is_empty() {
            continue;
        }

        if block.blocks.is_empty() {
            blocks.push(block.clone());
        } else {
            blocks.push(merge::deep_merge(existing, Some(block), true));
        }
    }

    blocks
}

/// Overrides of blocks and locals that do not exist in the module source
pub fn add_blocks(overrides: &[Block], sources: &ModuleSources) -> Vec<Block> {
    let mut blocks = vec![];

    for block in overrides {
        if block.ident == LOCALS {
            blocks.extend(locals_block(block, |name| !sources.locals.contains_key(name)));
            continue;
        }

        if sources.block(&block.key()).is_none() && !block.is_empty() {
            blocks.push(block.clone());
        }
    }

    blocks
}

/// `locals` block with the entries of `block` that pass `filter`, `None` if there are none
fn locals_block(block: &Block, filter: impl Fn(&str) -> bool) -> Option<Block> {
    let mut locals = Block::plain(LOCALS);
    for (name, expr) in &block.attributes {
        if filter(name) {
            locals.set_attribute(name.as_str(), expr.clone());
        }
    }
    (!locals.is_empty()).then_some(locals)
}

/// Writes `blocks` to `path`, an empty list removes a stale file instead
///
/// Returns whether the file was written.
fn write_blocks(path: &Path, blocks: Vec<Block>) -> Result<bool> {
    if blocks.is_empty() {
        if path.exists() {
            std::fs::remove_file(path).map_err(Error::write(path))?;
        }
        return Ok(false);
    }

    let content = block::format(blocks)?;
    std::fs::write(path, content).map_err(Error::write(path))?;
    Ok(true)
}
