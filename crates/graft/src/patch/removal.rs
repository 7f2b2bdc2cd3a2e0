//! removal directives
//!
//! An override block may carry a `_graft { remove = [...] }` block listing what to delete from
//! the matching source block before overrides are merged:
//!
//! - `"self"` deletes the source block itself
//! - `"tags"` deletes the attribute `tags`, or all `tags` blocks including `dynamic "tags"`
//! - `"os_disk.encryption"` does the same for `encryption` inside every `os_disk` block
//!
//! Source files are edited with `hcl_edit` so everything that is not removed keeps its
//! formatting and comments.
use super::sources::source_files;
use crate::block::{Block, DYNAMIC, REMOVAL_DIRECTIVE, REMOVE_SELF};
use crate::error::{Error, Result};
use hcl_edit::structure::{Body, Structure};
use indexmap::IndexMap;
use std::path::Path;

const CONTENT: &str = "content";

/// Removal paths keyed by the key of the source block they apply to
#[derive(Debug, Default, PartialEq)]
pub struct Removals(IndexMap<String, Vec<String>>);

impl Removals {
    /// Detaches the removal directives of all override blocks
    pub fn detach(overrides: &mut [Block]) -> Self {
        let mut removals = IndexMap::new();

        for block in overrides {
            let paths: Vec<String> = block
                .take_blocks_of_type(REMOVAL_DIRECTIVE)
                .iter()
                .flat_map(Block::removal_paths)
                .collect();

            if !paths.is_empty() {
                removals
                    .entry(block.key())
                    .or_insert_with(Vec::new)
                    .extend(paths);
            }
        }

        Removals(removals)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    /// Applies all removals to the source files of `dir`, returns the number of changed files
    ///
    /// Files that can not be read or parsed are skipped.
    pub fn apply(&self, dir: &Path) -> Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }

        let mut changed_files = 0;
        for path in source_files(dir)? {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            let mut body = match hcl_edit::parser::parse_body(&content) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping malformed file");
                    continue;
                }
            };

            if self.apply_to_body(&mut body) {
                tracing::debug!(path = %path.display(), "removals applied");
                std::fs::write(&path, body.to_string()).map_err(Error::write(&path))?;
                changed_files += 1;
            }
        }

        Ok(changed_files)
    }

    /// Returns whether anything was removed
    pub fn apply_to_body(&self, body: &mut Body) -> bool {
        let mut changed = false;
        let mut remove_blocks = vec![];

        for index in 0..body.len() {
            let Some(block) = body.get_mut(index).and_then(Structure::as_block_mut) else {
                continue;
            };
            let Some(paths) = self.get(&edit_block_key(block)) else {
                continue;
            };

            if paths.iter().any(|path| path == REMOVE_SELF) {
                remove_blocks.push(index);
                continue;
            }

            for path in paths {
                changed |= remove_path(&mut block.body, path);
            }
        }

        for index in remove_blocks.into_iter().rev() {
            body.remove(index);
            changed = true;
        }

        changed
    }
}

fn edit_block_key(block: &hcl_edit::structure::Block) -> String {
    std::iter::once(block.ident.as_str())
        .chain(block.labels.iter().map(|label| label.as_str()))
        .collect::<Vec<_>>()
        .join(".")
}

fn is_dynamic_of(block: &hcl_edit::structure::Block, ident: &str) -> bool {
    block.has_ident(DYNAMIC) && block.labels.first().is_some_and(|label| label.as_str() == ident)
}

/// Removes the dotted `path` from `body`, one segment at a time
fn remove_path(body: &mut Body, path: &str) -> bool {
    let Some((ident, rest)) = path.split_once('.') else {
        if body.remove_attribute(path).is_some() {
            return true;
        }

        let indices: Vec<usize> = body
            .iter()
            .enumerate()
            .filter(|(_, structure)| {
                structure
                    .as_block()
                    .is_some_and(|block| block.has_ident(path) || is_dynamic_of(block, path))
            })
            .map(|(index, _)| index)
            .collect();

        for index in indices.iter().rev() {
            body.remove(*index);
        }
        return !indices.is_empty();
    };

    let mut changed = false;
    for block in body.blocks_mut() {
        if block.has_ident(ident) {
            changed |= remove_path(&mut block.body, rest);
        } else if is_dynamic_of(block, ident) {
            for content in block.body.get_blocks_mut(CONTENT) {
                changed |= remove_path(&mut content.body, rest);
            }
        }
    }
    changed
}
