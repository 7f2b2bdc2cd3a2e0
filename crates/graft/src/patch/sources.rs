//! existing configuration of a module directory
use crate::block::{blocks_from_body, Block};
use crate::error::{Error, Result};
use hcl::Expression;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Files written by graft start with this prefix and are never treated as module source
pub const GENERATED_PREFIX: &str = "_graft_";
pub const LOCALS: &str = "locals";

/// Root blocks and locals of all source files of a module
///
/// Blocks are keyed by [Block::key], a later file wins on duplicate keys.
#[derive(Default, Debug)]
pub struct ModuleSources {
    pub blocks: IndexMap<String, Block>,
    pub locals: IndexMap<String, Expression>,
}

impl ModuleSources {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut sources = ModuleSources::default();

        for path in source_files(dir)? {
            let Some(body) = parse_file(&path) else {
                continue;
            };

            for block in blocks_from_body(body) {
                if block.ident == LOCALS {
                    sources.locals.extend(block.attributes.clone());
                }
                sources.blocks.insert(block.key(), block);
            }
        }

        tracing::debug!(
            dir = %dir.display(),
            blocks = sources.blocks.len(),
            locals = sources.locals.len(),
            "loaded module sources"
        );
        Ok(sources)
    }

    pub fn block(&self, key: &str) -> Option<&Block> {
        self.blocks.get(key)
    }
}

/// `*.tf` files of `dir` that are not generated by graft, sorted by name
pub fn source_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = vec![];

    for dir_entry in std::fs::read_dir(dir).map_err(Error::read(dir))? {
        let dir_entry = dir_entry.map_err(Error::read(dir))?;
        if !dir_entry.file_type().map_err(Error::read(dir))?.is_file() {
            continue;
        }

        let file_name = dir_entry.file_name();
        let file_name = file_name.to_string_lossy();
        if !file_name.ends_with(".tf") || file_name.starts_with(GENERATED_PREFIX) {
            continue;
        }

        files.push(dir_entry.path());
    }

    files.sort();
    Ok(files)
}

/// Parsed file, `None` (with a warning) if it can not be read or parsed
fn parse_file(path: &Path) -> Option<hcl::Body> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
            return None;
        }
    };

    match hcl::parse(&content) {
        Ok(body) => Some(body),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skipping malformed file");
            None
        }
    }
}
