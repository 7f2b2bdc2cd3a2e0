//! deep merge of override blocks into source blocks
//!
//! Terraform merges override files shallowly: attributes are merged one by one, but a nested
//! block in an override replaces *all* nested blocks of that type. To change a single attribute
//! of a nested block the override therefore has to repeat the rest of that block, which is what
//! [deep_merge] produces.
use crate::block::{Block, DYNAMIC};
use crate::util::sorted_keys;

/// Nested blocks with their own override semantics, passed through unmerged
pub const META_ARGUMENTS: [&str; 3] = ["lifecycle", "connection", "provisioner"];

const CONTENT: &str = "content";
const ITERATOR: &str = "iterator";

/// Merges `overrides` into `source`
///
/// At the root level only the override's own attributes are kept, Terraform merges those itself.
/// Below the root the merged block carries every source attribute with the override's
/// attributes on top. Every source block of a type the override mentions is merged with the
/// first override block of that type, `dynamic` blocks are merged through their `content`.
/// A `dynamic "<type>"` override is taken as is and replaces all source blocks of `<type>`.
pub fn deep_merge(source: &Block, overrides: Option<&Block>, is_root: bool) -> Block {
    let Some(overrides) = overrides else {
        return source.clone();
    };

    let mut result = Block::new(source.ident.clone(), source.labels.clone());

    if source.ident != DYNAMIC {
        merge_into(&mut result, Some(source), overrides, is_root);
        return result;
    }

    for key in sorted_keys(source.attributes.keys()) {
        result.set_attribute(key, source.attributes[key].clone());
    }
    result
        .blocks
        .extend(source.blocks_of_type(ITERATOR).cloned());

    let mut content = Block::plain(CONTENT);
    merge_into(
        &mut content,
        source.blocks_of_type(CONTENT).next(),
        overrides,
        is_root,
    );
    result.blocks.push(content);

    result
}

fn merge_into(target: &mut Block, source: Option<&Block>, overrides: &Block, is_root: bool) {
    if let Some(source) = source.filter(|_| !is_root) {
        for key in sorted_keys(source.attributes.keys()) {
            target.set_attribute(key, source.attributes[key].clone());
        }
    }

    for key in sorted_keys(overrides.attributes.keys()) {
        target.set_attribute(key, overrides.attributes[key].clone());
    }

    let mut override_types = generated_types(overrides);
    override_types.sort_unstable();

    // the merged block replaces its source entirely, so nested blocks the override does not
    // mention are carried over
    if let Some(source) = source.filter(|_| !is_root) {
        let untouched = source
            .blocks
            .iter()
            .filter(|block| !override_types.contains(&generated_type(block)));
        target.blocks.extend(untouched.cloned());
    }

    for ident in override_types {
        let override_blocks: Vec<&Block> = overrides
            .blocks
            .iter()
            .filter(|block| generated_type(block) == ident)
            .collect();

        if is_root && META_ARGUMENTS.contains(&ident) {
            target.blocks.extend(override_blocks.into_iter().cloned());
            continue;
        }

        let matching: Vec<&Block> = source
            .map(|source| {
                source
                    .blocks_of_type(ident)
                    .chain(source.dynamic_blocks_of_type(ident))
                    .collect()
            })
            .unwrap_or_default();

        // a dynamic override generates every block of its type on its own
        let is_dynamic = override_blocks.iter().any(|block| block.ident == DYNAMIC);

        if matching.is_empty() || is_dynamic {
            target.blocks.extend(override_blocks.into_iter().cloned());
            continue;
        }

        let template = override_blocks.first().copied();
        for block in matching {
            target.blocks.push(deep_merge(block, template, false));
        }
    }
}

/// Type of the blocks `block` produces, `dynamic "<type>"` produces `<type>`
fn generated_type(block: &Block) -> &str {
    if block.ident == DYNAMIC {
        if let Some(label) = block.labels.first() {
            return label;
        }
    }
    &block.ident
}

/// Distinct generated types of the child blocks, in order of first appearance
fn generated_types(block: &Block) -> Vec<&str> {
    let mut types: Vec<&str> = vec![];
    for child in &block.blocks {
        let ident = generated_type(child);
        if !types.contains(&ident) {
            types.push(ident);
        }
    }
    types
}
