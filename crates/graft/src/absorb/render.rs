//! rendering of a single drifted resource
use super::diff::diff_minimal;
use super::filter::filter_computed_attrs;
use super::plan::DriftChange;
use crate::block::Block;
use crate::schema::{nested_schema_for, should_render_as_block, SchemaBlock};
use crate::util::sorted_keys;
use crate::value::{is_empty_string, to_expression, Attrs};
use serde_json::Value;

pub(crate) const RESOURCE: &str = "resource";

/// Override block absorbing the drift of one resource instance
///
/// `None` when nothing settable drifted.
pub fn render(change: &DriftChange, schema: Option<&SchemaBlock>) -> Option<Block> {
    let attrs = settable_drift(change, schema)?;

    let mut block = Block::new(
        RESOURCE.to_string(),
        vec![change.resource_type.clone(), change.resource_name.clone()],
    );
    let mut removals = vec![];

    for key in sorted_keys(attrs.keys()) {
        let value = &attrs[key];

        if !should_render_as_block(schema, key) {
            block.set_attribute(key, to_expression(value));
            continue;
        }

        let blocks = to_blocks(key, value, schema);
        match blocks.as_slice() {
            [] => {}
            [single] => removals.extend(nested_removals(key, single)),
            _ => removals.push(key.to_string()),
        }
        block.blocks.extend(blocks);
    }

    if !removals.is_empty() {
        removals.sort();
        block.blocks.push(Block::removal_directive(&removals));
    }

    Some(block)
}

/// Changed attributes after dropping computed fields and narrowing to the minimal diff
pub(crate) fn settable_drift(change: &DriftChange, schema: Option<&SchemaBlock>) -> Option<Attrs> {
    let attrs = filter_computed_attrs(&change.changed_attrs, schema);
    if attrs.is_empty() {
        return None;
    }

    let attrs = match (&change.before_attrs, schema) {
        (Some(before), Some(schema)) => diff_minimal(before, &attrs, schema),
        _ => attrs,
    };

    (!attrs.is_empty()).then_some(attrs)
}

/// One block per instance of a block-like value
///
/// Nulls are skipped, as are empty strings since they usually stand for "unset".
pub(crate) fn to_blocks(name: &str, value: &Value, schema: Option<&SchemaBlock>) -> Vec<Block> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter(|item| item.is_object())
            .flat_map(|item| to_blocks(name, item, schema))
            .collect(),
        Value::Object(object) => {
            let nested = nested_schema_for(schema, name);
            let nested = nested.as_deref();

            let mut block = Block::plain(name);
            for key in sorted_keys(object.keys()) {
                let value = &object[key];
                if value.is_null() || is_empty_string(value) {
                    continue;
                }

                if nested.is_some() && should_render_as_block(nested, key) {
                    block.blocks.extend(to_blocks(key, value, nested));
                } else {
                    block.set_attribute(key, to_expression(value));
                }
            }
            vec![block]
        }
        _ => vec![],
    }
}

/// Dotted paths of nested block types that occur more than once below `block`
fn nested_removals(prefix: &str, block: &Block) -> Vec<String> {
    let mut removals = vec![];

    for ident in block.block_types() {
        let path = format!("{prefix}.{ident}");
        let mut instances = block.blocks_of_type(ident);

        match (instances.next(), instances.next()) {
            (Some(_), Some(_)) => removals.push(path),
            (Some(single), None) => removals.extend(nested_removals(&path, single)),
            _ => {}
        }
    }

    removals
}
