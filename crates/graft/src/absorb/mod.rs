//! drift absorption
//!
//! Turns the drift reported by a plan into a manifest of overrides that make the configuration
//! match the remote state again.
//!
//! 1. [plan] extracts one [DriftChange] per drifted resource instance
//! 2. [filter] and [diff] narrow the drift down to settable, actually changed fields
//! 3. [render] (or [indexed] for `count` / `for_each` resources) turns it into override blocks
//! 4. [module_tree] arranges the blocks by module and writes the manifest
use crate::error::Result;
use crate::schema::ProviderSchemas;
use indexmap::IndexMap;
use module_tree::{AbsorbedBlock, ModuleNode};
use std::path::Path;

pub mod diff;
pub mod filter;
pub mod indexed;
pub mod module_tree;
pub mod plan;
pub mod render;

pub use indexed::IndexedDriftChange;
pub use plan::{DriftChange, Index};

/// Manifest absorbing all drift of the plan at `plan_path`, `None` if nothing drifted
pub fn absorb(plan_path: &Path, schemas: Option<&ProviderSchemas>) -> Result<Option<String>> {
    let changes = plan::parse_plan_file(plan_path)?;
    tracing::debug!(drifted = changes.len(), "parsed plan");

    if changes.is_empty() {
        return Ok(None);
    }

    let tree = build_tree(&changes, schemas);
    if tree.is_empty() {
        return Ok(None);
    }

    tree.to_hcl().map(Some)
}

/// Renders every change and arranges the resulting blocks by module
///
/// Indexed instances of the same resource are rendered together.
pub fn build_tree(changes: &[DriftChange], schemas: Option<&ProviderSchemas>) -> ModuleNode {
    let mut root = ModuleNode::root();

    let mut indexed: IndexMap<(Vec<String>, String), Vec<DriftChange>> = IndexMap::new();
    for change in changes {
        if change.is_indexed() {
            indexed
                .entry((change.module_path.clone(), change.resource_key()))
                .or_default()
                .push(change.clone());
            continue;
        }

        let schema = resource_schema(change, schemas);
        match render::render(change, schema) {
            Some(block) => root.insert(
                &change.module_path,
                AbsorbedBlock {
                    addresses: vec![change.address.clone()],
                    block,
                },
            ),
            None => tracing::debug!(address = %change.address, "no settable drift"),
        }
    }

    for ((module_path, resource_key), instances) in indexed {
        let group = IndexedDriftChange::new(instances);
        let Some(first) = group.changes().first() else {
            continue;
        };

        let schema = resource_schema(first, schemas);
        match group.render(schema) {
            Some(block) => {
                let addresses = group.addresses().into_iter().map(String::from).collect();
                root.insert(&module_path, AbsorbedBlock { addresses, block });
            }
            None => tracing::debug!(resource = %resource_key, "no settable drift"),
        }
    }

    root
}

fn resource_schema<'a>(
    change: &DriftChange,
    schemas: Option<&'a ProviderSchemas>,
) -> Option<&'a crate::schema::SchemaBlock> {
    let schema = schemas?.resource(&change.provider_name, &change.resource_type);
    if schema.is_none() {
        tracing::warn!(
            provider = %change.provider_name,
            resource_type = %change.resource_type,
            "no schema, rendering without block detection"
        );
    }
    schema
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn change(
        address: &str,
        module_path: &[&str],
        index: Option<Index>,
        size: &str,
    ) -> DriftChange {
        let (resource_type, resource_name) = ("azurerm_linux_virtual_machine", "vm");
        DriftChange {
            address: address.into(),
            module_path: module_path.iter().map(|m| m.to_string()).collect(),
            resource_type: resource_type.into(),
            resource_name: resource_name.into(),
            index,
            changed_attrs: json!({ "size": size }).as_object().cloned().expect("object"),
            ..Default::default()
        }
    }

    #[test]
    fn indexed_instances_are_grouped_per_module() {
        let changes = vec![
            change("module.a.x.vm[0]", &["a"], Some(Index::Count(0)), "A"),
            change("module.b.x.vm[0]", &["b"], Some(Index::Count(0)), "B"),
            change("module.a.x.vm[1]", &["a"], Some(Index::Count(1)), "C"),
            change("x.vm", &[], None, "D"),
        ];

        let tree = build_tree(&changes, None);

        assert_eq!(tree.blocks.len(), 1);
        assert_eq!(tree.blocks[0].addresses, vec!["x.vm"]);

        let a = &tree.children["a"].blocks;
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].addresses, vec!["module.a.x.vm[0]", "module.a.x.vm[1]"]);

        let b = &tree.children["b"].blocks;
        assert_eq!(b.len(), 1);
        assert!(matches!(
            b[0].block.attributes.get("size"),
            Some(hcl::Expression::FuncCall(_))
        ));
    }

    #[test]
    fn for_each_module_instances_write_valid_module_blocks() {
        let changes = plan::parse_plan(
            &json!({
                "resource_changes": [{
                    "address": "module.b[\"x.y\"].azurerm_resource_group.main",
                    "module_address": "module.b[\"x.y\"]",
                    "mode": "managed",
                    "type": "azurerm_resource_group",
                    "name": "main",
                    "change": {
                        "actions": ["update"],
                        "before": { "location": "westus" },
                        "after": { "location": "eastus" }
                    }
                }]
            })
            .to_string(),
        )
        .expect("valid plan");

        let document = build_tree(&changes, None).to_hcl().expect("formats");
        assert!(document.contains("module \"b\" {"));

        let manifest = crate::manifest::Manifest::parse(&document).expect("valid manifest");
        assert_eq!(manifest.modules["b"].overrides.len(), 1);
    }

    #[test]
    fn unchanged_resources_are_left_out() {
        let mut unchanged = change("x.vm", &[], None, "D");
        unchanged.before_attrs = Some(unchanged.changed_attrs.clone());

        let schemas = ProviderSchemas::from_json(
            &json!({
                "provider_schemas": {
                    "": {
                        "resource_schemas": {
                            "azurerm_linux_virtual_machine": {
                                "block": { "attributes": { "size": { "type": "string", "optional": true } } }
                            }
                        }
                    }
                }
            })
            .to_string(),
        )
        .expect("valid schemas");

        let tree = build_tree(&[unchanged], Some(&schemas));
        assert!(tree.blocks.is_empty());
        assert!(tree.children.is_empty());
    }
}
