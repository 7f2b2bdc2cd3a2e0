//! aggregated drift of `count` / `for_each` resources
//!
//! All drifted instances of one resource are folded into a single override block. Attribute drift
//! picks the value of the current instance from a lookup table:
//!
//! ```hcl
//! size = lookup({ "0" = "A", "1" = "B" }, count.index, graft.source)
//! ```
//!
//! Block drift becomes a dynamic block that replaces all static blocks of that type:
//!
//! ```hcl
//! dynamic "os_disk" {
//!   for_each = lookup({ "0" = [{ caching = "None" }] }, count.index, [])
//!   content {
//!     caching = os_disk.value.caching
//!   }
//! }
//! ```
use super::plan::{DriftChange, Index};
use super::render::{settable_drift, RESOURCE};
use crate::block::{inherit_token, Block, DYNAMIC};
use crate::schema::{is_computed_only, nested_schema_for, should_render_as_block, SchemaBlock};
use crate::util::sorted_keys;
use crate::value::{is_empty_string, quoted_key, to_expression, Attrs};
use hcl::expr::FuncCall;
use hcl::{Expression, ObjectKey};
use serde_json::Value;
use std::collections::BTreeMap;

const CONTENT: &str = "content";

/// Union of field names across block instances, block-typed fields carry their own shape
#[derive(Debug, Default, Clone, PartialEq)]
struct Shape(BTreeMap<String, Option<Shape>>);

/// Drifted instances of one `count` / `for_each` resource
#[derive(Debug, Clone)]
pub struct IndexedDriftChange {
    changes: Vec<DriftChange>,
}

/// One instance after filtering and diffing
struct Instance<'a> {
    index: &'a Index,
    attrs: Attrs,
    /// Block-typed fields before diffing
    full_blocks: Attrs,
}

impl IndexedDriftChange {
    /// Instances are ordered by their index
    pub fn new(mut changes: Vec<DriftChange>) -> Self {
        changes.sort_by(|a, b| a.index.cmp(&b.index));
        IndexedDriftChange { changes }
    }

    pub fn changes(&self) -> &[DriftChange] {
        &self.changes
    }

    /// Addresses of all aggregated instances
    pub fn addresses(&self) -> Vec<&str> {
        self.changes.iter().map(|c| c.address.as_str()).collect()
    }

    pub fn render(&self, schema: Option<&SchemaBlock>) -> Option<Block> {
        let first = self.changes.first()?;
        let index_ref = first.index.as_ref()?.reference();

        let instances: Vec<_> = self
            .changes
            .iter()
            .filter_map(|change| Instance::new(change, schema))
            .collect();
        if instances.is_empty() {
            return None;
        }

        let mut block = Block::new(
            RESOURCE.to_string(),
            vec![first.resource_type.clone(), first.resource_name.clone()],
        );
        let mut removals = vec![];

        let keys = sorted_keys(instances.iter().flat_map(|instance| instance.attrs.keys()));
        for key in keys {
            if should_render_as_block(schema, key) {
                if let Some(dynamic) = dynamic_block(key, &instances, &index_ref, schema) {
                    block.blocks.push(dynamic);
                    removals.push(key.to_string());
                }
            } else {
                let table = lookup_table(instances.iter().filter_map(|instance| {
                    let value = instance.attrs.get(key)?;
                    Some((instance.index, to_expression(value)))
                }));
                block.set_attribute(key, lookup(table, index_ref.clone(), inherit_token()));
            }
        }

        if !removals.is_empty() {
            removals.sort();
            block.blocks.push(Block::removal_directive(&removals));
        }

        Some(block)
    }
}

impl<'a> Instance<'a> {
    fn new(change: &'a DriftChange, schema: Option<&SchemaBlock>) -> Option<Self> {
        let index = change.index.as_ref()?;

        let full_blocks = super::filter::filter_computed_attrs(&change.changed_attrs, schema)
            .into_iter()
            .filter(|(key, _)| should_render_as_block(schema, key))
            .collect();

        let attrs = settable_drift(change, schema)?;

        Some(Instance {
            index,
            attrs,
            full_blocks,
        })
    }

    /// Complete value of a drifted block-typed field
    fn block_value(&self, key: &str) -> Option<&Value> {
        if !self.attrs.contains_key(key) {
            return None;
        }

        self.full_blocks
            .get(key)
            .or_else(|| self.attrs.get(key))
            .filter(|value| !value.is_null())
    }
}

/// `dynamic "<name>"` block fed by a per-instance lookup table
fn dynamic_block(
    name: &str,
    instances: &[Instance],
    index_ref: &Expression,
    schema: Option<&SchemaBlock>,
) -> Option<Block> {
    let values: Vec<_> = instances
        .iter()
        .filter_map(|instance| Some((instance.index, instance.block_value(name)?)))
        .collect();
    if values.is_empty() {
        return None;
    }

    let nested = nested_schema_for(schema, name);
    let nested = nested.as_deref();

    let shape = build_shape(values.iter().map(|(_, value)| *value), nested);

    let table = lookup_table(
        values
            .iter()
            .map(|(index, value)| (*index, to_expression(&normalize(value, nested, &shape)))),
    );

    let mut block = Block::new(DYNAMIC.to_string(), vec![name.to_string()]);
    block.set_attribute(
        "for_each",
        lookup(table, index_ref.clone(), Expression::Array(vec![])),
    );
    block.blocks.push(content_block(name, &shape, nested));

    Some(block)
}

fn build_shape<'v>(
    values: impl IntoIterator<Item = &'v Value>,
    schema: Option<&SchemaBlock>,
) -> Shape {
    let mut shape = Shape::default();
    let mut nested_values: BTreeMap<&str, Vec<&Value>> = BTreeMap::new();

    for object in values.into_iter().flat_map(objects) {
        for (key, value) in object {
            shape.0.entry(key.clone()).or_insert(None);
            if should_render_as_block(schema, key) && !value.is_null() {
                nested_values.entry(key.as_str()).or_default().push(value);
            }
        }
    }

    for (key, values) in nested_values {
        let nested = nested_schema_for(schema, key);
        shape
            .0
            .insert(key.to_string(), Some(build_shape(values, nested.as_deref())));
    }

    shape
}

/// Block instances of a value, a single object or an array of them
fn objects(value: &Value) -> Vec<&Attrs> {
    match value {
        Value::Object(object) => vec![object],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => vec![],
    }
}

/// Array of block objects that all have exactly the keys of `shape`
///
/// Missing attributes are `null`, missing nested blocks are `[]`.
fn normalize(value: &Value, schema: Option<&SchemaBlock>, shape: &Shape) -> Value {
    let normalize_object = |object: &Attrs| {
        let mut out = Attrs::new();
        for (key, nested_shape) in &shape.0 {
            let field = object
                .get(key)
                .filter(|value| !value.is_null() && !is_empty_string(value));

            let normalized = if should_render_as_block(schema, key) {
                let nested = nested_schema_for(schema, key);
                let empty = Shape::default();
                let nested_shape = nested_shape.as_ref().unwrap_or(&empty);
                field
                    .map(|field| normalize(field, nested.as_deref(), nested_shape))
                    .unwrap_or(Value::Array(vec![]))
            } else {
                field.cloned().unwrap_or(Value::Null)
            };

            out.insert(key.clone(), normalized);
        }
        Value::Object(out)
    };

    match value {
        Value::Object(object) => Value::Array(vec![normalize_object(object)]),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| match item {
                    Value::Object(object) => normalize_object(object),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// `content` block referencing `<name>.value.<field>` for every field of the shape
fn content_block(name: &str, shape: &Shape, schema: Option<&SchemaBlock>) -> Block {
    let mut content = Block::plain(CONTENT);

    for (field, nested_shape) in &shape.0 {
        if schema.is_some() && should_render_as_block(schema, field) {
            content
                .blocks
                .push(nested_dynamic_block(name, field, nested_shape.as_ref(), schema));
        } else {
            content.set_attribute(field.as_str(), iterator_value(name, field));
        }
    }

    content
}

/// Dynamic block inside a `content` block, iterating the field of the parent iterator
///
/// Without a known shape the content falls back to the settable fields of the schema.
fn nested_dynamic_block(
    parent: &str,
    name: &str,
    shape: Option<&Shape>,
    parent_schema: Option<&SchemaBlock>,
) -> Block {
    let nested = nested_schema_for(parent_schema, name);
    let nested = nested.as_deref();

    let for_each = FuncCall::builder("try")
        .arg(iterator_value(parent, name))
        .arg(Expression::Array(vec![]))
        .build();

    let mut block = Block::new(DYNAMIC.to_string(), vec![name.to_string()]);
    block.set_attribute("for_each", for_each);

    let content = match (shape, nested) {
        (Some(shape), _) => content_block(name, shape, nested),
        (None, Some(schema)) => {
            let mut content = Block::plain(CONTENT);
            for field in sorted_keys(schema.attributes.keys()) {
                if !is_computed_only(&schema.attributes[field]) {
                    content.set_attribute(field, iterator_value(name, field));
                }
            }
            for field in sorted_keys(schema.nested_blocks.keys()) {
                content
                    .blocks
                    .push(nested_dynamic_block(name, field, None, Some(schema)));
            }
            content
        }
        (None, None) => Block::plain(CONTENT),
    };
    block.blocks.push(content);

    block
}

/// `<name>.value.<field>`
fn iterator_value(name: &str, field: &str) -> Expression {
    hcl::Traversal::builder(hcl::Variable::unchecked(name))
        .attr("value")
        .attr(field)
        .build()
        .into()
}

/// Object keyed by instance index, keys are always quoted
fn lookup_table<'a>(entries: impl IntoIterator<Item = (&'a Index, Expression)>) -> Expression {
    let mut table: hcl::Object<ObjectKey, Expression> = Default::default();
    for (index, expr) in entries {
        table.insert(quoted_key(&index.key()), expr);
    }
    Expression::Object(table)
}

fn lookup(table: Expression, index_ref: Expression, default: Expression) -> Expression {
    FuncCall::builder("lookup")
        .arg(table)
        .arg(index_ref)
        .arg(default)
        .build()
        .into()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::REMOVAL_DIRECTIVE;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn instance(index: Index, changed: Value, before: Option<Value>) -> DriftChange {
        let as_attrs = |value: Value| value.as_object().cloned().expect("object");
        DriftChange {
            address: format!("azurerm_linux_virtual_machine.vm[{}]", index.key()),
            resource_type: "azurerm_linux_virtual_machine".into(),
            resource_name: "vm".into(),
            index: Some(index),
            changed_attrs: as_attrs(changed),
            before_attrs: before.map(as_attrs),
            ..Default::default()
        }
    }

    fn parse_expr(input: &str) -> Expression {
        hcl::parse(&format!("value = {input}"))
            .expect("valid hcl")
            .into_attributes()
            .next()
            .expect("one attribute")
            .expr
    }

    fn schema() -> SchemaBlock {
        serde_json::from_value(json!({
            "attributes": {
                "size": { "type": "string", "required": true },
                "id": { "type": "string", "computed": true }
            },
            "block_types": {
                "os_disk": {
                    "nesting_mode": "list",
                    "block": {
                        "attributes": {
                            "caching": { "type": "string", "required": true },
                            "disk_size_gb": { "type": "number", "optional": true },
                            "name": { "type": "string", "optional": true, "computed": true }
                        },
                        "block_types": {
                            "encryption": {
                                "nesting_mode": "list",
                                "block": {
                                    "attributes": {
                                        "key": { "type": "string", "optional": true },
                                        "version": { "type": "string", "computed": true }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }))
        .expect("valid schema")
    }

    #[test]
    fn count_attributes_use_lookup() {
        let changes = IndexedDriftChange::new(vec![
            instance(Index::Count(1), json!({ "size": "B" }), None),
            instance(Index::Count(0), json!({ "size": "A" }), None),
        ]);

        let block = changes.render(None).expect("drift");

        assert_eq!(block.labels, vec!["azurerm_linux_virtual_machine", "vm"]);
        assert_eq!(
            block.attributes.get("size"),
            Some(&parse_expr(
                r#"lookup({ "0" = "A", "1" = "B" }, count.index, graft.source)"#
            ))
        );
        assert!(block.blocks.is_empty());
    }

    #[test]
    fn count_ordinals_sort_numerically() {
        let changes = IndexedDriftChange::new(vec![
            instance(Index::Count(10), json!({ "size": "B" }), None),
            instance(Index::Count(2), json!({ "size": "A" }), None),
        ]);

        assert_eq!(
            changes.addresses(),
            vec![
                "azurerm_linux_virtual_machine.vm[2]",
                "azurerm_linux_virtual_machine.vm[10]"
            ]
        );

        let block = changes.render(None).expect("drift");
        let Some(Expression::FuncCall(call)) = block.attributes.get("size") else {
            panic!("expected lookup call");
        };
        let Expression::Object(table) = &call.args[0] else {
            panic!("expected lookup table");
        };

        assert_eq!(
            table.keys().cloned().collect::<Vec<_>>(),
            vec![quoted_key("2"), quoted_key("10")]
        );
    }

    #[test]
    fn for_each_attributes_skip_unchanged_instances() {
        let changes = IndexedDriftChange::new(vec![
            instance(Index::Key("web".into()), json!({ "size": "B", "tags": { "a": "1" } }), None),
            instance(Index::Key("api".into()), json!({ "size": "A" }), None),
        ]);

        let block = changes.render(None).expect("drift");

        assert_eq!(
            block.attributes.get("size"),
            Some(&parse_expr(r#"lookup({ "api" = "A", "web" = "B" }, each.key, graft.source)"#))
        );
        assert_eq!(
            block.attributes.get("tags"),
            Some(&parse_expr(r#"lookup({ "web" = { a = "1" } }, each.key, graft.source)"#))
        );
    }

    #[test]
    fn block_drift_becomes_dynamic_block() {
        let schema = schema();
        let changes = IndexedDriftChange::new(vec![
            instance(
                Index::Count(0),
                json!({ "os_disk": [{ "caching": "None", "name": "d0" }] }),
                Some(json!({ "os_disk": [{ "caching": "ReadWrite", "name": "d0" }] })),
            ),
            instance(
                Index::Count(1),
                json!({ "os_disk": [{ "caching": "None", "disk_size_gb": 64, "name": "d1" }] }),
                Some(json!({ "os_disk": [{ "caching": "ReadWrite", "name": "d1" }] })),
            ),
        ]);

        let block = changes.render(Some(&schema)).expect("drift");

        let dynamic = block.blocks_of_type(DYNAMIC).next().expect("dynamic block");
        assert_eq!(dynamic.labels, vec!["os_disk"]);
        assert_eq!(
            dynamic.attributes.get("for_each"),
            Some(&parse_expr(
                r#"lookup({
                    "0" = [{ caching = "None", disk_size_gb = null, name = "d0" }],
                    "1" = [{ caching = "None", disk_size_gb = 64, name = "d1" }]
                }, count.index, [])"#
            ))
        );

        let content = dynamic.blocks_of_type(CONTENT).next().expect("content");
        assert_eq!(
            content.attributes.get("caching"),
            Some(&parse_expr("os_disk.value.caching"))
        );
        assert_eq!(content.attributes.len(), 3);

        let directive = block.blocks_of_type(REMOVAL_DIRECTIVE).next().expect("directive");
        assert_eq!(directive.removal_paths(), vec!["os_disk"]);
    }

    #[test]
    fn nested_blocks_use_try() {
        let schema = schema();
        let changes = IndexedDriftChange::new(vec![
            instance(
                Index::Count(0),
                json!({ "os_disk": [{ "caching": "None", "encryption": [{ "key": "k0", "version": "1" }] }] }),
                None,
            ),
            instance(Index::Count(1), json!({ "os_disk": [{ "caching": "None" }] }), None),
        ]);

        let block = changes.render(Some(&schema)).expect("drift");
        let dynamic = block.blocks_of_type(DYNAMIC).next().expect("dynamic block");

        assert_eq!(
            dynamic.attributes.get("for_each"),
            Some(&parse_expr(
                r#"lookup({
                    "0" = [{ caching = "None", encryption = [{ key = "k0" }] }],
                    "1" = [{ caching = "None", encryption = [] }]
                }, count.index, [])"#
            ))
        );

        let content = dynamic.blocks_of_type(CONTENT).next().expect("content");
        let nested = content.blocks_of_type(DYNAMIC).next().expect("nested dynamic");
        assert_eq!(nested.labels, vec!["encryption"]);
        assert_eq!(
            nested.attributes.get("for_each"),
            Some(&parse_expr("try(os_disk.value.encryption, [])"))
        );

        let nested_content = nested.blocks_of_type(CONTENT).next().expect("content");
        assert_eq!(
            nested_content.attributes.get("key"),
            Some(&parse_expr("encryption.value.key"))
        );
    }

    #[test]
    fn lookup_tables_share_keys() {
        let schema = schema();
        let changes = IndexedDriftChange::new(vec![
            instance(Index::Count(0), json!({ "os_disk": [{ "caching": "A" }] }), None),
            instance(Index::Count(1), json!({ "os_disk": [{ "disk_size_gb": 1 }] }), None),
        ]);

        let block = changes.render(Some(&schema)).expect("drift");
        let dynamic = block.blocks_of_type(DYNAMIC).next().expect("dynamic block");

        let Some(Expression::FuncCall(call)) = dynamic.attributes.get("for_each") else {
            panic!("expected lookup call");
        };
        let Expression::Object(table) = &call.args[0] else {
            panic!("expected lookup table");
        };

        let key_sets: Vec<Vec<String>> = table
            .values()
            .map(|instances| match instances {
                Expression::Array(items) => match &items[0] {
                    Expression::Object(object) => {
                        object.keys().map(|key| format!("{key:?}")).collect()
                    }
                    _ => panic!("expected object"),
                },
                _ => panic!("expected array"),
            })
            .collect();

        assert_eq!(key_sets.len(), 2);
        assert_eq!(key_sets[0], key_sets[1]);
    }

    #[test]
    fn no_settable_drift_renders_nothing() {
        let schema = schema();
        let changes = IndexedDriftChange::new(vec![
            instance(Index::Count(0), json!({ "id": "a" }), None),
            instance(Index::Count(1), json!({ "id": "b" }), None),
        ]);

        assert_eq!(changes.render(Some(&schema)), None);
    }
}
