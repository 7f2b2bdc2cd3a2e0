//! provider schema navigation
//!
//! A [SchemaBlock] describes one resource type (or one nested block of it) as found in the output
//! of `terraform providers schema -json`. Each field of a block is either
//! - declared as a nested block (`block_types`)
//! - an attribute with a nested type (`nested_type`, protocol 6 providers)
//! - an attribute whose type is a list/set of objects (legacy "attributes as blocks")
//! - or a plain attribute
//!
//! The first three are rendered as blocks, see [should_render_as_block].
use crate::error::{Error, Result};
use serde::Deserialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

/// Field name that the legacy object schema treats as computed
const LEGACY_COMPUTED_FIELD: &str = "id";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SchemaBlock {
    #[serde(default)]
    pub attributes: BTreeMap<String, SchemaAttribute>,
    #[serde(default, rename = "block_types")]
    pub nested_blocks: BTreeMap<String, SchemaBlockType>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SchemaAttribute {
    #[serde(default, rename = "type")]
    pub attribute_type: Option<CtyType>,
    #[serde(default)]
    pub nested_type: Option<NestedType>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub computed: bool,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct NestedType {
    #[serde(default)]
    pub attributes: BTreeMap<String, SchemaAttribute>,
    #[serde(default)]
    pub nesting_mode: NestingMode,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct SchemaBlockType {
    #[serde(default)]
    pub nesting_mode: NestingMode,
    #[serde(default)]
    pub block: SchemaBlock,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NestingMode {
    #[default]
    Single,
    Group,
    List,
    Set,
    Map,
}

impl NestingMode {
    pub fn is_replicated(self) -> bool {
        matches!(self, NestingMode::List | NestingMode::Set)
    }
}

/// Attribute value type in its JSON encoding (`"string"`, `["list", "string"]`, ...)
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(try_from = "serde_json::Value")]
pub enum CtyType {
    Primitive(String),
    Dynamic,
    List(Box<CtyType>),
    Set(Box<CtyType>),
    Map(Box<CtyType>),
    Object(BTreeMap<String, CtyType>),
    Tuple(Vec<CtyType>),
}

impl CtyType {
    /// Object fields of a `list(object)` or `set(object)` type
    pub fn collection_of_object(&self) -> Option<&BTreeMap<String, CtyType>> {
        match self {
            CtyType::List(element) | CtyType::Set(element) => match element.as_ref() {
                CtyType::Object(fields) => Some(fields),
                _ => None,
            },
            _ => None,
        }
    }
}

impl TryFrom<serde_json::Value> for CtyType {
    type Error = String;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;

        match value {
            Value::String(s) if s == "dynamic" => Ok(CtyType::Dynamic),
            Value::String(s) => Ok(CtyType::Primitive(s)),
            Value::Array(mut parts) if !parts.is_empty() => {
                let kind = parts.remove(0);
                let kind = kind.as_str().ok_or("type kind must be a string")?;
                let mut args = parts.into_iter();
                let mut arg = || args.next().ok_or(format!("{kind} type is missing its argument"));

                match kind {
                    "list" => Ok(CtyType::List(Box::new(arg()?.try_into()?))),
                    "set" => Ok(CtyType::Set(Box::new(arg()?.try_into()?))),
                    "map" => Ok(CtyType::Map(Box::new(arg()?.try_into()?))),
                    "object" => {
                        let Value::Object(fields) = arg()? else {
                            return Err("object type expects a map of fields".to_string());
                        };
                        fields
                            .into_iter()
                            .map(|(name, ty)| CtyType::try_from(ty).map(|ty| (name, ty)))
                            .collect::<Result<BTreeMap<_, _>, String>>()
                            .map(CtyType::Object)
                    }
                    "tuple" => {
                        let Value::Array(elements) = arg()? else {
                            return Err("tuple type expects a list of elements".to_string());
                        };
                        elements
                            .into_iter()
                            .map(CtyType::try_from)
                            .collect::<Result<Vec<_>, String>>()
                            .map(CtyType::Tuple)
                    }
                    other => Err(format!("unknown type kind {other}")),
                }
            }
            other => Err(format!("invalid type {other}")),
        }
    }
}

/// `terraform providers schema -json` document
#[derive(Deserialize, Debug, Default)]
pub struct ProviderSchemas {
    #[serde(default)]
    provider_schemas: BTreeMap<String, ProviderSchema>,
}

#[derive(Deserialize, Debug, Default)]
struct ProviderSchema {
    #[serde(default)]
    resource_schemas: BTreeMap<String, ResourceSchema>,
}

#[derive(Deserialize, Debug, Default)]
struct ResourceSchema {
    #[serde(default)]
    block: SchemaBlock,
}

impl ProviderSchemas {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(Error::read(path))?;
        Self::from_json(&content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Schema of a resource type as published by the given provider
    pub fn resource(&self, provider: &str, resource_type: &str) -> Option<&SchemaBlock> {
        self.provider_schemas
            .get(provider)?
            .resource_schemas
            .get(resource_type)
            .map(|resource| &resource.block)
    }
}

/// Whether `name` is rendered as nested block(s) instead of an attribute assignment
pub fn should_render_as_block(schema: Option<&SchemaBlock>, name: &str) -> bool {
    let Some(schema) = schema else {
        return false;
    };

    if schema.nested_blocks.contains_key(name) {
        return true;
    }

    let Some(attribute) = schema.attributes.get(name) else {
        return false;
    };

    if let Some(nested_type) = &attribute.nested_type {
        return nested_type.nesting_mode.is_replicated();
    }

    attribute
        .attribute_type
        .as_ref()
        .is_some_and(|ty| ty.collection_of_object().is_some())
}

/// Schema of the block-like field `name`
pub fn nested_schema_for<'a>(
    schema: Option<&'a SchemaBlock>,
    name: &str,
) -> Option<Cow<'a, SchemaBlock>> {
    let schema = schema?;

    if let Some(block_type) = schema.nested_blocks.get(name) {
        return Some(Cow::Borrowed(&block_type.block));
    }

    let attribute = schema.attributes.get(name)?;

    if let Some(nested_type) = &attribute.nested_type {
        return Some(Cow::Owned(SchemaBlock {
            attributes: nested_type.attributes.clone(),
            nested_blocks: Default::default(),
        }));
    }

    attribute
        .attribute_type
        .as_ref()?
        .collection_of_object()
        .map(|fields| Cow::Owned(legacy_object_schema(fields)))
}

/// Schema for a list/set of objects that the provider describes only by its value type
///
/// The type carries no computed/optional flags, so every field is assumed optional except `id`
/// which is assumed computed. Other computed fields of such objects are not detected.
pub fn legacy_object_schema(fields: &BTreeMap<String, CtyType>) -> SchemaBlock {
    let attributes = fields
        .iter()
        .map(|(name, ty)| {
            let computed = name == LEGACY_COMPUTED_FIELD;
            let attribute = SchemaAttribute {
                attribute_type: Some(ty.clone()),
                nested_type: None,
                required: false,
                optional: !computed,
                computed,
            };
            (name.clone(), attribute)
        })
        .collect();

    SchemaBlock {
        attributes,
        nested_blocks: Default::default(),
    }
}

/// Computed but neither optional nor required, so it can not be set in configuration
pub fn is_computed_only(attribute: &SchemaAttribute) -> bool {
    attribute.computed && !attribute.optional && !attribute.required
}

/// [is_computed_only] for a field addressed by its path of field names from `schema`
pub fn is_path_computed_only(schema: &SchemaBlock, path: &[&str]) -> bool {
    match path {
        [] => false,
        [leaf] => schema.attributes.get(*leaf).is_some_and(is_computed_only),
        [segment, rest @ ..] => nested_schema_for(Some(schema), segment)
            .is_some_and(|nested| is_path_computed_only(&nested, rest)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> SchemaBlock {
        serde_json::from_value(json!({
            "attributes": {
                "name": { "type": "string", "required": true },
                "guid": { "type": "string", "computed": true },
                "location": { "type": "string", "optional": true, "computed": true },
                "tags": { "type": ["map", "string"], "optional": true },
                "security_rule": {
                    "type": ["set", ["object", { "id": "string", "name": "string", "priority": "number" }]],
                    "optional": true,
                    "computed": true
                },
                "endpoint": {
                    "nested_type": {
                        "nesting_mode": "list",
                        "attributes": {
                            "host": { "type": "string", "optional": true },
                            "fqdn": { "type": "string", "computed": true }
                        }
                    },
                    "optional": true
                },
                "settings": {
                    "nested_type": {
                        "nesting_mode": "single",
                        "attributes": { "mode": { "type": "string", "optional": true } }
                    },
                    "optional": true
                }
            },
            "block_types": {
                "subnet": {
                    "nesting_mode": "list",
                    "block": {
                        "attributes": {
                            "name": { "type": "string", "required": true },
                            "id": { "type": "string", "computed": true }
                        }
                    }
                }
            }
        }))
        .expect("valid schema")
    }

    #[test]
    fn renders_as_block() {
        let schema = schema();
        let schema = Some(&schema);

        assert!(should_render_as_block(schema, "subnet"));
        assert!(should_render_as_block(schema, "endpoint"));
        assert!(should_render_as_block(schema, "security_rule"));

        assert!(!should_render_as_block(schema, "settings"));
        assert!(!should_render_as_block(schema, "tags"));
        assert!(!should_render_as_block(schema, "name"));
        assert!(!should_render_as_block(schema, "unknown"));
    }

    #[test]
    fn no_schema_renders_nothing_as_block() {
        assert!(!should_render_as_block(None, "subnet"));
        assert!(nested_schema_for(None, "subnet").is_none());
    }

    #[test]
    fn nested_schema_of_all_representations() {
        let schema = schema();

        let subnet = nested_schema_for(Some(&schema), "subnet").expect("block type");
        assert!(matches!(subnet, Cow::Borrowed(_)));
        assert!(subnet.attributes.contains_key("name"));

        let endpoint = nested_schema_for(Some(&schema), "endpoint").expect("nested type");
        assert!(endpoint.attributes.contains_key("host"));

        let rule = nested_schema_for(Some(&schema), "security_rule").expect("legacy type");
        let names: Vec<_> = rule.attributes.keys().cloned().collect();
        assert_eq!(names, vec!["id", "name", "priority"]);

        assert!(nested_schema_for(Some(&schema), "tags").is_none());
    }

    #[test]
    fn legacy_schema_only_computes_id() {
        let schema = schema();
        let rule = nested_schema_for(Some(&schema), "security_rule").expect("legacy type");

        assert!(is_computed_only(&rule.attributes["id"]));
        assert!(!is_computed_only(&rule.attributes["name"]));
        assert!(!is_computed_only(&rule.attributes["priority"]));
    }

    #[test]
    fn computed_only() {
        let schema = schema();

        assert!(is_computed_only(&schema.attributes["guid"]));
        assert!(!is_computed_only(&schema.attributes["location"]));
        assert!(!is_computed_only(&schema.attributes["name"]));
    }

    #[test]
    fn computed_only_paths() {
        let schema = schema();

        assert!(is_path_computed_only(&schema, &["guid"]));
        assert!(is_path_computed_only(&schema, &["subnet", "id"]));
        assert!(is_path_computed_only(&schema, &["endpoint", "fqdn"]));
        assert!(is_path_computed_only(&schema, &["security_rule", "id"]));

        assert!(!is_path_computed_only(&schema, &[]));
        assert!(!is_path_computed_only(&schema, &["subnet"]));
        assert!(!is_path_computed_only(&schema, &["subnet", "name"]));
        assert!(!is_path_computed_only(&schema, &["unknown", "id"]));
    }

    #[test]
    fn cty_types() {
        let ty: CtyType = serde_json::from_value(json!(["list", ["object", { "a": "string" }]]))
            .expect("valid type");

        let fields = ty.collection_of_object().expect("list of object");
        assert_eq!(fields["a"], CtyType::Primitive("string".into()));

        let ty: CtyType = serde_json::from_value(json!(["tuple", ["string", "dynamic"]]))
            .expect("valid type");
        assert_eq!(
            ty,
            CtyType::Tuple(vec![CtyType::Primitive("string".into()), CtyType::Dynamic])
        );

        assert!(serde_json::from_value::<CtyType>(json!(["list"])).is_err());
    }

    #[test]
    fn resource_lookup() {
        let schemas = ProviderSchemas::from_json(
            r#"{
                "format_version": "1.0",
                "provider_schemas": {
                    "registry.terraform.io/hashicorp/azurerm": {
                        "resource_schemas": {
                            "azurerm_resource_group": {
                                "version": 0,
                                "block": { "attributes": { "name": { "type": "string", "required": true } } }
                            }
                        }
                    }
                }
            }"#,
        )
        .expect("valid schema document");

        let block = schemas
            .resource("registry.terraform.io/hashicorp/azurerm", "azurerm_resource_group")
            .expect("known resource");
        assert!(block.attributes.contains_key("name"));

        assert!(schemas
            .resource("registry.terraform.io/hashicorp/azurerm", "azurerm_subnet")
            .is_none());
    }
}
