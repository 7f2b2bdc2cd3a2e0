//! override block model
//!
//! [Block] is the owned, order-preserving representation of an HCL block that both pipelines
//! work on. Absorb renders blocks from plan values, the build path reads them from manifests and
//! vendored sources, merges them and writes them back out.
use crate::error::{Error, Result};
use hcl::{BlockLabel, Expression, Identifier, Structure};
use indexmap::IndexMap;

/// Block type of the removal directive
pub const REMOVAL_DIRECTIVE: &str = "_graft";
/// Attribute of the removal directive listing paths to remove
pub const REMOVE_ATTRIBUTE: &str = "remove";
/// Removal path that removes the whole block
pub const REMOVE_SELF: &str = "self";

pub const DYNAMIC: &str = "dynamic";

/// `graft.source`, stands for the original value of the overridden attribute
pub const INHERIT_TOKEN: [&str; 2] = ["graft", "source"];

pub fn inherit_token() -> Expression {
    let [root, attr] = INHERIT_TOKEN;
    hcl::Traversal::builder(hcl::Variable::unchecked(root))
        .attr(attr)
        .build()
        .into()
}

#[derive(derive_new::new, Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub ident: String,
    pub labels: Vec<String>,
    #[new(default)]
    pub attributes: IndexMap<String, Expression>,
    #[new(default)]
    pub blocks: Vec<Block>,
}

impl Block {
    /// Block without labels
    pub fn plain(ident: impl Into<String>) -> Self {
        Block::new(ident.into(), vec![])
    }

    /// `type.label1.label2`, identifies a block within one body
    pub fn key(&self) -> String {
        std::iter::once(self.ident.as_str())
            .chain(self.labels.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(".")
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && self.blocks.is_empty()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, expr: impl Into<Expression>) {
        self.attributes.insert(key.into(), expr.into());
    }

    pub fn blocks_of_type<'a>(&'a self, ident: &'a str) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks.iter().filter(move |block| block.ident == ident)
    }

    /// `dynamic "<ident>"` blocks generating blocks of type `ident`
    pub fn dynamic_blocks_of_type<'a>(
        &'a self,
        ident: &'a str,
    ) -> impl Iterator<Item = &'a Block> + 'a {
        self.blocks
            .iter()
            .filter(move |block| block.is_dynamic_of(ident))
    }

    pub fn is_dynamic_of(&self, ident: &str) -> bool {
        self.ident == DYNAMIC && self.labels.first().is_some_and(|label| label == ident)
    }

    /// Distinct child block types, in order of first appearance
    pub fn block_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = vec![];
        for block in &self.blocks {
            if !types.contains(&block.ident.as_str()) {
                types.push(&block.ident);
            }
        }
        types
    }

    /// Detaches all child blocks of type `ident`
    pub fn take_blocks_of_type(&mut self, ident: &str) -> Vec<Block> {
        let (taken, kept) = std::mem::take(&mut self.blocks)
            .into_iter()
            .partition(|block| block.ident == ident);
        self.blocks = kept;
        taken
    }

    /// Child block with the same type and labels as `pattern`
    pub fn find_matching(&self, pattern: &Block) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|block| block.ident == pattern.ident && block.labels == pattern.labels)
    }

    /// `_graft { remove = [...] }`
    pub fn removal_directive(paths: &[String]) -> Block {
        let mut directive = Block::plain(REMOVAL_DIRECTIVE);
        directive.set_attribute(
            REMOVE_ATTRIBUTE,
            Expression::Array(paths.iter().cloned().map(Expression::String).collect()),
        );
        directive
    }

    /// Paths listed in a removal directive, anything that is not a string literal is ignored
    pub fn removal_paths(&self) -> Vec<String> {
        match self.attributes.get(REMOVE_ATTRIBUTE) {
            Some(Expression::Array(items)) => items
                .iter()
                .filter_map(|item| match item {
                    Expression::String(path) => Some(path.clone()),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }
}

impl From<hcl::Block> for Block {
    fn from(block: hcl::Block) -> Self {
        let labels = block
            .labels
            .iter()
            .map(|label| label.as_str().to_string())
            .collect();

        let mut out = Block::new(block.identifier.to_string(), labels);
        for structure in block.body {
            match structure {
                Structure::Attribute(attribute) => {
                    out.attributes
                        .insert(attribute.key.to_string(), attribute.expr);
                }
                Structure::Block(child) => out.blocks.push(child.into()),
            }
        }
        out
    }
}

impl From<Block> for hcl::Block {
    fn from(block: Block) -> Self {
        let mut builder = hcl::Block::builder(Identifier::unchecked(block.ident));

        for label in block.labels {
            builder = builder.add_label(BlockLabel::String(label));
        }

        for (key, expr) in block.attributes {
            builder = builder.add_attribute(hcl::Attribute::new(Identifier::unchecked(key), expr));
        }

        for child in block.blocks {
            builder = builder.add_block(hcl::Block::from(child));
        }

        builder.build()
    }
}

/// Root blocks of a parsed document, root attributes are dropped
pub fn blocks_from_body(body: hcl::Body) -> Vec<Block> {
    body.into_iter()
        .filter_map(|structure| match structure {
            Structure::Block(block) => Some(block.into()),
            Structure::Attribute(_) => None,
        })
        .collect()
}

pub fn to_body(blocks: impl IntoIterator<Item = Block>) -> hcl::Body {
    let mut builder = hcl::Body::builder();
    for block in blocks {
        builder = builder.add_block(hcl::Block::from(block));
    }
    builder.build()
}

/// Formats blocks as an HCL document
pub fn format(blocks: impl IntoIterator<Item = Block>) -> Result<String> {
    hcl::format::to_string(&to_body(blocks)).map_err(Error::Format)
}
