//! module hierarchy of a generated manifest
use crate::block::{self, Block};
use crate::error::Result;
use crate::util::sorted_keys;
use indexmap::IndexMap;
use std::fmt::Write;

const HEADER: [&str; 2] = [
    "# Generated by graft absorb",
    "# This manifest contains overrides to match the current remote state",
];
const INDENT: &str = "  ";

/// An override block together with the resource addresses it absorbs
#[derive(Debug, Clone, PartialEq)]
pub struct AbsorbedBlock {
    pub addresses: Vec<String>,
    pub block: Block,
}

/// One module level of a manifest, the root has an empty name
#[derive(Debug, Default)]
pub struct ModuleNode {
    pub name: String,
    pub children: IndexMap<String, ModuleNode>,
    pub blocks: Vec<AbsorbedBlock>,
}

impl ModuleNode {
    pub fn root() -> Self {
        ModuleNode::default()
    }

    pub fn is_root(&self) -> bool {
        self.name.is_empty()
    }

    /// No blocks in this node or below
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.children.values().all(ModuleNode::is_empty)
    }

    pub fn child_or_insert(&mut self, name: &str) -> &mut ModuleNode {
        self.children
            .entry(name.to_string())
            .or_insert_with(|| ModuleNode {
                name: name.to_string(),
                ..Default::default()
            })
    }

    /// Appends `block` to the node at `module_path`, creating intermediate nodes
    pub fn insert(&mut self, module_path: &[String], block: AbsorbedBlock) {
        let mut node = self;
        for name in module_path {
            node = node.child_or_insert(name);
        }
        node.blocks.push(block);
    }

    /// Manifest document of this node and all of its descendants
    pub fn to_hcl(&self) -> Result<String> {
        let mut out = String::new();

        if self.is_root() {
            for line in HEADER {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }

        self.write_body(&mut out, 0)?;
        Ok(out)
    }

    fn write_body(&self, out: &mut String, depth: usize) -> Result<()> {
        let mut sections = vec![];

        if !self.blocks.is_empty() {
            sections.push(self.override_section(depth + 1)?);
        }

        for name in sorted_keys(self.children.keys()) {
            let child = &self.children[name];

            let mut section = String::new();
            indent_line(&mut section, depth, &format!("module \"{name}\" {{"));
            child.write_body(&mut section, depth + 1)?;
            indent_line(&mut section, depth, "}");
            sections.push(section);
        }

        out.push_str(&sections.join("\n"));
        Ok(())
    }

    /// `override { ... }` with the blocks of this node sorted by resource type and name
    fn override_section(&self, depth: usize) -> Result<String> {
        let mut blocks: Vec<_> = self.blocks.iter().collect();
        blocks.sort_by(|a, b| a.block.labels.cmp(&b.block.labels));

        let mut out = String::new();
        indent_line(&mut out, depth - 1, "override {");

        for (i, absorbed) in blocks.into_iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let comment = format!("# Absorb drift for: {}", absorbed.addresses.join(", "));
            indent_line(&mut out, depth, &comment);

            let formatted = block::format([absorbed.block.clone()])?;
            for line in formatted.lines() {
                indent_line(&mut out, depth, line);
            }
        }

        indent_line(&mut out, depth - 1, "}");
        Ok(out)
    }
}

fn indent_line(out: &mut String, depth: usize, line: &str) {
    if line.is_empty() {
        out.push('\n');
        return;
    }
    let _ = writeln!(out, "{}{line}", INDENT.repeat(depth));
}
