//! manifest skeletons for the modules of a working directory
//!
//! Lists every module call `terraform init` recorded together with the resources its sources
//! declare, and writes a manifest with an `override` block per module where those resources are
//! commented out, ready to be filled in.
use crate::absorb::render::RESOURCE;
use crate::error::{Error, Result};
use crate::patch::sources::ModuleSources;
use crate::vendor::{self, ModuleEntry, ModulesJson};
use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::path::Path;

const HEADER: [&str; 2] = [
    "# Generated by graft scaffold",
    "# Uncomment the resources to override and add the attributes to change",
];
const INDENT: &str = "  ";

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceInfo {
    pub resource_type: String,
    pub name: String,
}

/// One module call and the module calls of its sources
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScaffoldNode {
    /// Dotted module key, empty for the root module
    pub key: String,
    pub source: String,
    pub version: String,
    pub resources: Vec<ResourceInfo>,
    pub children: Vec<ScaffoldNode>,
}

/// Printable tree with box drawing connectors
#[derive(derive_new::new, Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub name: String,
    #[new(default)]
    pub children: Vec<TreeNode>,
}

/// Resource blocks declared by the sources in `dir`
///
/// Unreadable or malformed files are skipped, a missing directory declares nothing.
pub fn scan_resources(dir: &Path) -> Result<Vec<ResourceInfo>> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "module directory not found");
        return Ok(vec![]);
    }

    let sources = ModuleSources::load(dir)?;
    let resources = sources
        .blocks
        .into_values()
        .filter(|block| block.ident == RESOURCE && block.labels.len() == 2)
        .map(|block| ResourceInfo {
            resource_type: block.labels[0].clone(),
            name: block.labels[1].clone(),
        })
        .collect();

    Ok(resources)
}

/// Module tree of the working directory `root` as recorded in modules.json
pub fn module_tree(root: &Path) -> Result<ScaffoldNode> {
    let Some(modules_json) = ModulesJson::load(root)? else {
        return Err(Error::NotInitialized {
            path: ModulesJson::path(root),
        });
    };

    let modules: BTreeMap<String, ModuleEntry> = modules_json
        .modules
        .into_iter()
        .map(|module| (module.key.clone(), module))
        .collect();

    build_node(root, "", &modules)
}

fn build_node(
    root: &Path,
    key: &str,
    modules: &BTreeMap<String, ModuleEntry>,
) -> Result<ScaffoldNode> {
    let dir = vendor::pristine_path(root, key, modules)?;
    let entry = modules.get(key);

    let mut node = ScaffoldNode {
        key: key.to_string(),
        source: entry.map(|entry| entry.source.clone()).unwrap_or_default(),
        version: entry.map(|entry| entry.version.clone()).unwrap_or_default(),
        resources: scan_resources(&dir)?,
        children: vec![],
    };
    tracing::debug!(module = %key, resources = node.resources.len(), "scanned module");

    let children = modules
        .keys()
        .filter(|child| !child.is_empty() && vendor::parent_key(child) == key);
    for child in children {
        node.children.push(build_node(root, child, modules)?);
    }

    Ok(node)
}

impl ScaffoldNode {
    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }

    /// Name of the module call, the last segment of the key
    pub fn call_name(&self) -> &str {
        self.key.rsplit('.').next().unwrap_or(&self.key)
    }

    pub fn to_tree(&self) -> TreeNode {
        if self.is_root() {
            let mut node = TreeNode::new("root".to_string());
            node.children = self.children.iter().map(ScaffoldNode::to_tree).collect();
            return node;
        }

        let origin = if self.source.starts_with('.') || self.source.starts_with('/') {
            format!("local: {}", self.source)
        } else {
            format!("registry: {}, {}", self.source, self.version)
        };

        let mut node = TreeNode::new(format!("{} ({origin})", self.key));
        node.children.push(TreeNode::new(format!(
            "[{} resources]",
            self.resources.len()
        )));
        node.children
            .extend(self.children.iter().map(ScaffoldNode::to_tree));
        node
    }

    /// Manifest with an empty `override` for every selected module, `None` if no module is
    /// selected
    ///
    /// Without targets every module is selected, otherwise the targets and the modules below
    /// them.
    pub fn manifest_skeleton(&self, targets: &[String]) -> Option<String> {
        let sections: Vec<String> = self
            .children
            .iter()
            .filter_map(|child| child.module_section(0, targets))
            .collect();
        if sections.is_empty() {
            return None;
        }

        let mut out = String::new();
        for line in HEADER {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&sections.join("\n"));
        Some(out)
    }

    fn is_target(&self, targets: &[String]) -> bool {
        targets.is_empty()
            || targets.iter().any(|target| {
                self.key == *target || self.key.starts_with(&format!("{target}."))
            })
    }

    fn has_target_below(&self, targets: &[String]) -> bool {
        targets
            .iter()
            .any(|target| target.starts_with(&format!("{}.", self.key)))
    }

    fn module_section(&self, depth: usize, targets: &[String]) -> Option<String> {
        let is_target = self.is_target(targets);
        if !is_target && !self.has_target_below(targets) {
            return None;
        }

        let mut sections = vec![];
        if is_target {
            sections.push(self.override_section(depth + 1));
        }
        sections.extend(
            self.children
                .iter()
                .filter_map(|child| child.module_section(depth + 1, targets)),
        );

        let mut out = String::new();
        indent_line(&mut out, depth, &format!("module \"{}\" {{", self.call_name()));
        out.push_str(&sections.join("\n"));
        indent_line(&mut out, depth, "}");
        Some(out)
    }

    fn override_section(&self, depth: usize) -> String {
        let mut out = String::new();
        indent_line(&mut out, depth, "override {");
        for resource in &self.resources {
            let comment = format!(
                "# resource \"{}\" \"{}\" {{}}",
                resource.resource_type, resource.name
            );
            indent_line(&mut out, depth + 1, &comment);
        }
        indent_line(&mut out, depth, "}");
        out
    }
}

impl TreeNode {
    fn fmt_children(&self, f: &mut fmt::Formatter<'_>, prefix: &str) -> fmt::Result {
        for (i, child) in self.children.iter().enumerate() {
            let is_last = i + 1 == self.children.len();
            let (connector, continuation) = if is_last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };

            writeln!(f, "{prefix}{connector}{}", child.name)?;
            child.fmt_children(f, &format!("{prefix}{continuation}"))?;
        }
        Ok(())
    }
}

impl fmt::Display for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name)?;
        self.fmt_children(f, "")
    }
}

fn indent_line(out: &mut String, depth: usize, line: &str) {
    let _ = writeln!(out, "{}{line}", INDENT.repeat(depth));
}
