//! copying patched modules out of `.terraform` and linking Terraform to the copies
//!
//! `terraform init` records every module call in `.terraform/modules/modules.json`. Patched
//! modules are copied from their pristine location to `.graft/build/<key>`, patched there, and
//! modules.json is pointed at the copies. Downloading modules is left to `terraform init`.
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use crate::patch::{ADD_FILE, OVERRIDE_FILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

pub const GRAFT_DIR: &str = ".graft";
const BUILD_DIR: &str = "build";
const TERRAFORM_MODULES_DIR: [&str; 2] = [".terraform", "modules"];
const MODULES_JSON: &str = "modules.json";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModulesJson {
    #[serde(rename = "Modules", default)]
    pub modules: Vec<ModuleEntry>,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleEntry {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Source", default)]
    pub source: String,
    #[serde(
        rename = "Version",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub version: String,
    #[serde(rename = "Dir", default)]
    pub dir: String,
}

impl ModulesJson {
    pub fn path(root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        path.extend(TERRAFORM_MODULES_DIR);
        path.join(MODULES_JSON)
    }

    /// Reads modules.json of `root`, `None` if `terraform init` has not created it yet
    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = Self::path(root);
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path).map_err(Error::read(&path))?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|source| Error::Json { path, source })
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = Self::path(root);
        let content = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.clone(),
            source,
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(Error::write(parent))?;
        }
        std::fs::write(&path, content).map_err(Error::write(&path))
    }
}

/// Directory all vendored modules are copied to
pub fn build_dir(root: &Path) -> PathBuf {
    root.join(GRAFT_DIR).join(BUILD_DIR)
}

pub(crate) fn is_local_source(source: &str) -> bool {
    source.starts_with("./") || source.starts_with("../")
}

/// `network.subnets` → `network`, `network` → `""`
pub(crate) fn parent_key(key: &str) -> &str {
    key.rsplit_once('.').map(|(parent, _)| parent).unwrap_or_default()
}

fn points_into_graft(dir: &str) -> bool {
    Path::new(dir)
        .components()
        .any(|component| component == Component::Normal(OsStr::new(GRAFT_DIR)))
}

/// Location of the unpatched sources of the module `key`
///
/// Local modules live relative to their parent, everything else was downloaded by
/// `terraform init`. The `Dir` recorded in modules.json can not be trusted once a previous
/// build redirected it.
pub fn pristine_path(
    root: &Path,
    key: &str,
    modules: &BTreeMap<String, ModuleEntry>,
) -> Result<PathBuf> {
    if key.is_empty() {
        return Ok(root.to_path_buf());
    }

    let module = modules
        .get(key)
        .filter(|module| !module.source.is_empty())
        .ok_or_else(|| Error::UnresolvedModule(key.to_string()))?;

    if is_local_source(&module.source) {
        let parent = pristine_path(root, parent_key(key), modules)?;
        return Ok(parent.join(&module.source));
    }

    if !module.dir.is_empty() && !points_into_graft(&module.dir) {
        return Ok(root.join(&module.dir));
    }

    let mut path = root.to_path_buf();
    path.extend(TERRAFORM_MODULES_DIR);
    Ok(path.join(key))
}

/// Copies every patched module of `manifest` to [build_dir], returns the copies by module key
pub fn vendor_modules(root: &Path, manifest: &Manifest) -> Result<BTreeMap<String, PathBuf>> {
    let patched = manifest.patched_modules();
    if patched.is_empty() {
        return Ok(BTreeMap::new());
    }

    let modules_json = ModulesJson::load(root)?.unwrap_or_else(|| {
        tracing::warn!(
            path = %ModulesJson::path(root).display(),
            "modules.json not found, run 'terraform init' first"
        );
        ModulesJson::default()
    });

    let mut modules: BTreeMap<String, ModuleEntry> = modules_json
        .modules
        .into_iter()
        .map(|module| (module.key.clone(), module))
        .collect();

    for (key, module) in &patched {
        let entry = modules.entry(key.clone()).or_insert_with(|| ModuleEntry {
            key: key.clone(),
            ..Default::default()
        });
        if let Some(source) = &module.source {
            entry.source = source.clone();
        }
        if let Some(version) = &module.version {
            entry.version = version.clone();
        }
    }

    let mut vendored = BTreeMap::new();
    for key in patched.keys() {
        let pristine = pristine_path(root, key, &modules)?;
        tracing::debug!(module = %key, source = %pristine.display(), "vendoring module");

        let dir = vendor_module(root, key, &pristine).map_err(|e| Error::Vendor {
            module: key.clone(),
            source: Box::new(e),
        })?;
        vendored.insert(key.clone(), dir);
    }

    Ok(vendored)
}

/// Replaces `.graft/build/<key>` with a fresh copy of `pristine`
fn vendor_module(root: &Path, key: &str, pristine: &Path) -> Result<PathBuf> {
    let target = build_dir(root).join(key);

    if target.exists() {
        std::fs::remove_dir_all(&target).map_err(Error::write(&target))?;
    }
    copy_dir(pristine, &target)?;

    Ok(target)
}

fn copy_dir(from: &Path, to: &Path) -> Result<()> {
    let walker = WalkDir::new(from)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| entry.file_name() != OsStr::new(GRAFT_DIR));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Read {
            path: e.path().unwrap_or(from).to_path_buf(),
            source: e.into(),
        })?;
        let Ok(relative) = entry.path().strip_prefix(from) else {
            continue;
        };
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).map_err(Error::write(&target))?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(Error::write(&target))?;
        }
    }

    Ok(())
}

/// Points modules.json at the vendored copies in [build_dir], returns the number of redirected
/// modules
pub fn redirect_modules(root: &Path) -> Result<usize> {
    let Some(mut modules_json) = ModulesJson::load(root)? else {
        return Err(Error::NotInitialized {
            path: ModulesJson::path(root),
        });
    };

    let build_dir = build_dir(root);
    let mut redirected = 0;
    for module in &mut modules_json.modules {
        if module.key.is_empty() || !build_dir.join(&module.key).is_dir() {
            continue;
        }

        module.dir = format!("{GRAFT_DIR}/{BUILD_DIR}/{}", module.key);
        tracing::debug!(module = %module.key, dir = %module.dir, "redirected module");
        redirected += 1;
    }

    modules_json.save(root)?;
    Ok(redirected)
}

/// What [clean] removed
#[derive(Debug, Default, PartialEq)]
pub struct CleanReport {
    pub removed: Vec<PathBuf>,
    /// Number of modules.json entries dropped, `None` without modules.json
    pub unlinked: Option<usize>,
}

/// Removes everything `build` created in `root`
///
/// Entries of modules.json pointing into `.graft` are dropped, `terraform init` restores them.
pub fn clean(root: &Path) -> Result<CleanReport> {
    let mut report = CleanReport::default();

    let graft_dir = root.join(GRAFT_DIR);
    if graft_dir.exists() {
        std::fs::remove_dir_all(&graft_dir).map_err(Error::write(&graft_dir))?;
        report.removed.push(graft_dir);
    }

    for name in [ADD_FILE, OVERRIDE_FILE] {
        let path = root.join(name);
        if path.exists() {
            std::fs::remove_file(&path).map_err(Error::write(&path))?;
            report.removed.push(path);
        }
    }

    if let Some(mut modules_json) = ModulesJson::load(root)? {
        let before = modules_json.modules.len();
        modules_json
            .modules
            .retain(|module| !points_into_graft(&module.dir));
        report.unlinked = Some(before - modules_json.modules.len());
        modules_json.save(root)?;
    }

    Ok(report)
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(key: &str, source: &str, dir: &str) -> ModuleEntry {
        ModuleEntry {
            key: key.to_string(),
            source: source.to_string(),
            version: String::new(),
            dir: dir.to_string(),
        }
    }

    fn modules(entries: &[ModuleEntry]) -> BTreeMap<String, ModuleEntry> {
        entries
            .iter()
            .map(|entry| (entry.key.clone(), entry.clone()))
            .collect()
    }

    fn write(path: &Path, content: &str) {
        std::fs::create_dir_all(path.parent().expect("has parent")).expect("create dir");
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn parent_keys() {
        assert_eq!(parent_key("network.subnets"), "network");
        assert_eq!(parent_key("a.b.c"), "a.b");
        assert_eq!(parent_key("network"), "");
    }

    #[test]
    fn pristine_paths() {
        let root = Path::new("/work");
        let modules = modules(&[
            entry("", "", "."),
            entry("local", "./modules/local", "modules/local"),
            entry("remote", "Azure/network/azurerm", ".terraform/modules/remote"),
            entry("remote.inner", "./modules/inner", ".graft/build/remote.inner"),
            entry("redirected", "Azure/aks/azurerm", ".graft/build/redirected"),
            entry("sibling", "../shared", ""),
        ]);

        let resolve = |key| pristine_path(root, key, &modules).expect("resolves");

        assert_eq!(resolve(""), root);
        assert_eq!(resolve("local"), root.join("./modules/local"));
        assert_eq!(resolve("remote"), root.join(".terraform/modules/remote"));
        assert_eq!(
            resolve("remote.inner"),
            root.join(".terraform/modules/remote").join("./modules/inner")
        );
        assert_eq!(resolve("redirected"), root.join(".terraform/modules/redirected"));
        assert_eq!(resolve("sibling"), root.join("../shared"));
    }

    #[test]
    fn unknown_module_is_unresolved() {
        let error = pristine_path(Path::new("/work"), "missing", &BTreeMap::new())
            .expect_err("unresolved");
        assert!(matches!(error, Error::UnresolvedModule(key) if key == "missing"));
    }

    #[test]
    fn modules_json_format() {
        let json = r#"{"Modules":[{"Key":"","Source":"","Dir":"."},{"Key":"net","Source":"Azure/network/azurerm","Version":"5.3.0","Dir":".terraform/modules/net"}]}"#;
        let parsed: ModulesJson = serde_json::from_str(json).expect("valid json");

        assert_eq!(parsed.modules[1].version, "5.3.0");

        let written = serde_json::to_value(&parsed).expect("serializes");
        assert_eq!(written["Modules"][0].get("Version"), None);
        assert_eq!(written["Modules"][1]["Dir"], ".terraform/modules/net");
    }

    #[test]
    fn save_creates_modules_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let modules_json = ModulesJson {
            modules: vec![entry("", "", ".")],
        };

        modules_json.save(dir.path()).expect("save");

        assert_eq!(ModulesJson::load(dir.path()).expect("loads"), Some(modules_json));
    }

    #[test]
    fn vendor_redirect_and_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write(&root.join("modules/app/main.tf"), "resource \"a\" \"b\" {}\n");
        write(&root.join("modules/app/nested/readme.md"), "docs");
        write(&root.join(".graft/build/app/stale.tf"), "stale");
        write(&root.join(OVERRIDE_FILE), "");
        ModulesJson {
            modules: vec![
                entry("", "", "."),
                entry("app", "./modules/app", "modules/app"),
                entry("other", "./modules/other", "modules/other"),
            ],
        }
        .save(root)
        .expect("save");

        let manifest = Manifest::parse(
            r#"
            module "app" {
              override {
                resource "a" "b" {}
              }
            }
            "#,
        )
        .expect("valid manifest");

        let vendored = vendor_modules(root, &manifest).expect("vendors");
        let app = build_dir(root).join("app");
        assert_eq!(vendored, BTreeMap::from([("app".to_string(), app.clone())]));
        assert!(app.join("main.tf").is_file());
        assert!(app.join("nested/readme.md").is_file());
        assert!(!app.join("stale.tf").exists());

        assert_eq!(redirect_modules(root).expect("redirects"), 1);
        let modules_json = ModulesJson::load(root).expect("loads").expect("exists");
        assert_eq!(modules_json.modules[1].dir, ".graft/build/app");
        assert_eq!(modules_json.modules[2].dir, "modules/other");

        let report = clean(root).expect("cleans");
        assert_eq!(
            report,
            CleanReport {
                removed: vec![root.join(GRAFT_DIR), root.join(OVERRIDE_FILE)],
                unlinked: Some(1),
            }
        );
        let modules_json = ModulesJson::load(root).expect("loads").expect("exists");
        assert_eq!(
            modules_json.modules.iter().map(|m| m.key.as_str()).collect::<Vec<_>>(),
            vec!["", "other"]
        );
    }

    #[test]
    fn manifest_source_resolves_modules_missing_from_modules_json() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write(&root.join("lib/main.tf"), "");

        let manifest = Manifest::parse(
            r#"
            module "lib" {
              source = "./lib"
              override {
                resource "a" "b" {}
              }
            }
            "#,
        )
        .expect("valid manifest");

        let vendored = vendor_modules(root, &manifest).expect("vendors");
        assert!(vendored["lib"].join("main.tf").is_file());
    }

    #[test]
    fn nothing_patched_nothing_vendored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let manifest = Manifest::parse(r#"module "a" { source = "./a" }"#).expect("valid");

        assert!(vendor_modules(dir.path(), &manifest).expect("vendors").is_empty());
        assert!(!dir.path().join(GRAFT_DIR).exists());
    }
}
