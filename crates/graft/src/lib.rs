//! # graft - overrides for vendored Terraform modules
//!
//! `graft` changes third party Terraform modules without forking them. Changes are described in
//! manifests (`*.graft.hcl`) and applied to private copies of the modules, and drift found in a
//! plan can be turned into such a manifest.
//!
//! ## Introduction for developers
//!
//! ### HCL Terms
//!
//! In hcl terms...
//! - a file gets parsed as a `body`
//! - ...which is a list of `structures`
//! - ...where there are two kinds:
//!   - `attribute`: a "key = value" pair
//!   - or `block`: 1 `identifier`, 0 or more `labels` and a `body`
//!
//! Within `graft` a block is identified by its *key*, the identifier and labels joined with
//! dots: `resource "azurerm_subnet" "main" {}` has the key `resource.azurerm_subnet.main`.
//! Overrides and module sources are handled as [block::Block]s, which only keep what `graft`
//! needs to compare and merge them.
//!
//! ### Absorbing drift
//!
//! see [absorb]
//!
//! A plan in JSON form lists every resource Terraform wants to update, with the observed state
//! (`before`) and the configured state (`after`). For each of them
//!
//! - provider computed values are dropped with the help of the provider schema ([schema])
//! - `before` and `after` are compared ([absorb::diff])
//! - the differences are rendered into an override block ([absorb::render])
//!
//! Instances created by `count` or `for_each` share one configuration block, their differences
//! are combined into lookup tables keyed by the instance key ([absorb::indexed]).
//!
//! The override blocks are sorted into a tree of module calls ([absorb::module_tree]) which is
//! written out as a manifest.
//!
//! ### Building
//!
//! see [manifest], [vendor] and [patch]
//!
//! 1. manifests are loaded and merged
//! 2. every module with overrides is copied to `.graft/build/<key>`
//! 3. overrides are applied to the copies, and root overrides to the working directory
//! 4. `.terraform/modules/modules.json` is pointed at the copies
//!
//! Applying overrides relies on Terraform's own override files. What Terraform can not express
//! that way (removing attributes and blocks, deep merges of nested blocks, referring to the
//! replaced value via `graft.source`) is done by `graft` before the files are written.
//!
//! ### Scaffolding
//!
//! [scaffold] reads the module calls from modules.json, lists the resources of every module
//! and writes a manifest skeleton to start from.
//!
pub mod absorb;
pub mod block;
mod error;
pub mod manifest;
pub mod patch;
pub mod scaffold;
pub mod schema;
mod util;
pub mod value;
pub mod vendor;
mod visit;

pub use error::{Error, Result};
