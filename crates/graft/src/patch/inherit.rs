//! `graft.source` resolution
//!
//! Overrides may refer to the value they replace through `graft.source`:
//!
//! ```hcl
//! resource "azurerm_resource_group" "main" {
//!   tags = merge(graft.source, { patched = "true" })
//! }
//! ```
//!
//! Every occurrence is replaced with the expression of the same attribute in the matching source
//! block, or with `null` if there is none.
use super::sources::{ModuleSources, LOCALS};
use crate::block::{Block, INHERIT_TOKEN};
use crate::util::TraversalExt;
use crate::visit::VisitExpressionsMut;
use hcl::Expression;

/// Resolves `graft.source` in all override blocks
pub fn resolve_inherit_tokens(overrides: &mut [Block], sources: &ModuleSources) {
    for block in overrides {
        if block.ident == LOCALS {
            for (name, expr) in block.attributes.iter_mut() {
                substitute(expr, sources.locals.get(name));
            }
            continue;
        }

        let original = sources.block(&block.key());
        resolve_block(block, original);
    }
}

/// Resolves `graft.source` in `block` against `original`, recursing into nested blocks matched by
/// type and labels
///
/// With several nested blocks of the same type and labels the first one is used.
pub fn resolve_block(block: &mut Block, original: Option<&Block>) {
    for (name, expr) in block.attributes.iter_mut() {
        let original_expr = original.and_then(|original| original.attributes.get(name));
        substitute(expr, original_expr);
    }

    for child in block.blocks.iter_mut() {
        let matching = original.and_then(|original| original.find_matching(child));
        resolve_block(child, matching);
    }
}

/// Replaces every `graft.source` in `expr`, returns the number of replacements
pub fn substitute(expr: &mut Expression, replacement: Option<&Expression>) -> usize {
    let replacement = replacement.cloned().unwrap_or(Expression::Null);
    let mut count = 0;

    expr.visit_expressions_mut(&mut |e: &mut Expression| {
        let Expression::Traversal(traversal) = e else {
            return;
        };
        if !traversal.starts_with_path(&INHERIT_TOKEN) {
            return;
        }

        count += 1;
        if traversal.operators.len() + 1 == INHERIT_TOKEN.len() {
            *e = replacement.clone();
        } else {
            traversal.apply_substitution(as_traversal_root(&replacement), INHERIT_TOKEN.len());
        }
    });

    if count > 0 {
        tracing::trace!(count, expr = %expr, "graft.source substituted");
    }
    count
}

/// Wraps expressions that can not be traversed directly, `a + b` becomes `(a + b)`
fn as_traversal_root(expr: &Expression) -> Expression {
    match expr {
        Expression::Variable(_)
        | Expression::Traversal(_)
        | Expression::FuncCall(_)
        | Expression::Parenthesis(_)
        | Expression::Object(_)
        | Expression::Array(_) => expr.clone(),
        other => Expression::Parenthesis(Box::new(other.clone())),
    }
}
