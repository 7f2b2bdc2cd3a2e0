use hcl::{Expression, Traversal, TraversalOperator};
use std::collections::BTreeSet;

/// Sorted, deduplicated keys of any mapping
///
/// All map-derived iteration that ends up in generated output goes through here so the
/// output does not depend on the iteration order of the underlying map.
pub fn sorted_keys<'a, I>(keys: I) -> Vec<&'a str>
where
    I: IntoIterator<Item = &'a String>,
{
    keys.into_iter()
        .map(String::as_str)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub(crate) trait TraversalExt {
    fn starts_with_path(&self, path: &[&str]) -> bool;
    fn apply_substitution(&mut self, expr: Expression, path_len: usize);
    fn squash(&mut self);
}

impl TraversalExt for Traversal {
    /// Checks for a leading `a.b.c` style path of plain attribute accesses
    fn starts_with_path(&self, path: &[&str]) -> bool {
        let Some((root, rest)) = path.split_first() else {
            return false;
        };

        let Expression::Variable(var) = &self.expr else {
            return false;
        };

        if var.as_str() != *root || self.operators.len() < rest.len() {
            return false;
        }

        rest.iter()
            .zip(&self.operators)
            .all(|(segment, operator)| match operator {
                TraversalOperator::GetAttr(ident) => ident.as_str() == *segment,
                _ => false,
            })
    }

    /// Replaces the first `path_len` elements (root + `path_len - 1` operators) with `expr`
    #[tracing::instrument(level = "trace", skip(expr))]
    fn apply_substitution(&mut self, expr: Expression, path_len: usize) {
        let remove = path_len.saturating_sub(1);

        self.expr = expr;

        if remove >= self.operators.len() {
            self.operators.clear();
        } else {
            self.operators.drain(..remove);
        }

        self.squash();

        tracing::trace!(traversal=?self, "after substitution");
    }

    /// Squash nested Traversals
    ///
    /// Turns `<foo.bar>.baz` into `foo.bar.baz`.
    fn squash(&mut self) {
        let Traversal {
            expr: Expression::Traversal(inner),
            operators,
            ..
        } = self
        else {
            return;
        };

        inner.operators.append(operators);
        std::mem::swap(&mut self.operators, &mut inner.operators);

        self.expr = std::mem::replace(&mut inner.expr, Expression::Null);
        tracing::trace!(traversal=?self, "traversal squashed")
    }
}
