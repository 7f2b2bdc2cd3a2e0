use super::VisitMut;
use hcl::{
    template::{Directive, Element},
    Expression, ObjectKey, Operation, Template, TemplateExpr, TraversalOperator,
};

/// Recursively visit all [hcl::Expression]s mutably
///
/// Children are visited before their parent so a visitor may replace the parent
/// expression wholesale without its replacement being walked again.
pub trait VisitExpressionsMut {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>);
}

impl VisitExpressionsMut for Expression {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        match self {
            Expression::Traversal(traversal) => {
                traversal.expr.visit_expressions_mut(visitor);
                for operator in traversal.operators.iter_mut() {
                    if let TraversalOperator::Index(index) = operator {
                        index.visit_expressions_mut(visitor);
                    }
                }
            }
            Expression::Array(array) => {
                for expr in array {
                    expr.visit_expressions_mut(visitor);
                }
            }
            Expression::Object(object) => {
                // keys are immutable in place, the object is rebuilt in its original order
                *object = std::mem::take(object)
                    .into_iter()
                    .map(|(mut key, mut value)| {
                        if let ObjectKey::Expression(key_expr) = &mut key {
                            key_expr.visit_expressions_mut(visitor);
                        }
                        value.visit_expressions_mut(visitor);
                        (key, value)
                    })
                    .collect();
            }
            Expression::TemplateExpr(template_expr) => {
                if let Ok(original) = Template::from_expr(template_expr) {
                    let mut template = original.clone();
                    template.visit_expressions_mut(visitor);

                    // only re-render templates that actually changed
                    if template != original {
                        let rendered = template.to_string();
                        if let TemplateExpr::Heredoc(heredoc) = template_expr.as_mut() {
                            heredoc.template = rendered;
                        } else {
                            *template_expr = Box::new(TemplateExpr::QuotedString(rendered));
                        }
                    }
                }
            }
            Expression::FuncCall(func_call) => {
                for arg in func_call.args.iter_mut() {
                    arg.visit_expressions_mut(visitor);
                }
            }
            Expression::Parenthesis(expr) => {
                expr.visit_expressions_mut(visitor);
            }
            Expression::Conditional(cond) => {
                cond.cond_expr.visit_expressions_mut(visitor);
                cond.true_expr.visit_expressions_mut(visitor);
                cond.false_expr.visit_expressions_mut(visitor);
            }
            Expression::Operation(operation) => match operation.as_mut() {
                Operation::Binary(binop) => {
                    binop.lhs_expr.visit_expressions_mut(visitor);
                    binop.rhs_expr.visit_expressions_mut(visitor);
                }
                Operation::Unary(unop) => {
                    unop.expr.visit_expressions_mut(visitor);
                }
            },
            Expression::ForExpr(forexpr) => {
                forexpr.collection_expr.visit_expressions_mut(visitor);
                forexpr
                    .key_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
                forexpr.value_expr.visit_expressions_mut(visitor);
                forexpr
                    .cond_expr
                    .iter_mut()
                    .for_each(|e| e.visit_expressions_mut(visitor));
            }
            _ => {}
        }

        visitor.visit_mut(self);
    }
}

impl VisitExpressionsMut for Template {
    fn visit_expressions_mut(&mut self, visitor: &mut dyn VisitMut<Expression>) {
        for element in self.elements_mut() {
            match element {
                Element::Interpolation(interpolation) => {
                    interpolation.expr.visit_expressions_mut(visitor);
                }
                Element::Directive(directive) => match directive {
                    Directive::If(ifdir) => {
                        ifdir.cond_expr.visit_expressions_mut(visitor);
                        ifdir.true_template.visit_expressions_mut(visitor);
                        ifdir
                            .false_template
                            .iter_mut()
                            .for_each(|t| t.visit_expressions_mut(visitor));
                    }
                    Directive::For(fordir) => {
                        fordir.collection_expr.visit_expressions_mut(visitor);
                        fordir.template.visit_expressions_mut(visitor);
                    }
                },
                Element::Literal(_) => {}
            }
        }
    }
}
