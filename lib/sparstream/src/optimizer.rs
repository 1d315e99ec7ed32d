//! Rewrites of the static operators done before they become leaves.

use crate::classifier::{ClassifiedFilter, ClassifiedPattern, OtherOperator, expression_variables};
use crate::model::{ContinuousQuery, QueryForm};
use oxrdf::Variable;
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use sparopt::algebra::{AggregateExpression, GraphPattern};
use std::mem;
use tracing::debug;

/// Wraps each static operator into every filter whose variables it all mentions, in filter order.
///
/// Filters without variables are never pushed: they must hold for every pipeline.
/// The filter stages are built as is, without constant folding, so that the operator keeps its variables.
///
/// Returns, indexed by filter, if the filter has been pushed onto at least one operator.
/// Pushed filters are not applied again downstream.
pub fn push_filters(operators: &mut [OtherOperator], filters: &[ClassifiedFilter]) -> Vec<bool> {
    let mut pushed = vec![false; filters.len()];
    for operator in operators {
        let variables = operator.variables().into_iter().collect::<FxHashSet<_>>();
        for (i, filter) in filters.iter().enumerate() {
            if filter.variables.is_empty()
                || !filter.variables.iter().all(|v| variables.contains(v))
            {
                continue;
            }
            operator.pattern = GraphPattern::Filter {
                expression: filter.expression.clone(),
                inner: Box::new(take_pattern(&mut operator.pattern)),
            };
            pushed[i] = true;
            debug!(
                operator = operator.sequence,
                filter = filter.sequence,
                "filter pushed down"
            );
        }
    }
    pushed
}

/// The variables that may be needed above the static operators.
///
/// The output variables, the grouping and `HAVING` variables, the filter variables and the stream variables,
/// plus the variables read by bindings and the ones shared between two static operators.
pub fn upper_variables(
    query: &ContinuousQuery,
    classified: &ClassifiedPattern,
) -> FxHashSet<Variable> {
    let mut upper = FxHashSet::default();
    match &query.form {
        QueryForm::Select { variables } => upper.extend(variables.iter().cloned()),
        QueryForm::Construct { template } => {
            for triple in template {
                add_triple_variables(triple, &mut upper);
            }
        }
        QueryForm::Ask | QueryForm::Describe => (),
    }
    upper.extend(query.group_by.iter().cloned());
    for (variable, aggregate) in &query.aggregates {
        upper.insert(variable.clone());
        if let AggregateExpression::FunctionCall { expr, .. } = aggregate {
            upper.extend(expression_variables(expr));
        }
    }
    for having in &query.having {
        upper.extend(expression_variables(having));
    }
    for filter in &classified.filters {
        upper.extend(filter.variables.iter().cloned());
    }
    for stream in &classified.streams {
        upper.extend(stream.variables.iter().cloned());
    }
    for bind in &classified.binds {
        upper.extend(bind.variables.iter().cloned());
    }
    let mut mentions = FxHashMap::<Variable, usize>::default();
    for operator in &classified.others {
        for variable in operator.variables() {
            *mentions.entry(variable).or_default() += 1;
        }
    }
    upper.extend(
        mentions
            .into_iter()
            .filter_map(|(variable, count)| (count > 1).then_some(variable)),
    );
    upper
}

/// Narrows each static operator to the variables in `upper` and removes duplicates.
///
/// The projection goes below an existing top level duplicate elimination, so applying the pass again is a no-op.
pub fn project_operators(operators: &mut [OtherOperator], upper: &FxHashSet<Variable>) {
    for operator in operators {
        let variables = operator.variables();
        let kept = variables
            .iter()
            .filter(|v| upper.contains(*v))
            .cloned()
            .collect::<Vec<_>>();
        let narrowed = kept.len() < variables.len();
        if narrowed {
            debug!(
                operator = operator.sequence,
                kept = kept.len(),
                dropped = variables.len() - kept.len(),
                "operator narrowed"
            );
        }
        let inner = match take_pattern(&mut operator.pattern) {
            GraphPattern::Distinct { inner } => *inner,
            pattern if narrowed => pattern,
            pattern => {
                operator.pattern = distinct(pattern);
                continue;
            }
        };
        operator.pattern = if narrowed {
            distinct(GraphPattern::Project {
                inner: Box::new(inner),
                variables: kept,
            })
        } else {
            distinct(inner)
        };
    }
}

fn distinct(inner: GraphPattern) -> GraphPattern {
    GraphPattern::Distinct {
        inner: Box::new(inner),
    }
}

fn take_pattern(pattern: &mut GraphPattern) -> GraphPattern {
    mem::replace(pattern, GraphPattern::empty())
}

fn add_triple_variables(triple: &TriplePattern, variables: &mut FxHashSet<Variable>) {
    add_term_variables(&triple.subject, variables);
    if let NamedNodePattern::Variable(v) = &triple.predicate {
        variables.insert(v.clone());
    }
    add_term_variables(&triple.object, variables);
}

fn add_term_variables(term: &TermPattern, variables: &mut FxHashSet<Variable>) {
    if let TermPattern::Variable(v) = term {
        variables.insert(v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::PatternClassifier;
    use crate::model::{PatternElement, StreamPattern};
    use crate::window::Window;
    use oxrdf::{Literal, NamedNode};
    use spargebra::algebra::GraphPattern as AlGraphPattern;
    use sparopt::algebra::Expression;

    fn var(name: &str) -> Variable {
        Variable::new_unchecked(name)
    }

    fn iri(value: &str) -> NamedNode {
        NamedNode::new_unchecked(format!("http://example.com/{value}"))
    }

    fn triple(s: &str, p: &str, o: &str) -> TriplePattern {
        TriplePattern {
            subject: var(s).into(),
            predicate: iri(p).into(),
            object: var(o).into(),
        }
    }

    fn bgp(triples: Vec<TriplePattern>) -> PatternElement {
        PatternElement::Other(AlGraphPattern::Bgp { patterns: triples })
    }

    fn stream(triples: Vec<TriplePattern>) -> PatternElement {
        PatternElement::Stream {
            graph: iri("stream"),
            window: Window::Now,
            pattern: StreamPattern::Triples(triples),
        }
    }

    fn filter_on(variable: &str) -> PatternElement {
        PatternElement::Filter(Expression::greater(
            var(variable).into(),
            Literal::from(1).into(),
        ))
    }

    fn variable_set(variables: &[&str]) -> FxHashSet<Variable> {
        variables.iter().map(|v| var(v)).collect()
    }

    #[test]
    fn push_filter_on_covering_operator() {
        let mut classified = PatternClassifier::classify(&[
            bgp(vec![triple("s", "age", "a")]),
            bgp(vec![triple("s", "name", "n")]),
            filter_on("a"),
            filter_on("x"),
        ]);
        let pushed = push_filters(&mut classified.others, &classified.filters);
        assert_eq!(pushed, vec![true, false]);
        assert!(matches!(
            classified.others[0].pattern,
            GraphPattern::Filter { .. }
        ));
        assert!(!matches!(
            classified.others[1].pattern,
            GraphPattern::Filter { .. }
        ));
    }

    #[test]
    fn several_filters_on_one_operator() {
        let mut classified = PatternClassifier::classify(&[
            bgp(vec![triple("s", "age", "a"), triple("s", "size", "b")]),
            filter_on("a"),
            filter_on("b"),
        ]);
        let pushed = push_filters(&mut classified.others, &classified.filters);
        assert_eq!(pushed, vec![true, true]);
        let GraphPattern::Filter { inner, .. } = &classified.others[0].pattern else {
            panic!("Expected a filter, found {:?}", classified.others[0].pattern)
        };
        assert!(matches!(inner.as_ref(), GraphPattern::Filter { .. }));
    }

    #[test]
    fn constant_filter_is_not_pushed() {
        let mut classified = PatternClassifier::classify(&[
            bgp(vec![triple("s", "name", "n")]),
            PatternElement::Filter(false.into()),
        ]);
        let pushed = push_filters(&mut classified.others, &classified.filters);
        assert_eq!(pushed, vec![false]);
        assert_eq!(classified.others[0].variables(), vec![var("s"), var("n")]);
    }

    #[test]
    fn pushed_filter_is_not_folded() {
        let mut classified = PatternClassifier::classify(&[
            PatternElement::Other(AlGraphPattern::Values {
                variables: vec![var("s")],
                bindings: Vec::new(),
            }),
            PatternElement::Filter(Expression::Bound(var("s"))),
        ]);
        let pushed = push_filters(&mut classified.others, &classified.filters);
        assert_eq!(pushed, vec![true]);
        assert!(matches!(
            classified.others[0].pattern,
            GraphPattern::Filter { .. }
        ));
        assert_eq!(classified.others[0].variables(), vec![var("s")]);
    }

    #[test]
    fn upper_variables_of_select() {
        let query = ContinuousQuery::select(
            [var("s")],
            [
                stream(vec![triple("s", "p", "o")]),
                bgp(vec![triple("o", "name", "n"), triple("o", "hidden", "h")]),
                filter_on("f"),
            ],
        );
        let classified = PatternClassifier::classify(&query.pattern);
        assert_eq!(
            upper_variables(&query, &classified),
            variable_set(&["s", "o", "f"])
        );
    }

    #[test]
    fn upper_variables_of_construct() {
        let query = ContinuousQuery::construct(
            [triple("o", "label", "n")],
            [
                bgp(vec![triple("o", "name", "n"), triple("o", "hidden", "h")]),
                bgp(vec![triple("h", "q", "z")]),
                PatternElement::Bind {
                    variable: var("b"),
                    expression: var("z").into(),
                },
            ],
        );
        let classified = PatternClassifier::classify(&query.pattern);
        assert_eq!(
            upper_variables(&query, &classified),
            variable_set(&["o", "n", "h", "z"])
        );
    }

    #[test]
    fn narrow_operator() {
        let mut classified = PatternClassifier::classify(&[
            bgp(vec![triple("o", "name", "n"), triple("o", "hidden", "h")]),
            bgp(vec![triple("o", "p", "x")]),
        ]);
        project_operators(&mut classified.others, &variable_set(&["o", "n", "x"]));
        let GraphPattern::Distinct { inner } = &classified.others[0].pattern else {
            panic!("Expected distinct, found {:?}", classified.others[0].pattern)
        };
        let GraphPattern::Project { variables, .. } = inner.as_ref() else {
            panic!("Expected project, found {inner:?}")
        };
        assert_eq!(variables, &vec![var("o"), var("n")]);
        assert_eq!(classified.others[0].variables(), vec![var("o"), var("n")]);

        let GraphPattern::Distinct { inner } = &classified.others[1].pattern else {
            panic!("Expected distinct, found {:?}", classified.others[1].pattern)
        };
        assert!(matches!(inner.as_ref(), GraphPattern::QuadPattern { .. }));
    }

    #[test]
    fn narrowing_is_idempotent() {
        let mut classified = PatternClassifier::classify(&[bgp(vec![
            triple("o", "name", "n"),
            triple("o", "hidden", "h"),
        ])]);
        let upper = variable_set(&["o"]);
        project_operators(&mut classified.others, &upper);
        let once = classified.others.clone();
        project_operators(&mut classified.others, &upper);
        assert_eq!(classified.others, once);
        assert_eq!(classified.others[0].variables(), vec![var("o")]);
    }

    #[test]
    fn narrow_distinct_operator() {
        let mut classified = PatternClassifier::classify(&[PatternElement::Other(
            AlGraphPattern::Distinct {
                inner: Box::new(AlGraphPattern::Bgp {
                    patterns: vec![triple("o", "name", "n"), triple("o", "hidden", "h")],
                }),
            },
        )]);
        let upper = variable_set(&["o"]);
        project_operators(&mut classified.others, &upper);
        assert_eq!(classified.others[0].variables(), vec![var("o")]);
        let GraphPattern::Distinct { inner } = &classified.others[0].pattern else {
            panic!("Expected distinct, found {:?}", classified.others[0].pattern)
        };
        let GraphPattern::Project { inner, .. } = inner.as_ref() else {
            panic!("Expected project, found {inner:?}")
        };
        assert!(!matches!(inner.as_ref(), GraphPattern::Distinct { .. }));

        let once = classified.others.clone();
        project_operators(&mut classified.others, &upper);
        assert_eq!(classified.others, once);
    }
}
