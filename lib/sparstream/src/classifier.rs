use crate::error::PatternDiagnostic;
use crate::model::{PatternElement, StreamBlock, StreamPattern};
use crate::window::Window;
use oxrdf::{NamedNode, Variable};
use rustc_hash::FxHashSet;
use spargebra::algebra::GraphPattern as AlGraphPattern;
use spargebra::term::{NamedNodePattern, TriplePattern};
use sparopt::algebra::{Expression, GraphPattern};
use tracing::warn;

/// A `FILTER` of the query body
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ClassifiedFilter {
    /// Position among the filters, in declaration order.
    pub sequence: usize,
    pub expression: Expression,
    pub variables: Vec<Variable>,
}

/// A `BIND` of the query body
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ClassifiedBind {
    pub sequence: usize,
    pub variable: Variable,
    pub expression: Expression,
    /// The variables used by the expression.
    pub variables: Vec<Variable>,
}

/// A single triple pattern matched against a window of a stream
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct StreamTriple {
    pub sequence: usize,
    pub graph: NamedNode,
    pub triple: TriplePattern,
    pub window: Window,
    /// The quad pattern evaluated by the window leaf.
    pub pattern: GraphPattern,
    pub variables: Vec<Variable>,
}

/// A `GRAPH` clause of the query body
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct GraphScope {
    pub sequence: usize,
    pub name: NamedNodePattern,
}

/// A part of the query body evaluated against the static dataset
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OtherOperator {
    pub sequence: usize,
    pub pattern: GraphPattern,
}

impl OtherOperator {
    pub fn variables(&self) -> Vec<Variable> {
        pattern_variables(&self.pattern)
    }
}

/// The query body split by the way each element is routed.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct ClassifiedPattern {
    pub filters: Vec<ClassifiedFilter>,
    pub binds: Vec<ClassifiedBind>,
    pub streams: Vec<StreamTriple>,
    pub graph_scopes: Vec<GraphScope>,
    pub others: Vec<OtherOperator>,
    pub diagnostics: Vec<PatternDiagnostic>,
}

/// Splits a flat query group into filters, bindings, stream triples, named graph scopes and other operators.
///
/// `GRAPH` clauses are both recorded as scopes and compiled as other operators.
/// Elements of stream clauses that are not triple patterns are dropped and reported as [`PatternDiagnostic`]s.
pub struct PatternClassifier;

impl PatternClassifier {
    pub fn classify(elements: &[PatternElement]) -> ClassifiedPattern {
        let mut classified = ClassifiedPattern::default();
        for element in elements {
            match element {
                PatternElement::Filter(expression) => {
                    classified.filters.push(ClassifiedFilter {
                        sequence: classified.filters.len(),
                        expression: expression.clone(),
                        variables: expression_variables(expression),
                    });
                }
                PatternElement::Bind {
                    variable,
                    expression,
                } => {
                    classified.binds.push(ClassifiedBind {
                        sequence: classified.binds.len(),
                        variable: variable.clone(),
                        expression: expression.clone(),
                        variables: expression_variables(expression),
                    });
                }
                PatternElement::Stream {
                    graph,
                    window,
                    pattern,
                } => classified.add_stream_pattern(graph, *window, pattern),
                PatternElement::NamedGraph { name, pattern } => {
                    classified.graph_scopes.push(GraphScope {
                        sequence: classified.graph_scopes.len(),
                        name: name.clone(),
                    });
                    classified.add_other(&AlGraphPattern::Graph {
                        name: name.clone(),
                        inner: Box::new(pattern.clone()),
                    });
                }
                PatternElement::Other(pattern) => classified.add_other(pattern),
            }
        }
        classified
    }
}

impl ClassifiedPattern {
    fn add_other(&mut self, pattern: &AlGraphPattern) {
        self.others.push(OtherOperator {
            sequence: self.others.len(),
            pattern: GraphPattern::from(pattern),
        });
    }

    fn add_stream_pattern(&mut self, graph: &NamedNode, window: Window, pattern: &StreamPattern) {
        match pattern {
            StreamPattern::Triples(triples) => {
                for triple in triples {
                    self.add_stream_triple(graph, window, triple.clone());
                }
            }
            // Nested groups are only flattened one level deep
            StreamPattern::Group(blocks) => {
                for block in blocks {
                    match block {
                        StreamBlock::Triples(triples) => {
                            for triple in triples {
                                self.add_stream_triple(graph, window, triple.clone());
                            }
                        }
                        StreamBlock::Paths(paths) => {
                            for path in paths {
                                if let Some(triple) = path.as_triple() {
                                    self.add_stream_triple(graph, window, triple);
                                } else {
                                    self.report(PatternDiagnostic::UnsupportedPathPattern {
                                        graph: graph.clone(),
                                        path: path.to_string(),
                                    });
                                }
                            }
                        }
                        StreamBlock::Other(element) => {
                            self.report(PatternDiagnostic::UnsupportedPatternElement {
                                graph: graph.clone(),
                                element: element.to_string(),
                            });
                        }
                    }
                }
            }
            StreamPattern::Other(element) => {
                self.report(PatternDiagnostic::UnsupportedPatternElement {
                    graph: graph.clone(),
                    element: element.to_string(),
                });
            }
        }
    }

    fn add_stream_triple(&mut self, graph: &NamedNode, window: Window, triple: TriplePattern) {
        let pattern = GraphPattern::from(&AlGraphPattern::Graph {
            name: graph.clone().into(),
            inner: Box::new(AlGraphPattern::Bgp {
                patterns: vec![triple.clone()],
            }),
        });
        let variables = pattern_variables(&pattern);
        self.streams.push(StreamTriple {
            sequence: self.streams.len(),
            graph: graph.clone(),
            triple,
            window,
            pattern,
            variables,
        });
    }

    fn report(&mut self, diagnostic: PatternDiagnostic) {
        warn!(%diagnostic, "dropping a stream pattern element");
        self.diagnostics.push(diagnostic);
    }
}

/// The variables mentioned by an operator, in first mention order
pub(crate) fn pattern_variables(pattern: &GraphPattern) -> Vec<Variable> {
    let mut seen = FxHashSet::default();
    let mut variables = Vec::new();
    pattern.lookup_used_variables(&mut |v| {
        if seen.insert(v) {
            variables.push(v.clone());
        }
    });
    variables
}

/// The variables used by an expression, in first mention order
pub(crate) fn expression_variables(expression: &Expression) -> Vec<Variable> {
    let mut seen = FxHashSet::default();
    let mut variables = Vec::new();
    expression.lookup_used_variables(&mut |v| {
        if seen.insert(v) {
            variables.push(v.clone());
        }
    });
    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathPattern;
    use oxrdf::Literal;
    use spargebra::algebra::PropertyPathExpression;

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

    #[test]
    fn split_elements() {
        let classified = PatternClassifier::classify(&[
            PatternElement::Filter(Expression::greater(
                var("o").into(),
                Literal::from(1).into(),
            )),
            PatternElement::Other(AlGraphPattern::Bgp {
                patterns: vec![triple("s", "name", "n")],
            }),
            PatternElement::Bind {
                variable: var("b"),
                expression: var("n").into(),
            },
            PatternElement::Stream {
                graph: iri("stream"),
                window: Window::Now,
                pattern: StreamPattern::Triples(vec![
                    triple("s", "p", "o"),
                    triple("o", "q", "x"),
                ]),
            },
        ]);
        assert_eq!(classified.filters.len(), 1);
        assert_eq!(classified.filters[0].variables, vec![var("o")]);
        assert_eq!(classified.binds.len(), 1);
        assert_eq!(classified.binds[0].variables, vec![var("n")]);
        assert_eq!(classified.others.len(), 1);
        assert_eq!(classified.others[0].variables(), vec![var("s"), var("n")]);
        assert_eq!(classified.streams.len(), 2);
        assert_eq!(classified.streams[0].sequence, 0);
        assert_eq!(classified.streams[1].sequence, 1);
        assert_eq!(classified.streams[1].variables, vec![var("o"), var("x")]);
        assert!(classified.graph_scopes.is_empty());
        assert!(classified.diagnostics.is_empty());
    }

    #[test]
    fn stream_triple_is_a_quad_pattern_on_the_stream() {
        let classified = PatternClassifier::classify(&[PatternElement::Stream {
            graph: iri("stream"),
            window: Window::Triples(3),
            pattern: StreamPattern::Triples(vec![triple("s", "p", "o")]),
        }]);
        let GraphPattern::QuadPattern { graph_name, .. } = &classified.streams[0].pattern else {
            panic!("Expected a quad pattern, found {:?}", classified.streams[0].pattern)
        };
        assert_eq!(
            graph_name,
            &Some(NamedNodePattern::NamedNode(iri("stream")))
        );
        assert_eq!(classified.streams[0].window, Window::Triples(3));
    }

    #[test]
    fn named_graph_is_scope_and_operator() {
        let classified = PatternClassifier::classify(&[PatternElement::NamedGraph {
            name: iri("g").into(),
            pattern: AlGraphPattern::Bgp {
                patterns: vec![triple("s", "p", "o")],
            },
        }]);
        assert_eq!(classified.graph_scopes.len(), 1);
        assert_eq!(
            classified.graph_scopes[0].name,
            NamedNodePattern::NamedNode(iri("g"))
        );
        assert_eq!(classified.others.len(), 1);
    }

    #[test]
    fn nested_stream_group() {
        let graph = iri("stream");
        let star = PathPattern {
            subject: var("a").into(),
            path: PropertyPathExpression::OneOrMore(Box::new(PropertyPathExpression::NamedNode(
                iri("knows"),
            ))),
            object: var("b").into(),
        };
        let classified = PatternClassifier::classify(&[PatternElement::Stream {
            graph: graph.clone(),
            window: Window::All,
            pattern: StreamPattern::Group(vec![
                StreamBlock::Triples(vec![triple("s", "p", "o")]),
                StreamBlock::Paths(vec![
                    PathPattern {
                        subject: var("o").into(),
                        path: PropertyPathExpression::NamedNode(iri("q")),
                        object: var("x").into(),
                    },
                    star.clone(),
                ]),
                StreamBlock::Other(AlGraphPattern::Values {
                    variables: vec![var("v")],
                    bindings: Vec::new(),
                }),
            ]),
        }]);
        assert_eq!(classified.streams.len(), 2);
        assert_eq!(classified.streams[1].triple, triple("o", "q", "x"));
        assert_eq!(classified.diagnostics.len(), 2);
        assert_eq!(
            classified.diagnostics[0],
            PatternDiagnostic::UnsupportedPathPattern {
                graph: graph.clone(),
                path: star.to_string(),
            }
        );
        assert!(matches!(
            classified.diagnostics[1],
            PatternDiagnostic::UnsupportedPatternElement { .. }
        ));
    }

    #[test]
    fn unsupported_stream_content_is_dropped() {
        let classified = PatternClassifier::classify(&[
            PatternElement::Stream {
                graph: iri("stream"),
                window: Window::Now,
                pattern: StreamPattern::Other(AlGraphPattern::Bgp {
                    patterns: vec![triple("s", "p", "o")],
                }),
            },
            PatternElement::Other(AlGraphPattern::Bgp {
                patterns: vec![triple("s", "p", "o")],
            }),
        ]);
        assert!(classified.streams.is_empty());
        assert_eq!(classified.others.len(), 1);
        assert_eq!(classified.diagnostics.len(), 1);
    }
}
