use crate::window::Window;
use oxrdf::{NamedNode, Variable};
use spargebra::algebra::{GraphPattern as AlGraphPattern, PropertyPathExpression};
use spargebra::term::{NamedNodePattern, TermPattern, TriplePattern};
use sparopt::algebra::{AggregateExpression, Expression};
use std::fmt;

/// A continuous query, as produced by the query parser.
///
/// The body is a single flat group of [`PatternElement`]s.
/// Filters and bindings are already lowered to the [`sparopt`] expression algebra,
/// the other elements are kept in the [`spargebra`] algebra and compiled during registration.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ContinuousQuery {
    pub form: QueryForm,
    pub pattern: Vec<PatternElement>,
    pub group_by: Vec<Variable>,
    pub aggregates: Vec<(Variable, AggregateExpression)>,
    pub having: Vec<Expression>,
    /// The `FROM NAMED` graphs.
    pub named_graphs: Vec<NamedNode>,
}

impl ContinuousQuery {
    pub fn select(
        variables: impl IntoIterator<Item = Variable>,
        pattern: impl IntoIterator<Item = PatternElement>,
    ) -> Self {
        Self::new(
            QueryForm::Select {
                variables: variables.into_iter().collect(),
            },
            pattern,
        )
    }

    pub fn construct(
        template: impl IntoIterator<Item = TriplePattern>,
        pattern: impl IntoIterator<Item = PatternElement>,
    ) -> Self {
        Self::new(
            QueryForm::Construct {
                template: template.into_iter().collect(),
            },
            pattern,
        )
    }

    pub fn new(form: QueryForm, pattern: impl IntoIterator<Item = PatternElement>) -> Self {
        Self {
            form,
            pattern: pattern.into_iter().collect(),
            group_by: Vec::new(),
            aggregates: Vec::new(),
            having: Vec::new(),
            named_graphs: Vec::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn with_named_graph(mut self, graph: impl Into<NamedNode>) -> Self {
        self.named_graphs.push(graph.into());
        self
    }

    #[inline]
    #[must_use]
    pub fn with_group_by(
        mut self,
        variables: impl IntoIterator<Item = Variable>,
        aggregates: impl IntoIterator<Item = (Variable, AggregateExpression)>,
    ) -> Self {
        self.group_by.extend(variables);
        self.aggregates.extend(aggregates);
        self
    }

    #[inline]
    #[must_use]
    pub fn with_having(mut self, expression: Expression) -> Self {
        self.having.push(expression);
        self
    }

    #[inline]
    pub fn query_type(&self) -> QueryType {
        self.form.query_type()
    }
}

/// The query form and what it outputs.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum QueryForm {
    Select { variables: Vec<Variable> },
    Construct { template: Vec<TriplePattern> },
    Ask,
    Describe,
}

impl QueryForm {
    pub fn query_type(&self) -> QueryType {
        match self {
            Self::Select { .. } => QueryType::Select,
            Self::Construct { .. } => QueryType::Construct,
            Self::Ask => QueryType::Ask,
            Self::Describe => QueryType::Describe,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum QueryType {
    Select,
    Construct,
    Ask,
    Describe,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "SELECT",
            Self::Construct => "CONSTRUCT",
            Self::Ask => "ASK",
            Self::Describe => "DESCRIBE",
        })
    }
}

/// An element of the query body group.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum PatternElement {
    /// `FILTER(expression)`
    Filter(Expression),
    /// `BIND(expression AS ?variable)`
    Bind {
        variable: Variable,
        expression: Expression,
    },
    /// `STREAM <graph> [window] { pattern }`
    Stream {
        graph: NamedNode,
        window: Window,
        pattern: StreamPattern,
    },
    /// `GRAPH name { pattern }`
    NamedGraph {
        name: NamedNodePattern,
        pattern: AlGraphPattern,
    },
    /// Anything else, evaluated against the static dataset.
    Other(AlGraphPattern),
}

/// The content of a `STREAM` clause.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StreamPattern {
    Triples(Vec<TriplePattern>),
    Group(Vec<StreamBlock>),
    /// Anything else. Not supported inside streams.
    Other(AlGraphPattern),
}

/// An element of a group nested inside a `STREAM` clause.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum StreamBlock {
    Triples(Vec<TriplePattern>),
    Paths(Vec<PathPattern>),
    /// Anything else. Not supported inside streams.
    Other(AlGraphPattern),
}

/// A property path pattern `subject path object`.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub struct PathPattern {
    pub subject: TermPattern,
    pub path: PropertyPathExpression,
    pub object: TermPattern,
}

impl PathPattern {
    /// Returns the equivalent triple pattern if the path is a single predicate.
    pub fn as_triple(&self) -> Option<TriplePattern> {
        let PropertyPathExpression::NamedNode(predicate) = &self.path else {
            return None;
        };
        Some(TriplePattern {
            subject: self.subject.clone(),
            predicate: predicate.clone().into(),
            object: self.object.clone(),
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.subject, self.path, self.object)
    }
}
