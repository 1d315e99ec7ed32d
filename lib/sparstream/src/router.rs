use crate::window::{Window, WindowHandle};
use oxrdf::{NamedNode, Variable};
use spargebra::term::TriplePattern;
use sparopt::algebra::{AggregateExpression, Expression, GraphPattern};
use std::fmt;

/// The identity of a [`Router`], unique inside its [`RoutingTable`](crate::RoutingTable).
#[derive(Eq, PartialEq, Ord, PartialOrd, Debug, Clone, Copy, Hash)]
pub struct RouterId(u64);

impl RouterId {
    #[inline]
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RouterId {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A node of the dataflow graph of a continuous query.
///
/// The `pattern` of the leaves and stages is the algebra the router computes, including everything upstream of it.
/// Predecessors are referenced by their identity: their lifetime is handled by the [`RoutingTable`](crate::RoutingTable).
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Router {
    /// Evaluates an operator against the static dataset.
    StaticLeaf { id: RouterId, pattern: GraphPattern },
    /// Receives the events of a window matching one triple pattern.
    WindowLeaf {
        id: RouterId,
        pattern: GraphPattern,
        graph: NamedNode,
        triple: TriplePattern,
        window: Window,
        handle: WindowHandle,
    },
    Filter {
        id: RouterId,
        pattern: GraphPattern,
        input: RouterId,
        expression: Expression,
    },
    Extend {
        id: RouterId,
        pattern: GraphPattern,
        input: RouterId,
        variable: Variable,
        expression: Expression,
    },
    /// Joins the pipeline built so far (`left`) with a leaf (`right`) on the `keys` variables.
    Join {
        id: RouterId,
        pattern: GraphPattern,
        left: RouterId,
        right: RouterId,
        keys: Vec<Variable>,
    },
    /// Fan-in of the pipelines of all the windows of a query.
    Merge { id: RouterId, inputs: Vec<RouterId> },
    /// Applies the solution modifiers of the query to the merged mappings and outputs them.
    Sink {
        id: RouterId,
        input: RouterId,
        output: SinkOutput,
        modifiers: SolutionModifiers,
    },
}

impl Router {
    pub fn id(&self) -> RouterId {
        match self {
            Self::StaticLeaf { id, .. }
            | Self::WindowLeaf { id, .. }
            | Self::Filter { id, .. }
            | Self::Extend { id, .. }
            | Self::Join { id, .. }
            | Self::Merge { id, .. }
            | Self::Sink { id, .. } => *id,
        }
    }

    /// The algebra computed by this router, if it is not a fan-in or a sink
    pub fn pattern(&self) -> Option<&GraphPattern> {
        match self {
            Self::StaticLeaf { pattern, .. }
            | Self::WindowLeaf { pattern, .. }
            | Self::Filter { pattern, .. }
            | Self::Extend { pattern, .. }
            | Self::Join { pattern, .. } => Some(pattern),
            Self::Merge { .. } | Self::Sink { .. } => None,
        }
    }

    /// The routers this one reads from
    pub fn inputs(&self) -> Vec<RouterId> {
        match self {
            Self::StaticLeaf { .. } | Self::WindowLeaf { .. } => Vec::new(),
            Self::Filter { input, .. } | Self::Extend { input, .. } | Self::Sink { input, .. } => {
                vec![*input]
            }
            Self::Join { left, right, .. } => vec![*left, *right],
            Self::Merge { inputs, .. } => inputs.clone(),
        }
    }

    pub fn is_merge(&self) -> bool {
        matches!(self, Self::Merge { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::StaticLeaf { .. } => "static-leaf",
            Self::WindowLeaf { .. } => "window-leaf",
            Self::Filter { .. } => "filter",
            Self::Extend { .. } => "extend",
            Self::Join { .. } => "join",
            Self::Merge { .. } => "merge",
            Self::Sink { .. } => "sink",
        }
    }
}

/// What the sink of a query outputs.
#[derive(Eq, PartialEq, Debug, Clone, Hash)]
pub enum SinkOutput {
    /// Solutions projected on the given variables
    Select { variables: Vec<Variable> },
    /// Triples built from the given template
    Construct { template: Vec<TriplePattern> },
}

/// The grouping of the query, applied by its sink before the output.
///
/// All empty if the query does not group.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Default)]
pub struct SolutionModifiers {
    pub group_by: Vec<Variable>,
    /// Aggregates with the variable they bind
    pub aggregates: Vec<(Variable, AggregateExpression)>,
    /// `HAVING` conditions, evaluated after the aggregates
    pub having: Vec<Expression>,
}

impl SolutionModifiers {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.group_by.is_empty() && self.aggregates.is_empty() && self.having.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_inputs() {
        let (a, b, c) = (RouterId::new(0), RouterId::new(1), RouterId::new(2));
        let join = Router::Join {
            id: c,
            pattern: GraphPattern::empty(),
            left: a,
            right: b,
            keys: Vec::new(),
        };
        assert_eq!(join.inputs(), vec![a, b]);
        assert_eq!(join.kind(), "join");
        assert!(join.pattern().is_some());
        let merge = Router::Merge {
            id: c,
            inputs: vec![a, b],
        };
        assert!(merge.is_merge());
        assert_eq!(merge.pattern(), None);
        assert_eq!(merge.inputs(), vec![a, b]);
        assert_eq!(c.to_string(), "#2");
    }
}
