use crate::model::QueryType;
use oxrdf::NamedNode;
use spargebra::term::TriplePattern;
use std::error::Error;

/// An error aborting the registration of a continuous query.
///
/// Everything created for the query before the failure is released.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum RegistrationError {
    /// Error from the static dataset while loading a named graph used by the query
    #[error("Failed to load the named graph {graph}")]
    GraphLoad {
        graph: NamedNode,
        #[source]
        error: Box<dyn Error + Send + Sync>,
    },
    /// Only `SELECT` and `CONSTRUCT` queries can be continuously evaluated
    #[error("{0} queries can't be registered as continuous queries, only SELECT and CONSTRUCT")]
    UnknownQueryType(QueryType),
    /// The window engine rejected a window subscription
    #[error("The window engine rejected the window on {graph} for the pattern {pattern}")]
    WindowRegistration {
        graph: NamedNode,
        pattern: TriplePattern,
        #[source]
        error: Box<dyn Error + Send + Sync>,
    },
}

/// A part of the query pattern that can't be routed and has been dropped.
///
/// These are not fatal: the query is registered without the offending element.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum PatternDiagnostic {
    #[error("Unsupported element in the pattern of the stream {graph}: {element}")]
    UnsupportedPatternElement { graph: NamedNode, element: String },
    #[error("The property path {path} in the pattern of the stream {graph} is not a single triple pattern")]
    UnsupportedPathPattern { graph: NamedNode, path: String },
}
