use oxrdf::NamedNode;
use std::error::Error;
use std::sync::Arc;

/// The static background dataset the non-stream parts of the queries are evaluated against.
///
/// Named graphs used by a query are loaded on demand during its registration.
pub trait GraphStore {
    /// Error returned by the store when loading a graph.
    type Error: Error + Send + Sync + 'static;

    /// Returns if the named graph is already materialized in the store
    fn contains_graph(&self, graph: &NamedNode) -> bool;

    /// Loads the named graph `graph` from `location`.
    ///
    /// This call is blocking: the query is only activated once it returned.
    fn load_graph(&self, graph: &NamedNode, location: &str) -> Result<(), Self::Error>;
}

impl<T: GraphStore + ?Sized> GraphStore for Arc<T> {
    type Error = T::Error;

    #[inline]
    fn contains_graph(&self, graph: &NamedNode) -> bool {
        (**self).contains_graph(graph)
    }

    #[inline]
    fn load_graph(&self, graph: &NamedNode, location: &str) -> Result<(), Self::Error> {
        (**self).load_graph(graph, location)
    }
}
