use crate::assembler::{HeuristicAssembler, Leaf};
use crate::classifier::{ClassifiedPattern, PatternClassifier};
use crate::dataset::GraphStore;
use crate::error::{PatternDiagnostic, RegistrationError};
use crate::model::{ContinuousQuery, QueryForm};
use crate::optimizer::{project_operators, push_filters, upper_variables};
use crate::router::{Router, RouterId, SinkOutput, SolutionModifiers};
use crate::routing::RoutingTable;
use crate::window::{WindowEngine, WindowHandle, WindowRegistration};
use oxrdf::NamedNode;
use rustc_hash::{FxHashMap, FxHashSet};
use spargebra::term::NamedNodePattern;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the dataflow graphs of continuous queries and keeps track of them.
///
/// Each registered query gets a static leaf per part of its body evaluated against the [`GraphStore`],
/// a window leaf per stream triple pattern subscribed to the [`WindowEngine`],
/// one pipeline per window assembled by the [`HeuristicAssembler`], a merge stage and a sink.
/// All routers and edges are written into a [`RoutingTable`] that may be shared with other policies.
///
/// ```
/// use oxrdf::{NamedNode, Variable};
/// use spargebra::term::TriplePattern;
/// use sparstream::{
///     ContinuousQuery, GraphStore, PatternElement, RouterId, RoutingPolicy, StreamPattern, Window,
///     WindowEngine, WindowHandle, WindowRegistration,
/// };
/// use std::convert::Infallible;
///
/// struct EmptyStore;
///
/// impl GraphStore for EmptyStore {
///     type Error = Infallible;
///
///     fn contains_graph(&self, _: &NamedNode) -> bool {
///         false
///     }
///
///     fn load_graph(&self, _: &NamedNode, _: &str) -> Result<(), Infallible> {
///         Ok(())
///     }
/// }
///
/// struct Engine;
///
/// impl WindowEngine for Engine {
///     type Error = Infallible;
///
///     fn register_window(
///         &self,
///         _: WindowRegistration<'_>,
///         subscriber: RouterId,
///     ) -> Result<WindowHandle, Infallible> {
///         Ok(WindowHandle::new(subscriber.as_u64()))
///     }
///
///     fn unregister_window(&self, _: WindowHandle) {}
/// }
///
/// let (s, o) = (Variable::new("s")?, Variable::new("o")?);
/// let query = ContinuousQuery::select(
///     [s.clone(), o.clone()],
///     [PatternElement::Stream {
///         graph: NamedNode::new("http://example.com/stream")?,
///         window: Window::Now,
///         pattern: StreamPattern::Triples(vec![TriplePattern {
///             subject: s.into(),
///             predicate: NamedNode::new("http://example.com/p")?.into(),
///             object: o.into(),
///         }]),
///     }],
/// );
/// let mut policy = RoutingPolicy::new(EmptyStore, Engine);
/// let handle = policy.register_query(&query)?;
/// let merge = policy.routing_table().router(handle.merge());
/// assert_eq!(merge.map(|r| r.inputs().len()), Some(1));
/// assert!(policy.unregister_query(&handle));
/// assert!(policy.routing_table().is_empty());
/// # Result::<_, Box<dyn std::error::Error>>::Ok(())
/// ```
pub struct RoutingPolicy<S, E> {
    store: S,
    engine: E,
    table: Arc<RoutingTable>,
    window_retention: usize,
    without_optimizations: bool,
    queries: FxHashMap<u64, RegisteredQuery>,
    next_query: u64,
}

/// What has to be released when a query is unregistered
#[derive(Default)]
struct RegisteredQuery {
    routers: Vec<RouterId>,
    windows: Vec<WindowHandle>,
}

impl<S: GraphStore, E: WindowEngine> RoutingPolicy<S, E> {
    #[must_use]
    pub fn new(store: S, engine: E) -> Self {
        Self {
            store,
            engine,
            table: Arc::default(),
            window_retention: 1,
            without_optimizations: false,
            queries: FxHashMap::default(),
            next_query: 0,
        }
    }

    /// Writes the routers and the edges into a given table instead of a private one.
    #[inline]
    #[must_use]
    pub fn with_routing_table(mut self, table: Arc<RoutingTable>) -> Self {
        self.table = table;
        self
    }

    /// Sets how many matching triples each window subscription keeps. Defaults to 1.
    #[inline]
    #[must_use]
    pub fn with_window_retention(mut self, retention: usize) -> Self {
        self.window_retention = retention;
        self
    }

    /// Disables filter pushdown and projection of the operators evaluated against the static dataset.
    #[inline]
    #[must_use]
    pub fn without_optimizations(mut self) -> Self {
        self.without_optimizations = true;
        self
    }

    #[inline]
    pub fn routing_table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    /// Number of registered queries
    #[inline]
    pub fn len(&self) -> usize {
        self.queries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Builds the dataflow graph of a `SELECT` or `CONSTRUCT` continuous query.
    ///
    /// The missing named graphs of the query are loaded first.
    /// On failure everything created for the query is released.
    pub fn register_query(
        &mut self,
        query: &ContinuousQuery,
    ) -> Result<QueryHandle, RegistrationError> {
        let output = match &query.form {
            QueryForm::Select { variables } => SinkOutput::Select {
                variables: variables.clone(),
            },
            QueryForm::Construct { template } => SinkOutput::Construct {
                template: template.clone(),
            },
            QueryForm::Ask | QueryForm::Describe => {
                return Err(RegistrationError::UnknownQueryType(query.query_type()));
            }
        };

        let mut classified = PatternClassifier::classify(&query.pattern);
        let pushed = if self.without_optimizations {
            vec![false; classified.filters.len()]
        } else {
            let pushed = push_filters(&mut classified.others, &classified.filters);
            let upper = upper_variables(query, &classified);
            project_operators(&mut classified.others, &upper);
            pushed
        };
        self.load_named_graphs(query, &classified)?;

        let modifiers = SolutionModifiers {
            group_by: query.group_by.clone(),
            aggregates: query.aggregates.clone(),
            having: query.having.clone(),
        };
        let mut registered = RegisteredQuery::default();
        let (merge, sink) =
            match self.build(&classified, &pushed, output, modifiers, &mut registered) {
            Ok(ends) => ends,
            Err(error) => {
                self.release(&registered);
                return Err(error);
            }
        };
        let id = self.next_query;
        self.next_query += 1;
        info!(
            query = id,
            kind = %query.query_type(),
            routers = registered.routers.len(),
            windows = registered.windows.len(),
            dropped = classified.diagnostics.len(),
            "continuous query registered"
        );
        self.queries.insert(id, registered);
        Ok(QueryHandle {
            id,
            merge,
            sink,
            diagnostics: classified.diagnostics,
        })
    }

    /// Unsubscribes the windows of a query then removes its routers and their edges.
    ///
    /// Returns `false` if the query is not registered.
    pub fn unregister_query(&mut self, handle: &QueryHandle) -> bool {
        let Some(registered) = self.queries.remove(&handle.id) else {
            return false;
        };
        self.release(&registered);
        info!(query = handle.id, "continuous query unregistered");
        true
    }

    /// Loads the named graphs used by the query that are not in the store yet.
    ///
    /// These are the `FROM NAMED` graphs and the graphs of the `GRAPH` clauses.
    /// Stream graphs are only loaded if a `GRAPH` clause uses them.
    fn load_named_graphs(
        &self,
        query: &ContinuousQuery,
        classified: &ClassifiedPattern,
    ) -> Result<(), RegistrationError> {
        let streams = classified
            .streams
            .iter()
            .map(|s| &s.graph)
            .collect::<FxHashSet<_>>();
        let scoped = classified
            .graph_scopes
            .iter()
            .filter_map(|scope| match &scope.name {
                NamedNodePattern::NamedNode(graph) => Some(graph),
                NamedNodePattern::Variable(_) => None,
            });
        let mut seen = FxHashSet::<&NamedNode>::default();
        for graph in query
            .named_graphs
            .iter()
            .filter(|g| !streams.contains(g))
            .chain(scoped)
        {
            if !seen.insert(graph) || self.store.contains_graph(graph) {
                continue;
            }
            info!(%graph, "loading named graph");
            self.store
                .load_graph(graph, graph.as_str())
                .map_err(|e| RegistrationError::GraphLoad {
                    graph: graph.clone(),
                    error: Box::new(e),
                })?;
        }
        Ok(())
    }

    /// Creates the routers and edges of a query, returns its merge stage and sink
    fn build(
        &self,
        classified: &ClassifiedPattern,
        pushed: &[bool],
        output: SinkOutput,
        modifiers: SolutionModifiers,
        registered: &mut RegisteredQuery,
    ) -> Result<(RouterId, RouterId), RegistrationError> {
        let mut statics = Vec::with_capacity(classified.others.len());
        for operator in &classified.others {
            let id = self.table.allocate_id();
            self.table.insert(Router::StaticLeaf {
                id,
                pattern: operator.pattern.clone(),
            });
            registered.routers.push(id);
            statics.push(Leaf {
                router: id,
                pattern: operator.pattern.clone(),
                variables: operator.variables(),
            });
        }

        let mut windows = Vec::with_capacity(classified.streams.len());
        for stream in &classified.streams {
            let id = self.table.allocate_id();
            let handle = self
                .engine
                .register_window(
                    WindowRegistration {
                        graph: &stream.graph,
                        pattern: &stream.triple,
                        window: &stream.window,
                        retention: self.window_retention,
                    },
                    id,
                )
                .map_err(|e| RegistrationError::WindowRegistration {
                    graph: stream.graph.clone(),
                    pattern: stream.triple.clone(),
                    error: Box::new(e),
                })?;
            registered.windows.push(handle);
            self.table.insert(Router::WindowLeaf {
                id,
                pattern: stream.pattern.clone(),
                graph: stream.graph.clone(),
                triple: stream.triple.clone(),
                window: stream.window,
                handle,
            });
            registered.routers.push(id);
            windows.push(Leaf {
                router: id,
                pattern: stream.pattern.clone(),
                variables: stream.variables.clone(),
            });
        }

        let filters = classified
            .filters
            .iter()
            .zip(pushed)
            .filter(|(_, pushed)| !**pushed)
            .map(|(filter, _)| filter.clone())
            .collect::<Vec<_>>();
        let mut assembler = HeuristicAssembler::new(&self.table, &filters, &classified.binds);
        let roots = assembler.assemble(&statics, &windows);
        let merge = assembler.fan_in(roots);
        registered.routers.extend(assembler.into_created());

        let sink = self.table.insert(Router::Sink {
            id: self.table.allocate_id(),
            input: merge,
            output,
            modifiers,
        });
        self.table.add(merge, sink);
        registered.routers.push(sink);
        Ok((merge, sink))
    }

    fn release(&self, registered: &RegisteredQuery) {
        for handle in &registered.windows {
            self.engine.unregister_window(*handle);
        }
        self.table.release(&registered.routers);
        debug!(
            routers = registered.routers.len(),
            windows = registered.windows.len(),
            "query resources released"
        );
    }
}

/// A registered continuous query.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct QueryHandle {
    id: u64,
    merge: RouterId,
    sink: RouterId,
    diagnostics: Vec<PatternDiagnostic>,
}

impl QueryHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The merge stage all the window pipelines of the query go to
    #[inline]
    pub fn merge(&self) -> RouterId {
        self.merge
    }

    /// The router delivering the query results
    #[inline]
    pub fn sink(&self) -> RouterId {
        self.sink
    }

    /// The parts of the query body that have been dropped
    #[inline]
    pub fn diagnostics(&self) -> &[PatternDiagnostic] {
        &self.diagnostics
    }
}
