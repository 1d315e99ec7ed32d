use crate::classifier::{ClassifiedBind, ClassifiedFilter};
use crate::router::{Router, RouterId};
use crate::routing::RoutingTable;
use oxrdf::Variable;
use rustc_hash::FxHashSet;
use sparopt::algebra::{GraphPattern, JoinAlgorithm};
use tracing::debug;

/// A static or window leaf router, input of the [`HeuristicAssembler`].
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Leaf {
    pub router: RouterId,
    pub pattern: GraphPattern,
    pub variables: Vec<Variable>,
}

/// Greedily grows one pipeline per window leaf, joining leaves by variable overlap.
///
/// For each window, in discovery order, passes are done until one of them makes no progress.
/// Each pass:
/// 1. applies every filter not applied yet in this pipeline whose variables are all bound,
/// 2. applies every binding whose expression variables are all bound and whose variable is not bound yet,
/// 3. joins the first static leaf, in discovery order, that is not used by any pipeline yet and shares a variable with the pipeline,
/// 4. if no static leaf was joined, joins the first window leaf not in this pipeline yet sharing a variable with it.
///
/// A static leaf is used by at most one pipeline: the first window that reaches it wins.
/// Leaves sharing no variable with a pipeline are never cross joined with it.
/// Every created router and edge is written into the [`RoutingTable`].
pub struct HeuristicAssembler<'a> {
    table: &'a RoutingTable,
    filters: &'a [ClassifiedFilter],
    binds: &'a [ClassifiedBind],
    created: Vec<RouterId>,
}

impl<'a> HeuristicAssembler<'a> {
    /// `filters` are the filters left to apply by the pipelines, the ones pushed down to static operators excluded.
    pub fn new(
        table: &'a RoutingTable,
        filters: &'a [ClassifiedFilter],
        binds: &'a [ClassifiedBind],
    ) -> Self {
        Self {
            table,
            filters,
            binds,
            created: Vec::new(),
        }
    }

    /// Builds the pipelines and returns their roots, one per window leaf in the same order
    pub fn assemble(&mut self, statics: &[Leaf], windows: &[Leaf]) -> Vec<RouterId> {
        let mut used_statics = vec![false; statics.len()];
        windows
            .iter()
            .enumerate()
            .map(|(i, window)| self.grow(i, window, statics, windows, &mut used_statics))
            .collect()
    }

    fn grow(
        &mut self,
        start: usize,
        window: &Leaf,
        statics: &[Leaf],
        windows: &[Leaf],
        used_statics: &mut [bool],
    ) -> RouterId {
        let mut used_windows = vec![false; windows.len()];
        used_windows[start] = true;
        let mut used_filters = vec![false; self.filters.len()];
        let mut pipeline = Pipeline {
            router: window.router,
            pattern: window.pattern.clone(),
            variables: window.variables.iter().cloned().collect(),
        };
        let (filters, binds) = (self.filters, self.binds);
        loop {
            let mut progress = false;

            for (i, filter) in filters.iter().enumerate() {
                if !used_filters[i] && pipeline.binds_all(&filter.variables) {
                    let pattern = GraphPattern::Filter {
                        expression: filter.expression.clone(),
                        inner: Box::new(pipeline.pattern.clone()),
                    };
                    let stage = Router::Filter {
                        id: self.table.allocate_id(),
                        pattern,
                        input: pipeline.router,
                        expression: filter.expression.clone(),
                    };
                    self.push_stage(&mut pipeline, stage);
                    used_filters[i] = true;
                    progress = true;
                }
            }

            for bind in binds {
                if !pipeline.variables.contains(&bind.variable)
                    && pipeline.binds_all(&bind.variables)
                {
                    let pattern = GraphPattern::Extend {
                        inner: Box::new(pipeline.pattern.clone()),
                        variable: bind.variable.clone(),
                        expression: bind.expression.clone(),
                    };
                    let stage = Router::Extend {
                        id: self.table.allocate_id(),
                        pattern,
                        input: pipeline.router,
                        variable: bind.variable.clone(),
                        expression: bind.expression.clone(),
                    };
                    self.push_stage(&mut pipeline, stage);
                    pipeline.variables.insert(bind.variable.clone());
                    progress = true;
                }
            }

            // One leaf per pass, static leaves first
            if let Some(i) = pipeline.first_overlapping(statics, used_statics) {
                used_statics[i] = true;
                self.join(&mut pipeline, &statics[i]);
                progress = true;
            } else if let Some(i) = pipeline.first_overlapping(windows, &used_windows) {
                used_windows[i] = true;
                self.join(&mut pipeline, &windows[i]);
                progress = true;
            }

            if !progress {
                break;
            }
        }
        debug!(
            window = %window.router,
            root = %pipeline.router,
            unused_filters = used_filters.iter().filter(|u| !**u).count(),
            unused_windows = used_windows.iter().filter(|u| !**u).count(),
            "pipeline assembled"
        );
        pipeline.router
    }

    fn join(&mut self, pipeline: &mut Pipeline, leaf: &Leaf) {
        let keys = leaf
            .variables
            .iter()
            .filter(|v| pipeline.variables.contains(*v))
            .cloned()
            .collect::<Vec<_>>();
        let pattern = GraphPattern::Join {
            left: Box::new(pipeline.pattern.clone()),
            right: Box::new(leaf.pattern.clone()),
            algorithm: JoinAlgorithm::HashBuildLeftProbeRight { keys: keys.clone() },
        };
        let stage = Router::Join {
            id: self.table.allocate_id(),
            pattern,
            left: pipeline.router,
            right: leaf.router,
            keys,
        };
        self.push_stage(pipeline, stage);
        pipeline.variables.extend(leaf.variables.iter().cloned());
    }

    /// Appends a stage at the end of the pipeline
    fn push_stage(&mut self, pipeline: &mut Pipeline, stage: Router) {
        if let Some(pattern) = stage.pattern() {
            pipeline.pattern = pattern.clone();
        }
        let id = self.table.insert(stage);
        self.table.add(pipeline.router, id);
        self.created.push(id);
        pipeline.router = id;
    }

    /// Wires all the pipeline roots into a single merge stage and returns it.
    ///
    /// Without roots the merge stage has no input.
    pub fn fan_in(&mut self, roots: Vec<RouterId>) -> RouterId {
        let id = self.table.allocate_id();
        let merge = self.table.insert(Router::Merge {
            id,
            inputs: roots.clone(),
        });
        self.created.push(merge);
        for root in roots {
            self.table.add(root, merge);
        }
        merge
    }

    /// The routers created so far
    pub fn created(&self) -> &[RouterId] {
        &self.created
    }

    pub fn into_created(self) -> Vec<RouterId> {
        self.created
    }
}

/// The state of a pipeline being grown
struct Pipeline {
    router: RouterId,
    pattern: GraphPattern,
    variables: FxHashSet<Variable>,
}

impl Pipeline {
    fn binds_all(&self, variables: &[Variable]) -> bool {
        variables.iter().all(|v| self.variables.contains(v))
    }

    fn first_overlapping(&self, leaves: &[Leaf], used: &[bool]) -> Option<usize> {
        leaves.iter().zip(used).position(|(leaf, used)| {
            !*used && leaf.variables.iter().any(|v| self.variables.contains(v))
        })
    }
}
