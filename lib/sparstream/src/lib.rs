#![doc = include_str!("../README.md")]
#![doc(test(attr(deny(warnings))))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

mod assembler;
mod classifier;
mod dataset;
mod error;
mod model;
mod optimizer;
mod policy;
mod router;
mod routing;
mod window;

pub use crate::assembler::{HeuristicAssembler, Leaf};
pub use crate::classifier::{
    ClassifiedBind, ClassifiedFilter, ClassifiedPattern, GraphScope, OtherOperator,
    PatternClassifier, StreamTriple,
};
pub use crate::dataset::GraphStore;
pub use crate::error::{PatternDiagnostic, RegistrationError};
pub use crate::model::{
    ContinuousQuery, PathPattern, PatternElement, QueryForm, QueryType, StreamBlock,
    StreamPattern,
};
pub use crate::optimizer::{project_operators, push_filters, upper_variables};
pub use crate::policy::{QueryHandle, RoutingPolicy};
pub use crate::router::{Router, RouterId, SinkOutput, SolutionModifiers};
pub use crate::routing::RoutingTable;
pub use crate::window::{Window, WindowEngine, WindowHandle, WindowRegistration};
