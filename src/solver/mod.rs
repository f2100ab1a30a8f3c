pub mod trust_region;

pub use trust_region::{
    RootFinder, RootFindingError, RootSolution, RootSolverOptions, TrustRegionSolver,
};
