#![deny(dead_code)]
#![deny(unused_imports)]

pub mod benchmark;
pub mod estimate;
pub mod families;
pub mod generative;
pub mod inference;
pub mod io;
pub mod linalg;
pub mod probability;
pub mod solver;
pub mod types;

pub use benchmark::{
    BenchmarkOptions, LogisticRegression, fit_outcome_missingness_benchmark,
    outcome_missingness_design,
};
pub use estimate::{
    EstimationConfig, EstimationError, MissingnessFit, fit_exposure_missingness,
    fit_outcome_missingness, fit_shadow_system,
};
pub use families::{ExposureMomentSystem, OutcomeMomentSystem, ShadowMomentSystem};
pub use generative::{MissingnessDesign, generate, generate_seeded};
pub use inference::predict::{
    predict_exposure_for_full, predict_exposure_for_partial, predict_exposure_propensity,
    predict_outcome_for_full, predict_outcome_for_partial, predict_outcome_propensity,
};
pub use solver::{
    RootFinder, RootFindingError, RootSolution, RootSolverOptions, TrustRegionSolver,
};
pub use types::{
    BinaryObservation, DatasetSummary, ExposureParams, FullDataset, OutcomeParams,
    ParameterVector, PartialDataset,
};
