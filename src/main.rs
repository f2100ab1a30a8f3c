use clap::{Args, Parser, Subcommand, ValueEnum};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use ndarray::{Array1, array};
use serde::Serialize;
use shadow_ipw::benchmark::{fit_outcome_missingness_benchmark, outcome_missingness_design};
use shadow_ipw::estimate::{
    EstimationConfig, MissingnessFit, fit_exposure_missingness, fit_outcome_missingness,
};
use shadow_ipw::generative::{MissingnessDesign, generate_seeded};
use shadow_ipw::inference::predict::{
    predict_exposure_for_full, predict_exposure_for_partial, predict_exposure_propensity,
    predict_outcome_for_full,
};
use shadow_ipw::io::{ModelColumns, read_partial_csv_for, write_full_csv, write_partial_csv};
use shadow_ipw::types::{
    BinaryObservation, DatasetSummary, ExposureParams, OutcomeParams, ParameterVector,
    PartialDataset,
};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "shadow-ipw")]
#[command(
    about = "Shadow-variable estimation of self-censoring missingness",
    long_about = None
)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Simulate, fit both models and compare with the truth and the benchmark.
    Run(RunArgs),
    /// Simulate and write `full.csv` and `partial.csv`.
    #[command(alias = "simulate")]
    Generate(GenerateArgs),
    /// Fit missingness models on a partial CSV.
    Estimate(EstimateArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    #[arg(long, default_value_t = 5000)]
    size: usize,
    #[arg(long, default_value_t = 10)]
    seed: u64,
    /// JSON file with solver / benchmark options and initial guesses.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print a JSON report instead of tables.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Args, Debug)]
struct GenerateArgs {
    #[arg(long, default_value_t = 5000)]
    size: usize,
    #[arg(long, default_value_t = 10)]
    seed: u64,
    #[arg(long = "out-dir")]
    out_dir: PathBuf,
}

#[derive(Args, Debug)]
struct EstimateArgs {
    data: PathBuf,
    #[arg(long, value_enum, default_value_t = ModelChoice::Both)]
    model: ModelChoice,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum ModelChoice {
    Exposure,
    Outcome,
    Both,
}

impl ModelChoice {
    fn includes_exposure(self) -> bool {
        matches!(self, Self::Exposure | Self::Both)
    }

    fn includes_outcome(self) -> bool {
        matches!(self, Self::Outcome | Self::Both)
    }

    fn columns(self) -> ModelColumns {
        match self {
            Self::Exposure => ModelColumns::Exposure,
            Self::Outcome => ModelColumns::Outcome,
            Self::Both => ModelColumns::Both,
        }
    }
}

/// `P(R_A=1 | A=exposure)` from the fit, the mechanism and the full data.
#[derive(Debug, Serialize)]
struct ExposureResponseRate {
    exposure: u8,
    fitted: f64,
    truth: f64,
    /// `None` when no generated row has this exposure.
    empirical: Option<f64>,
}

/// Fitted probabilities against a reference on the same rows.
#[derive(Debug, Serialize)]
struct ProbabilityComparison {
    rows: usize,
    mean_fitted: f64,
    mean_reference: f64,
    mean_abs_difference: f64,
    max_abs_difference: f64,
}

#[derive(Debug, Serialize)]
struct RunReport {
    size: usize,
    seed: u64,
    full: DatasetSummary,
    partial: DatasetSummary,
    exposure: MissingnessFit<ExposureParams>,
    exposure_truth: ExposureParams,
    /// Estimated vs true `P(R_A=1|A)` over all rows.
    exposure_vs_truth: ProbabilityComparison,
    /// `P(R_A=1|A=0)` and `P(R_A=1|A=1)`: fitted, true, empirical.
    exposure_response_rates: Vec<ExposureResponseRate>,
    /// Estimated vs true `P(R_A=1|A)` on the complete cases (`R_A = 1`), the
    /// rows whose inverse weights enter the moments.
    exposure_complete_cases: ProbabilityComparison,
    outcome: MissingnessFit<OutcomeParams>,
    outcome_truth: OutcomeParams,
    benchmark_coefficients: Vec<f64>,
    /// Estimated vs benchmark `P(R_Y=1|Y,W2)` on rows with `R_Y = 1`.
    outcome_vs_benchmark: ProbabilityComparison,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    if let Err(e) = run() {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_simulation(args),
        Command::Generate(args) => run_generate(args),
        Command::Estimate(args) => run_estimate(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<EstimationConfig, String> {
    let Some(path) = path else {
        return Ok(EstimationConfig::default());
    };
    let text = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config '{}': {e}", path.display()))?;
    serde_json::from_str(&text)
        .map_err(|e| format!("failed to parse config '{}': {e}", path.display()))
}

fn compare_probabilities(fitted: &Array1<f64>, reference: &Array1<f64>) -> ProbabilityComparison {
    let diff = (fitted - reference).mapv(f64::abs);
    ProbabilityComparison {
        rows: fitted.len(),
        mean_fitted: fitted.mean().unwrap_or(f64::NAN),
        mean_reference: reference.mean().unwrap_or(f64::NAN),
        mean_abs_difference: diff.mean().unwrap_or(f64::NAN),
        max_abs_difference: diff.iter().fold(0.0f64, |acc, &v| acc.max(v)),
    }
}

/// Fitted `P(R_A=1|A=0)` and `P(R_A=1|A=1)`.
fn exposure_level_propensities(params: &ExposureParams) -> Array1<f64> {
    predict_exposure_propensity(
        params,
        array![
            BinaryObservation::Observed(false),
            BinaryObservation::Observed(true)
        ]
        .view(),
    )
}

fn run_simulation(args: RunArgs) -> Result<(), String> {
    let config = load_config(args.config.as_deref())?;
    let (full, partial) = generate_seeded(args.size, args.seed).map_err(|e| e.to_string())?;

    let exposure = fit_exposure_missingness(&partial, config.exposure_initial, &config.solver)
        .map_err(|e| e.to_string())?;
    let outcome = fit_outcome_missingness(&partial, config.outcome_initial, &config.solver)
        .map_err(|e| e.to_string())?;

    let design = MissingnessDesign::default();
    let exposure_truth = design.true_exposure_params();
    let outcome_truth = design.true_outcome_params();

    let exposure_vs_truth = compare_probabilities(
        &predict_exposure_for_full(&exposure.params, &full),
        &predict_exposure_for_full(&exposure_truth, &full),
    );
    let fitted_levels = exposure_level_propensities(&exposure.params);
    let true_levels = exposure_level_propensities(&exposure_truth);
    let exposure_response_rates = [false, true]
        .into_iter()
        .enumerate()
        .map(|(level, value)| ExposureResponseRate {
            exposure: u8::from(value),
            fitted: fitted_levels[level],
            truth: true_levels[level],
            empirical: full.exposure_observed_rate_given(value),
        })
        .collect();
    let complete_cases = partial.subset(&partial.rows_with_exposure_observed());
    let exposure_complete_cases = compare_probabilities(
        &predict_exposure_for_partial(&exposure.params, &complete_cases),
        &predict_exposure_for_partial(&exposure_truth, &complete_cases),
    );

    let benchmark =
        fit_outcome_missingness_benchmark(&full, &config.benchmark).map_err(|e| e.to_string())?;
    let observed_outcomes = full.subset(&partial.rows_with_outcome_observed());
    let observed_design =
        outcome_missingness_design(observed_outcomes.w2(), observed_outcomes.outcome());
    let benchmark_probs = benchmark
        .predict(observed_design.view())
        .map_err(|e| e.to_string())?;
    let outcome_vs_benchmark = compare_probabilities(
        &predict_outcome_for_full(&outcome.params, &observed_outcomes),
        &benchmark_probs,
    );

    let report = RunReport {
        size: args.size,
        seed: args.seed,
        full: full.summary(),
        partial: partial.summary(),
        exposure,
        exposure_truth,
        exposure_vs_truth,
        exposure_response_rates,
        exposure_complete_cases,
        outcome,
        outcome_truth,
        benchmark_coefficients: benchmark.coefficients().to_vec(),
        outcome_vs_benchmark,
    };

    if args.json {
        let text = serde_json::to_string_pretty(&report)
            .map_err(|e| format!("failed to serialize report: {e}"))?;
        println!("{text}");
        return Ok(());
    }

    println!("Dataset proportions (n = {}, seed = {}):", report.size, report.seed);
    println!("{}", summary_table(&report.full, &report.partial));

    let mut params = Vec::new();
    push_parameter_rows(
        &mut params,
        "exposure",
        &report.exposure.params,
        Some(&report.exposure_truth),
    );
    push_parameter_rows(
        &mut params,
        "outcome",
        &report.outcome.params,
        Some(&report.outcome_truth),
    );
    println!("Missingness model roots:");
    println!("{}", parameter_table(&params));
    let mut table = fit_table();
    table.add_row(fit_row("exposure", &report.exposure));
    table.add_row(fit_row("outcome", &report.outcome));
    println!("{table}");

    let names = ["(Intercept)", "Y", "W2"];
    let mut table = new_table(vec!["Benchmark term", "Coefficient"]);
    for (name, coef) in names.iter().zip(report.benchmark_coefficients.iter()) {
        table.add_row(Row::from(vec![
            Cell::new(name),
            Cell::new(format!("{coef:.6}")),
        ]));
    }
    println!("Benchmark logistic regression R_Y ~ Y + W2 (full data):");
    println!("{table}");

    let mut table = new_table(vec![
        "Comparison",
        "Rows",
        "Mean fitted",
        "Mean reference",
        "Mean |diff|",
        "Max |diff|",
    ]);
    for (label, cmp) in [
        ("P(R_A=1|A) vs truth", &report.exposure_vs_truth),
        (
            "P(R_A=1|A) vs truth, R_A=1 rows",
            &report.exposure_complete_cases,
        ),
        ("P(R_Y=1|Y,W2) vs benchmark", &report.outcome_vs_benchmark),
    ] {
        table.add_row(Row::from(vec![
            Cell::new(label),
            Cell::new(cmp.rows),
            Cell::new(format!("{:.4}", cmp.mean_fitted)),
            Cell::new(format!("{:.4}", cmp.mean_reference)),
            Cell::new(format!("{:.4}", cmp.mean_abs_difference)),
            Cell::new(format!("{:.4}", cmp.max_abs_difference)),
        ]));
    }
    println!("Fitted probabilities:");
    println!("{table}");

    let mut table = new_table(vec!["Quantity", "Fitted", "Truth", "Empirical (full data)"]);
    for rate in &report.exposure_response_rates {
        table.add_row(Row::from(vec![
            Cell::new(format!("P(R_A=1|A={})", rate.exposure)),
            Cell::new(format!("{:.4}", rate.fitted)),
            Cell::new(format!("{:.4}", rate.truth)),
            Cell::new(
                rate.empirical
                    .map_or_else(|| "-".to_string(), |v| format!("{v:.4}")),
            ),
        ]));
    }
    println!("Exposure response rates:");
    println!("{table}");
    Ok(())
}

fn run_generate(args: GenerateArgs) -> Result<(), String> {
    let (full, partial) = generate_seeded(args.size, args.seed).map_err(|e| e.to_string())?;
    fs::create_dir_all(&args.out_dir).map_err(|e| {
        format!(
            "failed to create output directory '{}': {e}",
            args.out_dir.display()
        )
    })?;
    let full_path = args.out_dir.join("full.csv");
    let partial_path = args.out_dir.join("partial.csv");
    write_full_csv(&full_path, &full).map_err(|e| e.to_string())?;
    write_partial_csv(&partial_path, &partial).map_err(|e| e.to_string())?;
    println!(
        "wrote {} rows to {} and {}",
        full.len(),
        full_path.display(),
        partial_path.display()
    );
    Ok(())
}

fn run_estimate(args: EstimateArgs) -> Result<(), String> {
    let config = load_config(args.config.as_deref())?;
    let partial: PartialDataset =
        read_partial_csv_for(&args.data, args.model.columns()).map_err(|e| e.to_string())?;
    println!("{}", partial_summary_table(&partial));

    let mut params = Vec::new();
    let exposure = if args.model.includes_exposure() {
        let fit = fit_exposure_missingness(&partial, config.exposure_initial, &config.solver)
            .map_err(|e| e.to_string())?;
        push_parameter_rows(&mut params, "exposure", &fit.params, None);
        let levels = exposure_level_propensities(&fit.params);
        let complete_cases = partial.subset(&partial.rows_with_exposure_observed());
        let weights = predict_exposure_for_partial(&fit.params, &complete_cases);
        let mut table = new_table(vec!["Quantity", "Fitted"]);
        for (label, v) in [
            ("P(R_A=1|A=0)", levels[0]),
            ("P(R_A=1|A=1)", levels[1]),
            (
                "mean P(R_A=1|A), R_A=1 rows",
                weights.mean().unwrap_or(f64::NAN),
            ),
        ] {
            table.add_row(Row::from(vec![Cell::new(label), Cell::new(format!("{v:.4}"))]));
        }
        println!("Exposure response rates:");
        println!("{table}");
        Some(fit)
    } else {
        None
    };
    let outcome = if args.model.includes_outcome() {
        let fit = fit_outcome_missingness(&partial, config.outcome_initial, &config.solver)
            .map_err(|e| e.to_string())?;
        push_parameter_rows(&mut params, "outcome", &fit.params, None);
        Some(fit)
    } else {
        None
    };

    println!("Missingness model roots:");
    println!("{}", parameter_table(&params));
    let mut table = fit_table();
    if let Some(fit) = &exposure {
        table.add_row(fit_row("exposure", fit));
    }
    if let Some(fit) = &outcome {
        table.add_row(fit_row("outcome", fit));
    }
    println!("{table}");
    Ok(())
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

struct ParameterRow {
    model: &'static str,
    name: &'static str,
    estimate: f64,
    truth: Option<f64>,
}

fn push_parameter_rows<P: ParameterVector>(
    rows: &mut Vec<ParameterRow>,
    model: &'static str,
    params: &P,
    truth: Option<&P>,
) {
    let estimate = params.to_array();
    let truth = truth.map(|t| t.to_array());
    for (j, &name) in P::NAMES.iter().enumerate() {
        rows.push(ParameterRow {
            model,
            name,
            estimate: estimate[j],
            truth: truth.as_ref().map(|t| t[j]),
        });
    }
}

fn parameter_table(rows: &[ParameterRow]) -> Table {
    let with_truth = rows.iter().any(|r| r.truth.is_some());
    let mut header = vec!["Model", "Parameter", "Estimate"];
    if with_truth {
        header.push("Truth");
    }
    let mut table = new_table(header);
    for r in rows {
        let mut cells = vec![
            Cell::new(r.model),
            Cell::new(r.name),
            Cell::new(format!("{:.6}", r.estimate)),
        ];
        if with_truth {
            cells.push(Cell::new(
                r.truth.map_or_else(|| "-".to_string(), |t| format!("{t:.6}")),
            ));
        }
        table.add_row(Row::from(cells));
    }
    table
}

fn fit_row<P>(model: &str, fit: &MissingnessFit<P>) -> Row {
    Row::from(vec![
        Cell::new(model),
        Cell::new(fit.iterations),
        Cell::new(fit.function_evaluations),
        Cell::new(format!("{:.3e}", fit.residual_norm)),
        Cell::new(fit.contributing_rows),
    ])
}

fn fit_table() -> Table {
    new_table(vec![
        "Model",
        "Iterations",
        "Evaluations",
        "|F|",
        "Contributing rows",
    ])
}

fn summary_table(full: &DatasetSummary, partial: &DatasetSummary) -> Table {
    let mut table = new_table(vec!["Quantity", "Full data", "Observed data"]);
    for (label, f, p) in [
        ("P(A=1)", full.exposure_rate, partial.exposure_rate),
        ("P(Y=1)", full.outcome_rate, partial.outcome_rate),
        (
            "P(R_A=1)",
            full.exposure_observed_rate,
            partial.exposure_observed_rate,
        ),
        (
            "P(R_Y=1)",
            full.outcome_observed_rate,
            partial.outcome_observed_rate,
        ),
    ] {
        table.add_row(Row::from(vec![
            Cell::new(label),
            Cell::new(format!("{f:.4}")),
            Cell::new(format!("{p:.4}")),
        ]));
    }
    table
}

fn partial_summary_table(data: &PartialDataset) -> Table {
    let summary = data.summary();
    let mut table = new_table(vec!["Quantity", "Observed data"]);
    for (label, count) in [
        ("rows", summary.rows),
        ("rows with A observed", data.observed_exposure_count()),
        ("rows with Y observed", data.observed_outcome_count()),
    ] {
        table.add_row(Row::from(vec![Cell::new(label), Cell::new(count)]));
    }
    for (label, v) in [
        ("P(A=1 | R_A=1)", summary.exposure_rate),
        ("P(Y=1 | R_Y=1)", summary.outcome_rate),
        ("P(R_A=1)", summary.exposure_observed_rate),
        ("P(R_Y=1)", summary.outcome_observed_rate),
    ] {
        table.add_row(Row::from(vec![Cell::new(label), Cell::new(format!("{v:.4}"))]));
    }
    table
}
