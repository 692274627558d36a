use anyhow::{Context, bail};
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use stratamatch::{BalanceConfig, CatalogSchema, DesignConfig, Matcher, load_catalog_from_parquet};

/// Run file: column roles, design and balance settings
#[derive(Debug, Deserialize)]
#[serde(default)]
struct RunConfig {
    id_column: String,
    treatment_column: String,
    covariates: Vec<String>,
    design: DesignConfig,
    balance: BalanceConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            id_column: "id".to_string(),
            treatment_column: "treated".to_string(),
            covariates: Vec::new(),
            design: DesignConfig::default(),
            balance: BalanceConfig::default(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        bail!("usage: {} <units.parquet> <design.json> [out_prefix]", args[0]);
    }
    let units_path = Path::new(&args[1]);
    let config_path = Path::new(&args[2]);
    let out_prefix = args.get(3).map_or_else(|| PathBuf::from("design"), PathBuf::from);

    let start = Instant::now();

    let raw = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read run file {}", config_path.display()))?;
    let run: RunConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse run file {}", config_path.display()))?;
    run.design.validate()?;
    info!("{}", run.design.to_string_representation());

    let schema =
        CatalogSchema::new(&run.id_column, &run.treatment_column).with_covariates(&run.covariates);
    let catalog = load_catalog_from_parquet(units_path, &schema)
        .with_context(|| format!("Failed to load units from {}", units_path.display()))?;

    let result = Matcher::new(run.design).perform_matching(&catalog)?;
    println!("{}", result.design.to_string_representation());

    let report = Matcher::assess_balance(&catalog, &result.design, &run.balance)?;
    println!("{}", report.to_string_representation());

    let design_csv = out_prefix.with_extension("strata.csv");
    let balance_csv = out_prefix.with_extension("balance.csv");
    result.design.write_to_csv(&design_csv)?;
    report.write_to_csv(&balance_csv)?;

    info!(
        "Wrote {} and {} in {:.2?}",
        design_csv.display(),
        balance_csv.display(),
        start.elapsed()
    );

    Ok(())
}
