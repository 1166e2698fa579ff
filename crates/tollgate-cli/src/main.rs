//! Tollgate CLI
//!
//! Offline tooling for dataset documents: validate them, show how a query is
//! rewritten, and list the declared allocation policies.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tollgate_core::document::document_paths;
use tollgate_core::{DatasetDocument, TenantContext};
use tollgate_engine::{ActivatedDataset, QueryRequest};
use tollgate_policy::PolicyStoreConfig;
use tollgate_query::QueryParser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tollgate")]
#[command(version, about = "Tollgate dataset tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a dataset document, or every document in a directory
    Validate {
        /// Path to a YAML document or a directory of them
        path: PathBuf,
    },

    /// Show how a query is rewritten for a dataset
    Explain {
        /// Path to the dataset document
        file: PathBuf,

        /// SQL to explain
        #[arg(long)]
        sql: String,

        /// Organization the query runs for
        #[arg(long)]
        organization_id: Option<u64>,

        /// Project the query runs for
        #[arg(long)]
        project_id: Option<u64>,

        /// Referrer tag of the caller
        #[arg(long)]
        referrer: Option<String>,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the allocation policies of a dataset with their effective config
    Policies {
        /// Path to the dataset document
        file: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Validate { path } => validate(&path),
        Commands::Explain {
            file,
            sql,
            organization_id,
            project_id,
            referrer,
            json,
        } => {
            let mut tenant = TenantContext::new();
            tenant.organization_id = organization_id;
            tenant.project_id = project_id;
            tenant.referrer = referrer;
            explain(&file, &sql, tenant, json)
        }
        Commands::Policies { file, json } => list_policies(&file, json),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Load and fully activate a document, the same way the server does
fn activate(path: &Path) -> Result<ActivatedDataset, Box<dyn std::error::Error>> {
    let definition = DatasetDocument::from_yaml_file(path)?.into_definition()?;
    Ok(ActivatedDataset::activate(
        definition,
        &PolicyStoreConfig::default(),
        None,
    )?)
}

fn validate(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let paths = if path.is_dir() {
        document_paths(path)?
    } else {
        vec![path.to_path_buf()]
    };
    if paths.is_empty() {
        return Err(format!("No dataset documents found in '{}'", path.display()).into());
    }

    let mut failures = 0;
    for path in &paths {
        match activate(path) {
            Ok(dataset) => {
                let summary = dataset.summary();
                println!(
                    "OK    {} ({}): {} columns, {} processors, {} checkers, {} policies",
                    summary.name,
                    path.display(),
                    summary.columns.len(),
                    summary.query_processors.len(),
                    summary.mandatory_condition_checkers.len(),
                    summary.allocation_policies.len(),
                );
            }
            Err(e) => {
                failures += 1;
                println!("FAIL  {}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        return Err(format!("{} of {} documents invalid", failures, paths.len()).into());
    }
    Ok(())
}

fn explain(
    file: &Path,
    sql: &str,
    tenant: TenantContext,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = activate(file)?;
    let plan = dataset.plan(&QueryParser::new(), &QueryRequest::new(sql, tenant))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    println!("Dataset:    {}", plan.dataset);
    println!("Table:      {}", plan.table);
    println!("Processors: {}", plan.processors.join(" -> "));
    println!("Checkers:   {}", plan.checkers.join(", "));
    println!();
    println!("{}", plan.sql);
    if !plan.settings.is_empty() {
        println!();
        println!("Settings:");
        for (key, value) in &plan.settings {
            println!("  {} = {}", key, value);
        }
    }
    Ok(())
}

fn list_policies(file: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = activate(file)?;
    let descriptions: Vec<_> = dataset
        .policies()
        .policies()
        .iter()
        .map(|p| p.describe())
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&descriptions)?);
        return Ok(());
    }

    if descriptions.is_empty() {
        println!("No allocation policies declared");
        return Ok(());
    }
    for description in descriptions {
        let tenant_types: Vec<String> = description
            .required_tenant_types
            .iter()
            .map(|t| t.to_string())
            .collect();
        println!(
            "{} [{}] keyed by ({})",
            description.name,
            description.mode,
            tenant_types.join(", ")
        );
        for definition in &description.definitions {
            println!(
                "  {:<32} {:>16}  {}",
                definition.name,
                description.config.get(definition.name),
                definition.description
            );
        }
    }
    Ok(())
}
