use anyhow::{Context, Result};
use clap::Parser;
use graphql_load::{
    AuthConfig, Credentials, LoadTest, QueryCatalog, ReqwestTransport, RunSettings,
    ScenarioRegistry,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

// =============================================================================
// Configuration
// =============================================================================

#[derive(Parser, Debug)]
#[command(name = "graphql-load")]
#[command(about = "GraphQL endpoint load generator", long_about = None)]
struct Config {
    /// GraphQL endpoint
    #[arg(long, env = "TARGET_URL", default_value = "http://localhost:4000/graphql")]
    endpoint: Url,

    /// Login endpoint returning the bearer token
    #[arg(long, env = "AUTH_URL", default_value = "http://localhost:4000/auth/login")]
    auth_url: Url,

    /// Login username
    #[arg(long, env = "AUTH_USERNAME", default_value = "loadtest")]
    username: String,

    /// Login password
    #[arg(long, env = "AUTH_PASSWORD", default_value = "loadtest", hide_env_values = true)]
    password: String,

    /// Dotted path to the token in the login response
    #[arg(long, env = "AUTH_TOKEN_FIELD", default_value = "token")]
    token_field: String,

    /// Scenario name (smoke, load, stress, spike, soak); all run in order if omitted
    #[arg(long, env = "SCENARIO")]
    scenario: Option<String>,

    /// Query name from the catalog, used for every iteration
    #[arg(long, env = "QUERY", default_value = "typename")]
    query: String,

    /// Query catalog JSON file
    #[arg(long, env = "QUERY_CATALOG", default_value = "queries.json")]
    catalog: PathBuf,

    /// Pause between iterations in milliseconds
    #[arg(long, env = "THINK_TIME_MS", default_value = "1000")]
    think_time_ms: u64,

    /// Timeout for steady-state requests in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "30")]
    request_timeout_secs: u64,

    /// Timeout for the login request in seconds
    #[arg(long, env = "AUTH_TIMEOUT", default_value = "60")]
    auth_timeout_secs: u64,

    /// How often the executor reconciles VU count against the profile, in milliseconds
    #[arg(long, env = "RECONCILE_INTERVAL_MS", default_value = "100")]
    reconcile_interval_ms: u64,

    /// Write the JSON summary to this file
    #[arg(long, env = "SUMMARY_EXPORT")]
    summary_export: Option<PathBuf>,

    /// Print the registered scenarios and exit
    #[arg(long)]
    list_scenarios: bool,
}

impl Config {
    fn settings(&self) -> RunSettings {
        RunSettings {
            endpoint: self.endpoint.clone(),
            auth: AuthConfig {
                url: self.auth_url.clone(),
                credentials: Credentials {
                    username: self.username.clone(),
                    password: self.password.clone(),
                },
                token_field: self.token_field.clone(),
                timeout: Duration::from_secs(self.auth_timeout_secs),
            },
            scenario: self.scenario.clone(),
            query: self.query.clone(),
            think_time: Duration::from_millis(self.think_time_ms),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms.max(1)),
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    let registry = ScenarioRegistry::builtin();

    if config.list_scenarios {
        for scenario in registry.iter() {
            println!("{:<8} {}", scenario.name, scenario.profile);
        }
        return Ok(());
    }

    // Print banner
    info!("════════════════════════════════════════════════════════════");
    info!("              GRAPHQL LOAD TEST (Rust)");
    info!("════════════════════════════════════════════════════════════");
    info!(
        "Scenario: {}",
        config.scenario.as_deref().unwrap_or("all (sequential)")
    );
    info!("Query: {}", config.query);
    info!("Endpoint: {}", config.endpoint);
    info!("Auth: {}", config.auth_url);
    info!("Think time: {}ms", config.think_time_ms);

    // Load queries
    let catalog = if config.catalog.exists() {
        QueryCatalog::load_from_file(&config.catalog)?
    } else {
        warn!("Query catalog {:?} not found", config.catalog);
        QueryCatalog::builtin()
    };

    info!("Queries: {}", catalog.names().collect::<Vec<_>>().join(", "));
    info!("════════════════════════════════════════════════════════════");

    // Run test
    let test = LoadTest::new(config.settings(), Arc::new(ReqwestTransport::new()), catalog)
        .with_registry(registry);
    let report = test.run().await.context("Load test aborted")?;

    // Print summary
    println!("{}", report.rendered.text);

    if let Some(path) = &config.summary_export {
        std::fs::write(path, &report.rendered.json)
            .context(format!("Failed to write summary to {:?}", path))?;
        info!("Summary written to {:?}", path);
    }

    info!("════════════════════════════════════════════════════════════");
    info!("                 LOAD TEST COMPLETE");
    info!("════════════════════════════════════════════════════════════");

    Ok(())
}
