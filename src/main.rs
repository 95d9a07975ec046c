use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use agent_ledger::agents::AgentConfig;
use agent_ledger::clock::SystemClock;
use agent_ledger::config::Config;
use agent_ledger::domain::repositories::EventStorage;
use agent_ledger::event_log::EventLog;
use agent_ledger::infrastructure::repositories::{InMemoryEventStorage, PostgresEventStorage};
use agent_ledger::runtime::AgentRuntime;

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agent_ledger=info")),
        )
        .init();

    let config = Config::from_env().expect("Invalid configuration");

    let storage: Arc<dyn EventStorage> = match &config.database_url {
        Some(database_url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .expect("Failed to connect to database");

            let storage = PostgresEventStorage::new(pool);
            storage.migrate().await.expect("Failed to run migrations");
            tracing::info!("Database connected successfully");
            Arc::new(storage)
        }
        None => Arc::new(InMemoryEventStorage::new()),
    };

    let log = Arc::new(EventLog::new(
        storage,
        Arc::new(SystemClock),
        config.event_log_config(),
    ));
    let runtime = AgentRuntime::new(log, config.scheduler_config(), config.poll_interval);

    for agent_id in &config.agents {
        runtime
            .register_agent(AgentConfig::new(agent_id.clone(), Vec::new()))
            .await
            .expect("Failed to register agent");
    }

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    runtime.run(shutdown).await.expect("Driver loop failed");
}
