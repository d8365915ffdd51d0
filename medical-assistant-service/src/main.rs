use medical_assistant_service::{
    AppConfig, AppState, create_app,
    config::StorageConfig,
    llm::{LlmClient, OpenRouterClient},
    storage::{
        HealthStore, InMemoryHealthStore, ObjectStore, PostgresHealthStore, SupabaseObjectStore,
    },
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "medical_assistant_service=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    let llm: Arc<dyn LlmClient> = Arc::new(OpenRouterClient::new(&config.llm)?);
    let store = create_health_store(&config.storage).await?;
    let objects = create_object_store(&config.storage)?;

    let state = AppState::new(llm, store, objects, config.models.clone());
    let app = create_app(state, &config.cors_origin)?;

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    let addr = listener.local_addr()?;

    info!("Medical Assistant Service starting on {}", addr);
    info!("Health check endpoint: http://{}/health", addr);
    info!("Chat endpoint: POST http://{}/doctor/chat-ai", addr);
    info!("Region analysis endpoint: POST http://{}/chronic-disease", addr);
    info!("Patient analysis endpoint: POST http://{}/analysis", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn create_health_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn HealthStore>> {
    match &config.database_url {
        Some(url) => {
            info!("Using PostgreSQL health store");
            let store = PostgresHealthStore::connect(url, config.max_connections).await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("Using in-memory health store (set DATABASE_URL to use PostgreSQL)");
            Ok(Arc::new(InMemoryHealthStore::new()))
        }
    }
}

fn create_object_store(config: &StorageConfig) -> anyhow::Result<Option<Arc<dyn ObjectStore>>> {
    match &config.object_storage_url {
        Some(url) => {
            let store = SupabaseObjectStore::new(
                url,
                config.object_storage_key.clone(),
                config.download_timeout,
            )?;
            Ok(Some(Arc::new(store)))
        }
        None => {
            warn!("SUPABASE_URL not set, image analysis is disabled");
            Ok(None)
        }
    }
}
