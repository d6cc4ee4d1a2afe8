use anyhow::Result;
use facegate_core::detector::FaceDetector;
use facegate_core::extractor::EmbeddingExtractor;
use facegate_core::matcher::Matcher;
use facegate_core::mock::{MockDetector, MockExtractor};
use facegate_core::{ArcFaceExtractor, CosineMatcher, FirstEntryMatcher, ScrfdDetector};
use facegated::config::{Backend, Config};
use facegated::{engine, http};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        backend = ?config.backend,
        threshold = config.similarity_threshold,
        "facegated starting"
    );

    let (detector, extractor, matcher): (
        Box<dyn FaceDetector>,
        Box<dyn EmbeddingExtractor>,
        Box<dyn Matcher>,
    ) = match config.backend {
        Backend::Onnx => (
            Box::new(ScrfdDetector::load(&config.scrfd_model_path())?),
            Box::new(ArcFaceExtractor::load(&config.arcface_model_path())?),
            Box::new(CosineMatcher),
        ),
        Backend::Mock => {
            tracing::warn!("mock backend selected — responses are deterministic fixtures");
            (
                Box::new(MockDetector::new()),
                Box::new(MockExtractor),
                Box::new(FirstEntryMatcher),
            )
        }
    };

    let engine = engine::spawn_engine(
        detector,
        extractor,
        matcher,
        config.liveness,
        config.similarity_threshold,
        config.request_timeout,
    )?;

    let app = http::router(engine);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "facegated ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("facegated shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install ctrl-c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}
