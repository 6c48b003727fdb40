use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tonic::transport::Server as GrpcServer;
use tonic_health::server::health_reporter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use webhook_service::config::Config;
use webhook_service::consumer::ConsumerPool;
use webhook_service::db;
use webhook_service::dispatcher::HttpDispatcher;
use webhook_service::grpc::webhookify::v1::webhook_service_server::WebhookServiceServer;
use webhook_service::grpc::WebhookServiceImpl;
use webhook_service::metrics::Metrics;
use webhook_service::outbox::OutboxWorker;
use webhook_service::publisher::KafkaEventPublisher;
use webhook_service::registration::RegistrationService;
use webhook_service::store::Store;

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,webhook_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting webhook-service");

    let config = Config::load().context("failed to load configuration")?;
    config.log_config();

    let pool = db::create_pool(&config.database_url)
        .await
        .context("failed to create database pool")?;
    db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let registry = Registry::new();
    let metrics = Metrics::new(&registry);

    let ready_pool = pool.clone();
    let store = Arc::new(Store::new(pool));
    let publisher = Arc::new(
        KafkaEventPublisher::new(&config.kafka_brokers, config.kafka_topic.clone())
            .context("failed to create Kafka publisher")?,
    );
    let dispatcher = Arc::new(HttpDispatcher::new(store.clone(), metrics.clone()));
    let registration = Arc::new(RegistrationService::new((*store).clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let outbox_worker = OutboxWorker::new(
        store.clone(),
        publisher.clone(),
        dispatcher.clone(),
        metrics.clone(),
    );
    let outbox_shutdown = shutdown_rx.clone();
    let outbox_handle = tokio::spawn(async move {
        outbox_worker.run(outbox_shutdown).await;
    });

    let consumer_pool = ConsumerPool::new(
        config.kafka_brokers.clone(),
        config.kafka_topic.clone(),
        config.kafka_group_id.clone(),
        config.consumer_workers,
        dispatcher.clone(),
    );
    let consumer_shutdown = shutdown_rx.clone();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer_pool.run(consumer_shutdown).await {
            tracing::error!(error = %e, "consumer pool exited with error");
        }
    });

    let grpc_addr: std::net::SocketAddr = format!("0.0.0.0:{}", config.grpc_port)
        .parse()
        .context("invalid gRPC bind address")?;
    let webhook_service = WebhookServiceImpl::new(registration);
    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc_handle = tokio::spawn(async move {
        let (mut health, health_service) = health_reporter();
        health
            .set_serving::<WebhookServiceServer<WebhookServiceImpl>>()
            .await;

        tracing::info!("starting gRPC server on {grpc_addr}");
        let serve = GrpcServer::builder()
            .add_service(health_service)
            .add_service(webhook_service.into_server())
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.changed().await;
            });

        if let Err(e) = serve.await {
            tracing::error!(error = %e, "gRPC server error");
        }
    });

    let http_port = config.http_port;
    let metrics_registry = registry.clone();
    let http_handle = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(metrics_registry.clone()))
            .app_data(web::Data::new(ready_pool.clone()))
            .route("/health", web::get().to(health))
            .route("/ready", web::get().to(ready))
            .route("/metrics", web::get().to(metrics_endpoint))
    })
    .bind(("0.0.0.0", http_port))
    .context("failed to bind HTTP server")?
    .run();
    let http_server_handle = http_handle.handle();
    let http_join = tokio::spawn(http_handle);

    wait_for_shutdown_signal().await;
    tracing::info!("shutdown signal received, stopping activities");
    let _ = shutdown_tx.send(true);
    http_server_handle.stop(true).await;

    let _ = outbox_handle.await;
    let _ = consumer_handle.await;
    let _ = grpc_handle.await;
    let _ = http_join.await;

    tracing::info!("webhook-service stopped cleanly");
    Ok(())
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn ready(pool: web::Data<sqlx::PgPool>) -> HttpResponse {
    match sqlx::query("SELECT 1").execute(pool.get_ref()).await {
        Ok(_) => HttpResponse::Ok().body("READY"),
        Err(e) => {
            tracing::warn!(error = %e, "readiness check failed");
            HttpResponse::ServiceUnavailable().body("NOT READY")
        }
    }
}

async fn metrics_endpoint(registry: web::Data<Registry>) -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
