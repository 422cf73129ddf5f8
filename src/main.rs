mod api;
mod dao;
mod model;
mod service;

use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

use crate::api::endpoints::configure;
use crate::api::middleware::timing_middleware;
use crate::api::state::AppState;
use crate::dao::consumption::ConsumptionDao;
use crate::model::apperror::{ApplicationError, ErrorType};
use crate::model::config::{ApplicationArguments, Config, Database, DatabaseType, HttpsConfig, LoggingConfig};
use crate::service::consumption::ConsumptionService;

use actix_web::middleware::from_fn;
use actix_web::{App, HttpServer, web};
use actix_web_prom::{PrometheusMetrics, PrometheusMetricsBuilder};
use clap::Parser;
use prometheus::IntGauge;
use rustls::pki_types::PrivateKeyDer;
use rustls::{ServerConfig, SupportedProtocolVersion};
use rustls_pemfile::{certs, pkcs8_private_keys};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Pool, Sqlite, pool};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/**
 * Main entry point for the application.
 */
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let args = ApplicationArguments::parse();

    let config = get_config(&args.config_file)?;

    init_tracing(&config.logging)?;

    let connection_pool = get_connection_pool(&config.database).await?;
    sqlx::migrate!("./migrations")
        .run(&connection_pool)
        .await
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to run database migrations: {err}")))?;
    tracing::info!("Database ready");

    let consumption_dao = ConsumptionDao::new();
    let consumption_service = ConsumptionService::new(consumption_dao, connection_pool.clone());

    let state = web::Data::new(AppState::new(consumption_service));

    let prometheus = PrometheusMetricsBuilder::new("consumption_api")
        .endpoint("/metrics")
        .mask_unmatched_patterns("UNKNOWN")
        .build()
        .map_err(|err| std::io::Error::other(format!("Failed to create Prometheus metrics: {err}")))?;

    // Initialize custom metrics
    let max_connections_gauge = IntGauge::new("max_connections", "Connection pool maximum").map_err(|err| std::io::Error::other(format!("Failed to create max_connections gauge: {err}")))?;
    let min_connections_gauge = IntGauge::new("min_connections", "Connection pool minimum").map_err(|err| std::io::Error::other(format!("Failed to create min_connections gauge: {err}")))?;
    let active_connections_gauge = IntGauge::new("active_connections", "Connection pool active").map_err(|err| std::io::Error::other(format!("Failed to create active_connections gauge: {err}")))?;
    let idle_connections_gauge = IntGauge::new("idle_connections", "Connection pool idle").map_err(|err| std::io::Error::other(format!("Failed to create idle_connections gauge: {err}")))?;
    //Register custom prometheus metrics
    register_prometheus_metrics(&prometheus, &max_connections_gauge)?;
    register_prometheus_metrics(&prometheus, &min_connections_gauge)?;
    register_prometheus_metrics(&prometheus, &active_connections_gauge)?;
    register_prometheus_metrics(&prometheus, &idle_connections_gauge)?;

    gather_db_metrics(max_connections_gauge, min_connections_gauge, active_connections_gauge, idle_connections_gauge, connection_pool);

    if config.server.http_port.is_none() && config.server.https_config.is_none() {
        return Err(std::io::Error::other("Either httpPort or httpsConfig must be configured"));
    }

    let server_init = HttpServer::new(move || {
        App::new()
            .wrap(prometheus.clone())
            .wrap(from_fn(timing_middleware))
            .app_data(state.clone())
            .configure(configure)
    });

    let host = config.server.host.as_str();
    let server_init = if let Some(http_port) = &config.server.http_port {
        tracing::info!("Listening for http on {}:{}", host, http_port);
        server_init.bind((host, *http_port))?
    } else {
        server_init
    };
    let server_init = if let Some(https_config) = &config.server.https_config {
        let ssl_builder = ssl_builder(https_config)?;
        tracing::info!("Listening for https on {}:{}", host, https_config.port);
        server_init.bind_rustls_0_23((host, https_config.port), ssl_builder).map_err(|err| std::io::Error::other(format!("Failed to bind HTTPS server: {err}")))?
    } else {
        server_init
    };

    server_init.workers(config.server.workers).run().await
}

/**
 * Initializes tracing for the application.
 *
 * Log level is taken from `RUST_LOG` (info by default) refined by the configured directives.
 * Logs go to stdout and, if enabled, are also appended to the configured log file.
 *
 * #Arguments
 * `logging`: The logging configuration.
 *
 * #Returns
 * A `Result` indicating success or failure.
 */
fn init_tracing(logging: &LoggingConfig) -> Result<(), std::io::Error> {
    let mut env_filter = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into()).from_env_lossy();
    for directive in &logging.directives {
        env_filter = env_filter.add_directive(directive.parse().map_err(|err| std::io::Error::other(format!("Invalid logging directive {directive}: {err}")))?);
    }

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(logging.target)
        .with_thread_ids(logging.thread_ids)
        .with_thread_names(logging.thread_names)
        .with_line_number(logging.line_number)
        .with_level(logging.level)
        .with_ansi(logging.ansi);

    let file_layer = if logging.file {
        let logfile = OpenOptions::new().create(true).append(true).open(&logging.logfile).map_err(|err| std::io::Error::other(format!("Failed to open log file {}: {err}", logging.logfile)))?;
        Some(
            tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(logfile))
                .with_target(logging.target)
                .with_thread_ids(logging.thread_ids)
                .with_thread_names(logging.thread_names)
                .with_line_number(logging.line_number)
                .with_level(logging.level)
                .with_ansi(false),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .map_err(|err| std::io::Error::other(format!("Failed to initialize tracing: {err}")))?;

    Ok(())
}

/**
 * Creates the database connection pool.
 *
 * #Arguments
 * `database`: The database configuration.
 *
 * #Returns
 * A `Result` containing the connection pool or an `ApplicationError` if the database cannot be opened.
 */
async fn get_connection_pool(database: &Database) -> Result<Pool<Sqlite>, ApplicationError> {
    match &database.db_type {
        DatabaseType::Sqlite { connection_string, max_connections, min_connections, acquire_timeout, idle_timeout, max_lifetime } => {
            let connect_options = SqliteConnectOptions::from_str(connection_string)
                .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Invalid database connection string: {err}")))?
                .create_if_missing(true);
            pool::PoolOptions::new()
                .max_connections(*max_connections)
                .min_connections(*min_connections)
                .acquire_timeout(Duration::from_millis(*acquire_timeout))
                .idle_timeout(Duration::from_millis(*idle_timeout))
                .max_lifetime(Duration::from_millis(*max_lifetime))
                .connect_with(connect_options)
                .await
                .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create database pool: {err}")))
        }
    }
}

/**
 * Registers custom Prometheus metrics.
 *
 * #Arguments
 * `prometheus_metrics`: The Prometheus metrics instance to register the gauge with.
 * `gauge`: The gauge to register.
 */
fn register_prometheus_metrics(prometheus_metrics: &PrometheusMetrics, gauge: &IntGauge) -> Result<(), std::io::Error> {
    prometheus_metrics.registry.register(Box::new(gauge.clone())).map_err(|err| std::io::Error::other(format!("Failed to register Prometheus gauge: {err}")))?;
    Ok(())
}

/**
 * Samples connection pool metrics once per second in a background task.
 *
 * #Arguments
 * `max_connections_gauge`: Gauge for maximum connections.
 * `min_connections_gauge`: Gauge for minimum connections.
 * `active_connections_gauge`: Gauge for active connections.
 * `idle_connections_gauge`: Gauge for idle connections.
 * `connection_pool`: The connection pool to gather metrics from.
 */
fn gather_db_metrics(max_connections_gauge: IntGauge, min_connections_gauge: IntGauge, active_connections_gauge: IntGauge, idle_connections_gauge: IntGauge, connection_pool: Pool<Sqlite>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            max_connections_gauge.set(i64::from(connection_pool.options().get_max_connections()));
            min_connections_gauge.set(i64::from(connection_pool.options().get_min_connections()));
            active_connections_gauge.set(i64::from(connection_pool.size()));
            #[allow(clippy::cast_possible_wrap)]
            idle_connections_gauge.set(connection_pool.num_idle() as i64);
        }
    });
}

/**
 * Initializes the SSL/TLS configuration for the server.
 *
 * #Arguments
 * `https_config`: The HTTPS configuration containing the certificate and private key files.
 *
 * #Returns
 * A `Result` containing the initialized `ServerConfig` or an `ApplicationError` if initialization fails.
 */
fn ssl_builder(https_config: &HttpsConfig) -> Result<ServerConfig, ApplicationError> {
    let config_builder = ServerConfig::builder_with_protocol_versions(&get_protocol_versions());
    let cert_file = &mut std::io::BufReader::new(
        std::fs::File::open(&https_config.certificate_file).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to read certificate file: {err}")))?,
    );
    let key_file = &mut std::io::BufReader::new(
        std::fs::File::open(&https_config.private_key_file).map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to read private key file: {err}")))?,
    );
    let cert_chain = certs(cert_file).collect::<Result<Vec<_>, _>>().map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to convert certificate to der: {err}")))?;
    let key = pkcs8_private_keys(key_file)
        .next()
        .ok_or_else(|| ApplicationError::new(ErrorType::Initialization, "No PKCS#8 private key found".to_string()))?
        .map(PrivateKeyDer::Pkcs8)
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to convert private key to der: {err}")))?;
    config_builder
        .with_no_client_auth()
        .with_single_cert(cert_chain, key)
        .map_err(|err| ApplicationError::new(ErrorType::Initialization, format!("Failed to create server config: {err}")))
}

/**
 * Returns the supported TLS protocol versions.
 *
 * #Returns
 * A vector of supported protocol versions.
 */
fn get_protocol_versions() -> Vec<&'static SupportedProtocolVersion> {
    vec![&rustls::version::TLS13]
}

/**
 * Reads the configuration from the specified file.
 *
 * #Arguments
 * `config_file`: The path to the configuration file.
 *
 * #Returns
 * A `Result` containing the parsed `Config` or an `std::io::Error` if reading or parsing fails.
*/
fn get_config(config_file: &str) -> Result<Config, std::io::Error> {
    let config_str: String = std::fs::read_to_string(config_file).map_err(|err| std::io::Error::other(format!("Failed to read config file: {err}")))?;
    let config: Config = toml::from_str(&config_str).map_err(|err| std::io::Error::other(format!("Failed to parse config file: {err}")))?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[actix_web::test]
    async fn test_get_connection_pool_in_memory() {
        let database = Database {
            db_type: DatabaseType::Sqlite { connection_string: "sqlite::memory:".to_string(), max_connections: 1, min_connections: 0, acquire_timeout: 1000, idle_timeout: 1000, max_lifetime: 1000 },
        };
        let pool = get_connection_pool(&database).await.unwrap();
        assert!(sqlx::migrate!("./migrations").run(&pool).await.is_ok());
    }

    #[actix_web::test]
    async fn test_get_connection_pool_unreachable_database() {
        let database = Database {
            db_type: DatabaseType::Sqlite { connection_string: "sqlite://./missing-directory/consumo.db".to_string(), max_connections: 1, min_connections: 0, acquire_timeout: 1000, idle_timeout: 1000, max_lifetime: 1000 },
        };
        let err = get_connection_pool(&database).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::Initialization);
    }

    #[actix_web::test]
    async fn test_gather_db_metrics() {
        let pool = crate::dao::consumption::init_test_db().await;
        let max_connections_gauge = IntGauge::new("max_connections", "Connection pool maximum").unwrap();
        let min_connections_gauge = IntGauge::new("min_connections", "Connection pool minimum").unwrap();
        let active_connections_gauge = IntGauge::new("active_connections", "Connection pool active").unwrap();
        let idle_connections_gauge = IntGauge::new("idle_connections", "Connection pool idle").unwrap();
        gather_db_metrics(max_connections_gauge.clone(), min_connections_gauge.clone(), active_connections_gauge.clone(), idle_connections_gauge.clone(), pool);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(max_connections_gauge.get(), 1);
        assert_eq!(min_connections_gauge.get(), 0);
    }

    #[test]
    fn test_get_config_missing_file() {
        assert!(get_config("./does/not/exist.toml").is_err());
    }

    #[test]
    fn test_ssl_builder_missing_files() {
        let https_config = HttpsConfig { port: 8443, certificate_file: "./missing.crt".to_string(), private_key_file: "./missing.key".to_string() };
        let err = ssl_builder(&https_config).unwrap_err();
        assert_eq!(err.error_type, ErrorType::Initialization);
    }
}
