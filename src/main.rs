use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parkgate::clock::SystemClock;
use parkgate::config::Config;
use parkgate::engine::{ReservationRules, ReservationService, ReservationStore};
use parkgate::holiday::{ApiNinjasHolidays, CachedHolidays, HolidayCalendar};
use parkgate::limits::NOTIFY_QUEUE_CAPACITY;
use parkgate::notify::{self, LogMailer, NotifyHub};
use parkgate::{compactor, observability, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;
    observability::init(config.metrics_port)?;

    let holidays: Arc<dyn HolidayCalendar> = match &config.holiday_api_key {
        Some(key) => Arc::new(CachedHolidays::new(ApiNinjasHolidays::new(
            key.clone(),
            config.holiday_timeout,
        )?)),
        None => {
            if config.holidays.is_empty() {
                tracing::warn!("no holiday API key or holiday list configured, no date counts as a holiday");
            }
            Arc::new(config.holidays.clone())
        }
    };

    let spots = Arc::new(config.spot_directory());
    let rules = ReservationRules::new(spots.clone(), holidays, config.rule_policy());
    let store = ReservationStore::open(&config.journal_path())?;

    let (notify, outbox) = NotifyHub::channel(NOTIFY_QUEUE_CAPACITY);
    let notifier = tokio::spawn(notify::run_notifier(outbox, Arc::new(LogMailer)));

    let service = Arc::new(
        ReservationService::new(rules, store, Arc::new(SystemClock), notify)
            .with_coordination_email(config.coordination_email.clone()),
    );
    let compactor = tokio::spawn(compactor::run_compactor(service.clone(), config.compact_threshold));

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("parkgate listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  spots: {}", spots.len());
    info!("  max_connections: {max_connections}");
    info!("  holidays: {}", if config.holiday_api_key.is_some() { "api-ninjas" } else { "fixed list" });
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("SIGTERM handler unavailable: {e}");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                tracing::debug!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let service = service.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, service).await {
                        tracing::warn!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    // Last journal compaction, then let the notifier flush what is queued.
    compactor.abort();
    if let Err(e) = service.compact_journal().await {
        tracing::warn!("final journal compaction failed: {e}");
    }
    drop(service);
    if tokio::time::timeout(std::time::Duration::from_secs(5), notifier).await.is_err() {
        tracing::warn!("notifier did not finish, pending notices dropped");
    }

    info!("parkgate stopped");
    Ok(())
}
