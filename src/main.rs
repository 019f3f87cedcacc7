use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use watchgate::{cli, config, db, retention, routes, scheduler, state::AppState, store::Store};

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind watchgate listener on {addr}: port already in use. Stop the other service using this port or re-run with WATCHGATE_PORT set to another port.",
            );
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind watchgate listener on {addr}")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = config::WatchgateConfig::from_env()?;
    let pool = db::connect_lazy(&config.database_url)?;
    if let Err(err) = sqlx::migrate!().run(&pool).await {
        tracing::warn!(error = %err, "failed to run database migrations");
    }
    let store = Store::new(pool.clone());
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(config.http_request_timeout_seconds))
        .build()
        .context("failed to build http client")?;

    let cancel = CancellationToken::new();
    let (rule_scheduler, notify) = scheduler::build(store.clone(), http.clone(), config.clone(), cancel.clone());

    if args.run_once {
        for rule in store.schedulable_rules().await.context("failed to load rules")? {
            rule_scheduler.run_rule_now(rule.id).await;
        }
        cancel.cancel();
        return Ok(());
    }

    rule_scheduler.start(cancel.clone());
    retention::RetentionSweeper::new(store.clone()).start(cancel.clone());

    let state = AppState { db: pool, store, notify };
    let app = routes::router(state);

    let addr = config.bind_addr();
    let listener = bind_listener(&addr).await?;
    tracing::info!(addr, "watchgate listening");
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    cancel.cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::bind_listener;
    use anyhow::Result;

    #[tokio::test]
    async fn reports_port_in_use_with_actionable_message() -> Result<()> {
        let listener = match std::net::TcpListener::bind("127.0.0.1:0") {
            Ok(listener) => listener,
            Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        let addr = listener.local_addr()?;

        let err = bind_listener(&addr.to_string()).await.unwrap_err();
        let message = err.to_string().to_lowercase();
        if message.contains("operation not permitted") {
            return Ok(());
        }

        assert!(message.contains(&addr.to_string()));
        assert!(message.contains("port already in use"));

        drop(listener);
        Ok(())
    }
}
