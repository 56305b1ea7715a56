//! renewd keeps a set of Vault tokens and leases alive until it is told to stop.

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use vault_client::{parse_ttl, RenewalHandle, VaultClient};

mod logging;

type Result<T> = std::result::Result<T, Box<dyn Error + Send + Sync>>;

#[derive(Debug, Parser)]
#[command(name = "renewd", version, about = "Keep Vault tokens and leases renewed")]
struct Args {
    /// Vault server address
    #[arg(long, env = "VAULT_ADDR")]
    vault_addr: Option<String>,

    /// Increment requested on token renewals, e.g. `3600`, `30m` or `72h`
    #[arg(long, env = "VAULT_TASK_TOKEN_TTL", value_parser = parse_duration)]
    task_token_ttl: Option<Duration>,

    /// Delay before retrying a failed scheduled renewal
    #[arg(long, default_value_t = 10)]
    retry_interval_secs: u64,

    /// Token to keep alive; repeatable
    #[arg(long = "token", env = "RENEWD_TOKENS", value_delimiter = ',')]
    tokens: Vec<String>,

    /// Lease to keep alive as `ID=SECONDS`; repeatable
    #[arg(long = "lease", value_parser = parse_lease)]
    leases: Vec<(String, Duration)>,
}

fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    parse_ttl(raw).map_err(|e| e.to_string())
}

fn parse_lease(raw: &str) -> std::result::Result<(String, Duration), String> {
    let (id, secs) = raw
        .rsplit_once('=')
        .ok_or_else(|| format!("expected ID=SECONDS, got `{}`", raw))?;
    if id.is_empty() {
        return Err("lease id is empty".to_string());
    }
    let secs: u64 = secs
        .parse()
        .map_err(|_| format!("invalid lease increment `{}`", secs))?;
    Ok((id.to_string(), Duration::from_secs(secs)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = logging::init_logger()?;

    let mut builder = VaultClient::builder()
        .retry_interval(Duration::from_secs(args.retry_interval_secs))
        .application_name(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")));
    if let Some(addr) = args.vault_addr.as_deref() {
        builder = builder.base_url(addr);
    }
    if let Some(ttl) = args.task_token_ttl {
        builder = builder.task_token_ttl(ttl);
    }
    let client = builder.build()?;

    client.start().await;

    let handles = match register(&client, &args).await {
        Ok(handles) => handles,
        Err(e) => {
            client.stop().await;
            return Err(e);
        }
    };
    tracing::info!(
        tokens = args.tokens.len(),
        leases = args.leases.len(),
        "Renewing registered items"
    );

    for handle in handles {
        tokio::spawn(watch(handle));
    }

    shutdown_signal().await;
    tracing::info!("Shutting down");
    client.stop().await;
    Ok(())
}

async fn register(client: &VaultClient, args: &Args) -> Result<Vec<RenewalHandle>> {
    let mut handles = Vec::with_capacity(args.tokens.len() + args.leases.len());
    for token in &args.tokens {
        handles.push(client.renew_token(token).await?);
    }
    for (lease_id, increment) in &args.leases {
        handles.push(client.renew_lease(lease_id, *increment).await?);
    }
    Ok(handles)
}

async fn watch(handle: RenewalHandle) {
    if let Some(err) = handle.await {
        tracing::error!(error = %err, "Renewal failed");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
