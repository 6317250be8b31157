use sheetlogd::config::DaemonConfig;
use sheetlogd::daemon::DaemonRuntime;
use sheetlogd::storage::CredentialCache;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliMode {
    Run,
    Logout,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut mode = CliMode::Run;
    for arg in args.into_iter().skip(1) {
        match arg.as_str() {
            "--logout" => mode = CliMode::Logout,
            "--help" | "-h" => mode = CliMode::Help,
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }
    Ok(mode)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match parse_cli_mode(std::env::args())? {
        CliMode::Logout => {
            let config = DaemonConfig::from_env()?;
            CredentialCache::remove(&config.credential_cache_path)?;
            info!(path = %config.credential_cache_path.display(), "saved credential removed");
            return Ok(());
        }
        CliMode::Help => {
            println!("Usage: sheetlogd [--logout]");
            println!("  --logout   Remove the saved Google credential and exit");
            return Ok(());
        }
        CliMode::Run => {}
    }
    let config = DaemonConfig::from_env()?;
    let daemon = DaemonRuntime::bootstrap(config)?;
    daemon.run().await
}
