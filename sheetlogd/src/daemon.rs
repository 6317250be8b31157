use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{DaemonConfig, LedgerLocation};
use crate::ledger::SheetsConnector;
use crate::oauth_flow::{OAuthFlow, SPREADSHEETS_SCOPE};
use crate::storage::CredentialCache;
use crate::sync::event_filter::EventFilter;
use crate::sync::local_watcher::WatchError;
use crate::sync::range_planner::RangePlanner;
use crate::sync::synchronizer::Synchronizer;

pub struct DaemonRuntime {
    config: DaemonConfig,
    location: LedgerLocation,
    synchronizer: Arc<Synchronizer<SheetsConnector>>,
}

impl DaemonRuntime {
    /// Loads the ledger location and OAuth client. Either one missing is
    /// fatal; credentials themselves are resolved on first use.
    pub fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let location = LedgerLocation::load(&config.config_path)
            .with_context(|| format!("failed to load config from {:?}", config.config_path))?;
        let flow = OAuthFlow::from_client_secret_file(&config.client_secret_path)
            .context("failed to load OAuth client secret")?;
        let oauth_client = flow.oauth_client().clone();
        let credentials = CredentialCache::new(
            &config.credential_cache_path,
            SPREADSHEETS_SCOPE,
            Arc::new(flow),
        );
        let connector = SheetsConnector::new(
            credentials,
            Some(oauth_client),
            location.clone(),
            config.request_timeout,
            config.sheets_base_url.clone(),
        )
        .context("failed to build HTTP client")?;
        let synchronizer = Synchronizer::new(
            connector,
            EventFilter::new(config.extension.clone(), config.terminal_kind),
            RangePlanner::new(location.sheet_name.clone()),
        );

        Ok(Self {
            config,
            location,
            synchronizer: Arc::new(synchronizer),
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            watch_dir = %self.config.watch_dir.display(),
            extension = %self.config.extension,
            terminal = ?self.config.terminal_kind,
            spreadsheet = %self.location.spreadsheet_id,
            sheet = %self.location.sheet_name,
            "sheetlogd started"
        );

        match self.synchronizer.row_count().await {
            Ok(rows) => info!(rows, "ledger reachable"),
            Err(err) => warn!(error = %err, "could not read ledger at startup, will retry on first download"),
        }

        let shutdown = CancellationToken::new();
        let mut watch_task = tokio::spawn({
            let synchronizer = Arc::clone(&self.synchronizer);
            let watch_dir = self.config.watch_dir.clone();
            let shutdown = shutdown.clone();
            async move { synchronizer.run(&watch_dir, shutdown).await }
        });

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                res.context("failed waiting for shutdown signal")?;
                info!("shutdown requested");
                shutdown.cancel();
            }
            joined = &mut watch_task => return finish(joined),
        }
        finish(watch_task.await)
    }
}

fn finish(joined: Result<Result<(), WatchError>, JoinError>) -> anyhow::Result<()> {
    joined
        .context("watch task terminated abnormally")?
        .context("watching for downloads failed")?;
    info!("sheetlogd stopped");
    Ok(())
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
