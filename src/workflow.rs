use crate::auth::{AppScope, AuthSettings, Authenticator, MicrosoftIdentity, TokenCache};
use crate::browser::{BrowserLauncher, PrintUrl, SystemBrowser};
use crate::config::FixConfig;
use crate::errors::FixError;
use crate::graph::{
    GraphClient, ItemId, REPAIR_CELL, SENTINEL_VALUE, WorkbookApi, single_cell_body,
};
use crate::input;
use crate::progress::{Milestone, ProgressReporter};
use anyhow::{Context, Result};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub path: PathBuf,
    pub item_id: ItemId,
    pub worksheet_id: String,
    pub bytes_written: usize,
}

/// Resolve the input, sign in, and repair the workbook in place.
pub async fn run(config: &FixConfig, file: Option<PathBuf>) -> Result<RepairOutcome> {
    let path = input::resolve_path(file, &mut io::stdin().lock(), &mut io::stdout())?;

    let http = reqwest::Client::builder()
        .timeout(config.http_timeout)
        .build()
        .context("failed to build HTTP client")?;

    let browser: Arc<dyn BrowserLauncher> = if config.open_browser {
        Arc::new(SystemBrowser)
    } else {
        Arc::new(PrintUrl)
    };
    let authenticator = Authenticator::new(
        Arc::new(MicrosoftIdentity::new(http.clone(), config)),
        browser,
        AuthSettings::from(config),
    );

    let app = AppScope::from(config);
    let mut cache = match config.token_cache.as_deref() {
        Some(cache_path) => TokenCache::load(cache_path, app)?,
        None => TokenCache::in_memory(app),
    };

    let mut progress = if config.quiet {
        ProgressReporter::disabled()
    } else {
        ProgressReporter::new(io::stdout())
    };

    let token = authenticator
        .authenticate(
            &mut cache,
            config.account.as_deref(),
            &mut io::stdin().lock(),
            &mut io::stdout(),
        )
        .await?;
    progress.mark(Milestone::Authenticated);

    let api = GraphClient::new(http, config.graph_url.clone(), token);
    repair(&api, &path, &mut progress).await
}

/// Upload, poke the last cell, and pull the recomputed file back over `path`.
pub async fn repair<W: Write>(
    api: &dyn WorkbookApi,
    path: &Path,
    progress: &mut ProgressReporter<W>,
) -> Result<RepairOutcome> {
    let file_name = input::remote_file_name(path)?;
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;

    let item = api.upload(&file_name, contents).await?;
    tracing::info!(item_id = %item, "workbook uploaded");
    progress.mark(Milestone::Uploaded);

    let listed = api.list_worksheets(&item).await?;
    let Some(worksheet) = listed.worksheets.into_iter().next() else {
        return Err(FixError::NoWorksheets {
            item_id: item.to_string(),
            payload: listed.payload,
        }
        .into());
    };

    // Writing to the outer bound and clearing it makes the service rebuild
    // the workbook; both writes are required and in this order.
    api.patch_range(
        &item,
        &worksheet.id,
        REPAIR_CELL,
        &single_cell_body(SENTINEL_VALUE),
    )
    .await?;
    api.patch_range(&item, &worksheet.id, REPAIR_CELL, &single_cell_body(""))
        .await?;
    progress.mark(Milestone::Patched);

    let download_url = api.download_url(&item).await?;
    let repaired = api.download(&download_url).await?;
    replace_file(path, &repaired)?;
    progress.mark(Milestone::Downloaded);

    Ok(RepairOutcome {
        path: path.to_path_buf(),
        item_id: item,
        worksheet_id: worksheet.id,
        bytes_written: repaired.len(),
    })
}

/// Stage `contents` beside `path` and rename it over the original.
fn replace_file(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to stage download in {}", parent.display()))?;
    staged.write_all(contents)?;
    staged.flush()?;

    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(staged.path(), metadata.permissions())?;
    }
    staged
        .persist(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
