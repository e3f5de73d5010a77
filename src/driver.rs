use chrono::Utc;
use failure::{Error, ResultExt};
use futures::TryStreamExt;
use std::cmp;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::archive;
use crate::config::{Config, General};
use crate::errors::{CloneTimeout, Interrupted, NoRepositories};
use crate::git::Cloner;
use crate::providers::{paginated, Provider};
use crate::report::Reporter;
use crate::tracker::{Totals, Tracker, WorkUnit};
use crate::utils;
use crate::{Repo, Target};

/// Runs the whole discover, download, archive pipeline.
pub struct Driver {
    config: Config,
    provider: Arc<dyn Provider>,
    cloner: Arc<dyn Cloner>,
    reporter: Reporter,
    cancel: CancellationToken,
}

/// The outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub totals: Totals,
    /// Where the tarball was written.
    pub archive: PathBuf,
    /// How many files and directories went into the tarball.
    pub entries: usize,
}

impl Driver {
    pub fn new(
        config: Config,
        provider: Arc<dyn Provider>,
        cloner: Arc<dyn Cloner>,
        reporter: Reporter,
    ) -> Driver {
        Driver {
            config,
            provider,
            cloner,
            reporter,
            cancel: CancellationToken::new(),
        }
    }

    /// A token which, when cancelled, stops every in-flight listing request
    /// and clone. The run then fails with [`Interrupted`].
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Archive every repository referred to by `names`.
    ///
    /// A fresh working directory is used for each run and it is always
    /// removed afterwards.
    pub async fn run(&self, names: &[String]) -> Result<Summary, Error> {
        let workdir = self.working_directory()?;
        self.reporter.info(format!(
            "Using the working directory {}",
            workdir.path().display()
        ));

        let outcome = self.download_and_archive(workdir.path(), names).await;
        let cleanup = workdir
            .close()
            .context("Unable to remove the working directory");

        match (outcome, cleanup) {
            (Err(e), Err(cleanup)) => {
                // the first error is the interesting one
                self.reporter.warning(cleanup.to_string());
                Err(e)
            },
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(cleanup)) => Err(cleanup.into()),
            (Ok(summary), Ok(())) => Ok(summary),
        }
    }

    fn working_directory(&self) -> Result<TempDir, Error> {
        let parent = match self.config.general.work_dir {
            Some(ref dir) => dir.clone(),
            None => env::temp_dir(),
        };

        let dir = tempfile::Builder::new()
            .prefix("repo-archive-")
            .tempdir_in(&parent)
            .with_context(|_| {
                format!("Unable to create a working directory in {}", parent.display())
            })?;

        Ok(dir)
    }

    async fn download_and_archive(
        &self,
        root: &Path,
        names: &[String],
    ) -> Result<Summary, Error> {
        let totals = self.download(root, names).await;

        if self.cancel.is_cancelled() {
            return Err(Interrupted.into());
        }
        if totals.succeeded == 0 {
            return Err(NoRepositories.into());
        }

        self.reporter.info(format!(
            "Downloaded {} of {} repositories",
            totals.succeeded, totals.discovered
        ));

        let dest = self.config.general.output_dir.join(format!(
            "repo-archive-{}.tar.gz",
            Utc::now().timestamp()
        ));
        self.reporter
            .info(format!("Archiving into {}", dest.display()));

        let entries = {
            let root = root.to_path_buf();
            let dest = dest.clone();
            let level = self.config.general.compression_level;
            let reporter = self.reporter.clone();

            tokio::task::spawn_blocking(move || {
                archive::archive(&root, &dest, level, &reporter)
            })
            .await
            .context("The archiving task panicked")??
        };

        self.reporter
            .info(format!("Archive created: {}", dest.display()));

        Ok(Summary {
            totals,
            archive: dest,
            entries,
        })
    }

    /// Discover and clone everything `names` refers to into `root`, returning
    /// once all of that work has finished.
    ///
    /// Individual failures are sent to the [`Reporter`] and don't stop the
    /// rest of the run.
    pub async fn download(&self, root: &Path, names: &[String]) -> Totals {
        let general = &self.config.general;
        let shared = Arc::new(Shared {
            root: root.to_path_buf(),
            general: general.clone(),
            per_page: self.config.github.page_size,
            authenticated: self.config.github.authenticated,
            excluded: general.exclude.iter().cloned().collect(),
            provider: Arc::clone(&self.provider),
            cloner: Arc::clone(&self.cloner),
            reporter: self.reporter.clone(),
            tracker: Arc::new(Tracker::new(names.len())),
            cancel: self.cancel.clone(),
        });
        let (tx, rx) = mpsc::channel(cmp::max(1, general.queue_capacity));

        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), names.to_vec(), tx));
        let coordinator = tokio::spawn(coordinate(Arc::clone(&shared), rx));

        shared.tracker.wait().await;
        debug!("All discovery and download work has finished");

        for handle in vec![dispatcher, coordinator] {
            if let Err(e) = handle.await {
                log_join_error(&e);
            }
        }

        shared.tracker.totals()
    }
}

/// State shared by every task in a run.
struct Shared {
    root: PathBuf,
    general: General,
    per_page: u32,
    authenticated: bool,
    excluded: HashSet<String>,
    provider: Arc<dyn Provider>,
    cloner: Arc<dyn Cloner>,
    reporter: Reporter,
    tracker: Arc<Tracker>,
    cancel: CancellationToken,
}

impl Shared {
    /// Wait between launches. Returns early when the run is cancelled.
    async fn pause(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {},
            _ = tokio::time::sleep(self.general.launch_delay) => {},
        }
    }

    /// Grab a permit, unless the run is cancelled first.
    async fn acquire(
        &self,
        semaphore: &Arc<Semaphore>,
    ) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
        }
    }

    fn owner_dir(&self, owner: &str) -> PathBuf {
        self.root.join(owner)
    }
}

/// A discovered repository on its way to the download coordinator, along
/// with the unit of work it represents.
struct Queued {
    repo: Repo,
    unit: WorkUnit,
}

/// Start one task for each name.
async fn dispatch(shared: Arc<Shared>, names: Vec<String>, tx: Sender<Queued>) {
    let queries = Arc::new(Semaphore::new(cmp::max(
        1,
        shared.general.max_concurrent_queries,
    )));
    let mut workers = JoinSet::new();

    for name in names {
        let unit = shared.tracker.adopt();

        if shared.cancel.is_cancelled() {
            continue;
        }

        match name.parse::<Target>() {
            Err(e) => shared.reporter.error(e),
            Ok(Target::Repository { owner, repo }) => {
                enqueue_named(&shared, &owner, &repo, &tx).await;
            },
            Ok(Target::Owner(owner)) => {
                let permit = match shared.acquire(&queries).await {
                    Some(permit) => permit,
                    None => continue,
                };
                workers.spawn(discover(
                    Arc::clone(&shared),
                    owner,
                    tx.clone(),
                    unit,
                    permit,
                ));
            },
        }

        shared.pause().await;
    }

    // Only the workers can send from here on
    drop(tx);

    while let Some(result) = workers.join_next().await {
        if let Err(e) = result {
            log_join_error(&e);
        }
    }
}

/// Skip discovery entirely for an explicitly named `owner/repo`.
async fn enqueue_named(
    shared: &Shared,
    owner: &str,
    name: &str,
    tx: &Sender<Queued>,
) {
    let owner_dir = shared.owner_dir(owner);
    if let Err(e) = utils::create_dir(&owner_dir)
        .await
        .with_context(|_| format!("Unable to create {}", owner_dir.display()))
    {
        shared.reporter.error(e);
        return;
    }

    let repo = match shared.provider.repository(owner, name).await {
        Ok(repo) => repo,
        Err(e) => {
            shared.reporter.error(
                Error::from(e).context(format!("Unable to look up {}/{}", owner, name)),
            );
            return;
        },
    };
    let unit = shared.tracker.discovered();
    shared
        .reporter
        .detail(format!("Added individual repository {}", repo.full_name));

    if tx.send(Queued { repo, unit }).await.is_err() {
        warn!("The download queue closed before {}/{} was sent", owner, name);
    }
}

/// Find and enqueue every repository belonging to `owner`.
async fn discover(
    shared: Arc<Shared>,
    owner: String,
    tx: Sender<Queued>,
    _unit: WorkUnit,
    _permit: OwnedSemaphorePermit,
) {
    match discover_owner(&shared, &owner, &tx).await {
        Ok(count) => shared
            .reporter
            .info(format!("Found {} repositories for {}", count, owner)),
        Err(ref e) if e.downcast_ref::<Interrupted>().is_some() => {
            shared
                .reporter
                .detail(format!("Stopped looking for {}'s repositories", owner));
        },
        Err(e) => shared.reporter.error(
            e.context(format!("Unable to discover {}'s repositories", owner)),
        ),
    }
}

async fn discover_owner(
    shared: &Shared,
    owner: &str,
    tx: &Sender<Queued>,
) -> Result<u64, Error> {
    let owner_dir = shared.owner_dir(owner);
    utils::create_dir(&owner_dir)
        .await
        .with_context(|_| format!("Unable to create {}", owner_dir.display()))?;

    debug!(
        "Asking {} for {}'s repositories",
        shared.provider.name(),
        owner
    );
    let mut repos = Box::pin(paginated(
        Arc::clone(&shared.provider),
        owner.to_string(),
        shared.per_page,
        shared.general.launch_delay,
    ));
    let mut count = 0;

    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return Err(Interrupted.into()),
            next = repos.try_next() => next?,
        };
        let repo = match next {
            Some(repo) => repo,
            None => break,
        };

        trace!("Discovered {}", repo.full_name);
        let unit = shared.tracker.discovered();
        count += 1;

        if tx.send(Queued { repo, unit }).await.is_err() {
            return Err(failure::err_msg("The download queue closed unexpectedly"));
        }
    }

    Ok(count)
}

/// Clone each repository as it arrives.
async fn coordinate(shared: Arc<Shared>, mut rx: Receiver<Queued>) {
    let clones = Arc::new(Semaphore::new(cmp::max(
        1,
        shared.general.max_concurrent_clones,
    )));
    let mut downloads = JoinSet::new();
    // every clone of a repository would land in the same directory
    let mut seen = HashSet::new();

    while let Some(Queued { repo, unit }) = rx.recv().await {
        if shared.excluded.contains(&repo.full_name) {
            shared.reporter.detail(format!("Skipped {}", repo.full_name));
            continue;
        }
        if !seen.insert(repo.full_name.clone()) {
            shared
                .reporter
                .detail(format!("Skipped {}, it was already queued", repo.full_name));
            continue;
        }
        if shared.cancel.is_cancelled() {
            continue;
        }

        let permit = match shared.acquire(&clones).await {
            Some(permit) => permit,
            None => continue,
        };
        downloads.spawn(download(Arc::clone(&shared), repo, unit, permit));

        shared.pause().await;
    }

    while let Some(result) = downloads.join_next().await {
        if let Err(e) = result {
            log_join_error(&e);
        }
    }
}

async fn download(
    shared: Arc<Shared>,
    repo: Repo,
    _unit: WorkUnit,
    _permit: OwnedSemaphorePermit,
) {
    let dest = shared.owner_dir(&repo.owner).join(repo.name());
    let url = repo.url(shared.authenticated);

    let outcome = tokio::select! {
        _ = shared.cancel.cancelled() => Err(Error::from(Interrupted)),
        result = clone_with_deadline(
            &*shared.cloner,
            &repo,
            url,
            &dest,
            shared.general.timeout(),
        ) => result,
    };

    match outcome {
        Ok(()) => {
            shared.tracker.succeeded();
            shared
                .reporter
                .detail(format!("Downloaded {}", repo.full_name));
        },
        Err(e) => {
            if let Err(cleanup) = utils::remove_dir_all(&dest).await {
                shared.reporter.warning(format!(
                    "Unable to remove the partial clone at {}, {}",
                    dest.display(),
                    cleanup
                ));
            }

            if e.downcast_ref::<Interrupted>().is_some() {
                shared
                    .reporter
                    .detail(format!("Cancelled the download of {}", repo.full_name));
            } else {
                shared.reporter.error(
                    e.context(format!("Unable to download {}", repo.full_name)),
                );
            }
        },
    }
}

async fn clone_with_deadline(
    cloner: &dyn Cloner,
    repo: &Repo,
    url: &str,
    dest: &Path,
    timeout: Option<Duration>,
) -> Result<(), Error> {
    let attempt = cloner.clone_repo(url, dest);

    match timeout {
        Some(after) => match tokio::time::timeout(after, attempt).await {
            Ok(result) => result,
            Err(_) => Err(CloneTimeout {
                name: repo.full_name.clone(),
                after,
            }
            .into()),
        },
        None => attempt.await,
    }
}

fn log_join_error(e: &JoinError) {
    if e.is_panic() {
        error!("A background task panicked, {}", e);
    } else {
        debug!("A background task was cancelled, {}", e);
    }
}
