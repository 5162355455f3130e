//! Sync orchestration
//!
//! One pass walks `Idle -> Downloading -> Merging(Tags) -> Merging(Sessions)
//! -> Uploading -> Finalizing -> Idle`. Every remote request is a future in
//! the pass's [`SyncContext`]; nothing runs on another task and no lock is
//! held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::config::SyncConfig;
use super::dynamo::RemoteTable;
use super::items::{self, Item};
use super::resolver::{self, Decision, RemoteOnly};
use crate::error::{Result, WorklogError};
use crate::storage::{queries, Storage};
use crate::types::{
    CloudSession, CloudTag, Collection, LocalId, Session, SyncEvent, SyncPhase, SyncResult,
    SyncStatus, Tag,
};

const EVENT_CAPACITY: usize = 64;

/// A finished remote request
enum Completion {
    Download {
        collection: Collection,
        result: Result<Vec<Item>>,
    },
    Put {
        collection: Collection,
        cloud_id: String,
        result: Result<()>,
    },
}

/// Waits for both partition downloads before merging may start
struct DownloadBarrier {
    remaining: u8,
    failed: bool,
    tags: Vec<CloudTag>,
    sessions: Vec<CloudSession>,
}

impl DownloadBarrier {
    fn new() -> Self {
        Self {
            remaining: 2,
            failed: false,
            tags: Vec::new(),
            sessions: Vec::new(),
        }
    }

    fn arrive(&mut self) {
        self.remaining = self.remaining.saturating_sub(1);
    }

    fn is_open(&self) -> bool {
        self.remaining == 0
    }
}

/// State owned by a single sync pass
struct SyncContext {
    result: SyncResult,
    pending: usize,
    in_flight: FuturesUnordered<BoxFuture<'static, Completion>>,
    barrier: DownloadBarrier,
    tags_merged: bool,
    sessions_merged: bool,
}

impl SyncContext {
    fn new() -> Self {
        Self {
            result: SyncResult::default(),
            pending: 0,
            in_flight: FuturesUnordered::new(),
            barrier: DownloadBarrier::new(),
            tags_merged: false,
            sessions_merged: false,
        }
    }

    fn dispatch(&mut self, request: BoxFuture<'static, Completion>) {
        self.pending += 1;
        self.in_flight.push(request);
    }

    async fn next_completion(&mut self) -> Option<Completion> {
        let completion = self.in_flight.next().await?;
        self.pending -= 1;
        Some(completion)
    }

    fn fail(&mut self, err: &WorklogError) {
        self.result.error_message = Some(err.to_string());
    }

    fn ready_to_finalize(&self) -> bool {
        self.pending == 0 && (self.barrier.failed || (self.tags_merged && self.sessions_merged))
    }
}

/// What happened to a remote-only tag
enum RemoteTagOutcome {
    Inserted,
    /// An unsynced local tag with the same name took the cloud id
    Linked(LocalId),
    /// Another synced tag already holds the name
    NameTaken(Tag),
}

/// Resets the phase to idle when a pass ends, however it ends
struct PhaseGuard<'a> {
    phase: &'a Mutex<SyncPhase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = SyncPhase::Idle;
    }
}

/// Drives two-way sync between the local store and the remote tables
pub struct SyncOrchestrator {
    storage: Storage,
    remote: Arc<dyn RemoteTable>,
    config: SyncConfig,
    phase: Mutex<SyncPhase>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncOrchestrator {
    pub fn new(storage: Storage, remote: Arc<dyn RemoteTable>, config: SyncConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            remote,
            config,
            phase: Mutex::new(SyncPhase::Idle),
            events,
        }
    }

    /// Orchestrator backed by the signed HTTPS client
    #[cfg(feature = "cloud")]
    pub fn connect(storage: Storage, config: SyncConfig) -> Result<Self> {
        let client = super::dynamo::HttpTableClient::new(&config)?;
        Ok(Self::new(storage, Arc::new(client), config))
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn phase(&self) -> SyncPhase {
        *self.phase.lock()
    }

    pub fn is_syncing(&self) -> bool {
        self.phase() != SyncPhase::Idle
    }

    pub fn status(&self) -> Result<SyncStatus> {
        Ok(SyncStatus {
            phase: self.phase(),
            is_configured: self.config.is_configured(),
            last_sync: self.storage.with_connection(queries::last_sync)?,
        })
    }

    /// Receive phase changes and results
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn set_phase(&self, phase: SyncPhase) {
        *self.phase.lock() = phase;
        tracing::debug!("Sync phase: {:?}", phase);
        self.emit(SyncEvent::PhaseChanged(phase));
    }

    /// Probe the sessions table with `DescribeTable`
    pub async fn test_connection(&self) -> Result<String> {
        if !self.config.is_configured() {
            return Err(WorklogError::NotConfigured);
        }

        match self
            .remote
            .describe_table(&self.config.sessions_table_name)
            .await
        {
            Ok(()) => {
                tracing::info!("Connection test passed");
                Ok("Connection successful!".to_string())
            }
            Err(e) => {
                tracing::warn!("Connection test failed: {}", e);
                Err(WorklogError::ConnectivityTest(e.to_string()))
            }
        }
    }

    /// Run one sync pass
    ///
    /// Fails up front when a pass is already running or the config is
    /// incomplete. Transport and per-record failures do not abort the pass;
    /// they show up in the returned [`SyncResult`].
    pub async fn sync(&self) -> Result<SyncResult> {
        let _guard = self.begin()?;
        self.emit(SyncEvent::Started);
        self.emit(SyncEvent::PhaseChanged(SyncPhase::Downloading));
        tracing::info!("Sync started for profile {}", self.config.profile_id);

        let mut ctx = SyncContext::new();

        let (mut tags, mut sessions) = self.storage.with_connection(|conn| {
            Ok((queries::all_tags(conn)?, queries::all_sessions(conn)?))
        })?;

        self.dispatch_download(&mut ctx, Collection::Tags);
        self.dispatch_download(&mut ctx, Collection::Sessions);

        while !ctx.barrier.is_open() {
            match ctx.next_completion().await {
                Some(completion) => self.complete(&mut ctx, completion),
                None => break,
            }
        }

        if ctx.barrier.failed {
            tracing::warn!("Download failed, skipping merge");
        } else {
            let cloud_tags = std::mem::take(&mut ctx.barrier.tags);
            let cloud_sessions = std::mem::take(&mut ctx.barrier.sessions);

            self.set_phase(SyncPhase::Merging(Collection::Tags));
            self.merge_tags(&mut ctx, &mut tags, &cloud_tags);
            ctx.tags_merged = true;

            self.set_phase(SyncPhase::Merging(Collection::Sessions));
            match self.reconcile_session_tags(&mut sessions) {
                Ok(tag_ids) => {
                    self.merge_sessions(&mut ctx, &mut sessions, &cloud_sessions, &tag_ids)
                }
                Err(e) => {
                    tracing::warn!("Mapping session tags failed, skipping sessions: {}", e);
                    ctx.fail(&e);
                }
            }
            ctx.sessions_merged = true;
        }

        self.set_phase(SyncPhase::Uploading);
        while let Some(completion) = ctx.next_completion().await {
            self.complete(&mut ctx, completion);
        }
        debug_assert!(ctx.ready_to_finalize());

        self.set_phase(SyncPhase::Finalizing);
        Ok(self.finalize(ctx))
    }

    fn begin(&self) -> Result<PhaseGuard<'_>> {
        let mut phase = self.phase.lock();
        if *phase != SyncPhase::Idle {
            return Err(WorklogError::AlreadyInProgress);
        }
        if !self.config.is_configured() {
            return Err(WorklogError::NotConfigured);
        }
        *phase = SyncPhase::Downloading;
        Ok(PhaseGuard { phase: &self.phase })
    }

    fn table(&self, collection: Collection) -> String {
        match collection {
            Collection::Tags => self.config.tags_table_name.clone(),
            Collection::Sessions => self.config.sessions_table_name.clone(),
        }
    }

    fn dispatch_download(&self, ctx: &mut SyncContext, collection: Collection) {
        let remote = Arc::clone(&self.remote);
        let table = self.table(collection);
        let profile_id = self.config.profile_id.clone();

        ctx.dispatch(
            async move {
                let result = remote.query_partition(&table, &profile_id).await;
                Completion::Download { collection, result }
            }
            .boxed(),
        );
    }

    fn dispatch_put(
        &self,
        ctx: &mut SyncContext,
        collection: Collection,
        cloud_id: String,
        item: Item,
    ) {
        let remote = Arc::clone(&self.remote);
        let table = self.table(collection);

        tracing::debug!("Uploading {} {}", collection, cloud_id);
        ctx.dispatch(
            async move {
                let result = remote.put_item(&table, item).await;
                Completion::Put {
                    collection,
                    cloud_id,
                    result,
                }
            }
            .boxed(),
        );
    }

    fn complete(&self, ctx: &mut SyncContext, completion: Completion) {
        match completion {
            Completion::Download { collection, result } => {
                match result {
                    Ok(fetched) => {
                        tracing::info!("Downloaded {} remote {}", fetched.len(), collection);
                        match collection {
                            Collection::Tags => {
                                ctx.barrier.tags =
                                    decode_all(fetched, items::decode_tag, collection)
                            }
                            Collection::Sessions => {
                                ctx.barrier.sessions =
                                    decode_all(fetched, items::decode_session, collection)
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Downloading {} failed: {}", collection, e);
                        ctx.barrier.failed = true;
                        ctx.fail(&e);
                    }
                }
                ctx.barrier.arrive();
            }
            Completion::Put {
                collection,
                cloud_id,
                result,
            } => match result {
                Ok(()) => {
                    tracing::debug!("Uploaded {} {}", collection, cloud_id);
                    ctx.result.record_upload(collection);
                }
                Err(e) => {
                    tracing::warn!("Uploading {} {} failed: {}", collection, cloud_id, e);
                    ctx.fail(&e);
                }
            },
        }
    }

    fn merge_tags(&self, ctx: &mut SyncContext, local: &mut [Tag], remote: &[CloudTag]) {
        let remote_by_id: HashMap<&str, &CloudTag> =
            remote.iter().map(|t| (t.cloud_id.as_str(), t)).collect();

        for cloud in remote {
            if local
                .iter()
                .any(|t| t.cloud_id.as_deref() == Some(cloud.cloud_id.as_str()))
            {
                continue;
            }

            if resolver::resolve_remote_only(cloud) == RemoteOnly::Skip {
                tracing::debug!("Skipping deleted remote tag {}", cloud.cloud_id);
                continue;
            }

            let outcome = self.storage.with_connection(|conn| {
                match queries::tag_by_name(conn, &cloud.name)? {
                    Some(existing) if existing.cloud_id.is_none() => {
                        queries::assign_tag_cloud_id(conn, existing.id, &cloud.cloud_id)?;
                        Ok(RemoteTagOutcome::Linked(existing.id))
                    }
                    Some(existing) => Ok(RemoteTagOutcome::NameTaken(existing)),
                    None => {
                        queries::insert_remote_tag(conn, cloud)?;
                        Ok(RemoteTagOutcome::Inserted)
                    }
                }
            });

            match outcome {
                Ok(RemoteTagOutcome::Linked(id)) => {
                    tracing::debug!("Linked local tag {} to remote {}", id, cloud.cloud_id);
                    if let Some(tag) = local.iter_mut().find(|t| t.id == id) {
                        tag.cloud_id = Some(cloud.cloud_id.clone());
                    }
                }
                Ok(RemoteTagOutcome::NameTaken(existing)) => {
                    tracing::warn!(
                        "Skipping remote tag {}: name '{}' already belongs to tag {} ({})",
                        cloud.cloud_id,
                        cloud.name,
                        existing.id,
                        existing.cloud_id.as_deref().unwrap_or_default()
                    );
                }
                Ok(RemoteTagOutcome::Inserted) => {
                    tracing::debug!("Inserted remote tag {}", cloud.cloud_id);
                    ctx.result.record_download(Collection::Tags);
                }
                Err(e) => {
                    tracing::warn!("Storing remote tag {} failed: {}", cloud.cloud_id, e);
                    ctx.fail(&e);
                }
            }
        }

        for tag in local.iter_mut() {
            let matched = tag
                .cloud_id
                .as_deref()
                .and_then(|id| remote_by_id.get(id).copied());

            let decision = resolver::resolve(&*tag, matched);
            let applied = match (decision, matched) {
                (Decision::NoOp, _) => Ok(()),
                (Decision::ApplyRemote, Some(cloud)) => self
                    .storage
                    .with_connection(|conn| queries::apply_remote_tag(conn, tag.id, cloud))
                    .map(|()| ctx.result.record_download(Collection::Tags)),
                (Decision::ApplyRemote, None) => Ok(()),
                (Decision::Upload, _) => self.upload_tag(ctx, tag),
                (Decision::AssignAndUpload, _) => {
                    let cloud_id = Uuid::new_v4().to_string();
                    self.storage
                        .with_connection(|conn| {
                            queries::assign_tag_cloud_id(conn, tag.id, &cloud_id)
                        })
                        .and_then(|()| {
                            tag.cloud_id = Some(cloud_id);
                            self.upload_tag(ctx, tag)
                        })
                }
            };

            tracing::debug!("Tag {} ({}): {:?}", tag.id, tag.name, decision);
            if let Err(e) = applied {
                tracing::warn!("Merging tag {} failed: {}", tag.id, e);
                ctx.fail(&e);
            }
        }
    }

    fn upload_tag(&self, ctx: &mut SyncContext, tag: &Tag) -> Result<()> {
        let item = items::encode_tag(&self.config.profile_id, tag)?;
        let cloud_id = tag.cloud_id.clone().unwrap_or_default();
        self.dispatch_put(ctx, Collection::Tags, cloud_id, item);
        Ok(())
    }

    /// Relink orphaned sessions, recompute `tag_cloud_id` for every tagged
    /// session from the merged tag table, and return the tag lookup used to
    /// resolve remote sessions.
    fn reconcile_session_tags(
        &self,
        sessions: &mut [Session],
    ) -> Result<HashMap<String, LocalId>> {
        let (tag_ids, relinked, refreshed) = self.storage.with_connection(|conn| {
            let relinked = queries::relink_orphaned_sessions(conn)?;
            let refreshed = queries::refresh_session_tag_cloud_ids(conn)?;
            Ok((queries::tag_ids_by_cloud_id(conn)?, relinked, refreshed))
        })?;
        tracing::debug!(
            "Relinked {} orphaned sessions, refreshed tag links on {}",
            relinked,
            refreshed
        );

        let cloud_by_tag: HashMap<LocalId, &str> = tag_ids
            .iter()
            .map(|(cloud_id, id)| (*id, cloud_id.as_str()))
            .collect();

        for session in sessions.iter_mut() {
            match session.tag_id {
                Some(tag_id) => {
                    session.tag_cloud_id = cloud_by_tag.get(&tag_id).map(|c| c.to_string());
                }
                None => {
                    session.tag_id = session
                        .tag_cloud_id
                        .as_deref()
                        .and_then(|c| tag_ids.get(c).copied());
                }
            }
        }

        Ok(tag_ids)
    }

    fn merge_sessions(
        &self,
        ctx: &mut SyncContext,
        local: &mut [Session],
        remote: &[CloudSession],
        tag_ids: &HashMap<String, LocalId>,
    ) {
        let remote_by_id: HashMap<&str, &CloudSession> =
            remote.iter().map(|s| (s.cloud_id.as_str(), s)).collect();
        let local_tag = |cloud: &CloudSession| {
            cloud
                .tag_cloud_id
                .as_deref()
                .and_then(|id| tag_ids.get(id).copied())
        };

        for cloud in remote {
            if local
                .iter()
                .any(|s| s.cloud_id.as_deref() == Some(cloud.cloud_id.as_str()))
            {
                continue;
            }

            if resolver::resolve_remote_only(cloud) == RemoteOnly::Skip {
                tracing::debug!("Skipping deleted remote session {}", cloud.cloud_id);
                continue;
            }

            let tag_id = local_tag(cloud);
            match self
                .storage
                .with_connection(|conn| queries::insert_remote_session(conn, cloud, tag_id))
            {
                Ok(id) => {
                    tracing::debug!("Inserted remote session {} as {}", cloud.cloud_id, id);
                    ctx.result.record_download(Collection::Sessions);
                }
                Err(e) => {
                    tracing::warn!("Storing remote session {} failed: {}", cloud.cloud_id, e);
                    ctx.fail(&e);
                }
            }
        }

        for session in local.iter_mut() {
            let matched = session
                .cloud_id
                .as_deref()
                .and_then(|id| remote_by_id.get(id).copied());

            let decision = resolver::resolve(&*session, matched);
            let applied = match (decision, matched) {
                (Decision::NoOp, _) => Ok(()),
                (Decision::ApplyRemote, Some(cloud)) => {
                    let tag_id = local_tag(cloud);
                    self.storage
                        .with_connection(|conn| {
                            queries::apply_remote_session(conn, session.id, cloud, tag_id)
                        })
                        .map(|()| ctx.result.record_download(Collection::Sessions))
                }
                (Decision::ApplyRemote, None) => Ok(()),
                (Decision::Upload, _) => self.upload_session(ctx, session),
                (Decision::AssignAndUpload, _) => {
                    let cloud_id = Uuid::new_v4().to_string();
                    self.storage
                        .with_connection(|conn| {
                            queries::assign_session_cloud_id(conn, session.id, &cloud_id)
                        })
                        .and_then(|()| {
                            session.cloud_id = Some(cloud_id);
                            self.upload_session(ctx, session)
                        })
                }
            };

            tracing::debug!("Session {} ({}): {:?}", session.id, session.date, decision);
            if let Err(e) = applied {
                tracing::warn!("Merging session {} failed: {}", session.id, e);
                ctx.fail(&e);
            }
        }
    }

    fn upload_session(&self, ctx: &mut SyncContext, session: &Session) -> Result<()> {
        let item = items::encode_session(&self.config.profile_id, session)?;
        let cloud_id = session.cloud_id.clone().unwrap_or_default();
        self.dispatch_put(ctx, Collection::Sessions, cloud_id, item);
        Ok(())
    }

    fn finalize(&self, mut ctx: SyncContext) -> SyncResult {
        let now = Utc::now();
        if let Err(e) = self
            .storage
            .with_connection(|conn| queries::set_last_sync(conn, &now))
        {
            tracing::warn!("Recording sync time failed: {}", e);
            ctx.fail(&e);
        }

        let mut result = ctx.result;
        result.success = result.error_message.is_none();

        self.set_phase(SyncPhase::Idle);
        tracing::info!("{}", result.message());

        self.emit(SyncEvent::DataChanged);
        self.emit(SyncEvent::Completed(result.clone()));
        result
    }
}

fn decode_all<T>(
    items: Vec<Item>,
    decode: fn(&Item) -> Result<T>,
    collection: Collection,
) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| match decode(item) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping malformed remote {} item: {}", collection, e);
                None
            }
        })
        .collect()
}
