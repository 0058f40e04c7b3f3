//! Session orchestration.
//!
//! Owns the session registry and drives each discovery session through
//! its phases: harvest → filter/extract → dedup → enrichment pool →
//! score → store, with progress events at every step. All state
//! transitions happen in the driver; other components only return
//! results or observe the cancellation token.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::DiscoverySettings;
use crate::error::{DiscoveryError, ErrorKind, Result};
use crate::models::{
    ArtistProfile, CandidateVideo, DiscoveryPhase, ProgressEvent, RejectReason, SessionCounters,
    SessionFailure, SessionId, SessionRequest, SessionSnapshot, SessionState, SessionSummary,
};
use crate::ports::{Clock, Store};
use crate::services::deduplicator::{DedupOutcome, Deduplicator};
use crate::services::enrichment::EnrichmentCoordinator;
use crate::services::extractor::ArtistExtractor;
use crate::services::harvester::Harvester;
use crate::services::progress::{EventStream, ProgressBus};
use crate::services::quota::{CostBudget, QuotaLimiter, SearchBudget};
use crate::services::scorer;
use crate::services::title_filter::TitleFilter;

struct SessionMeta {
    state: SessionState,
    ended_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Live state of one session, shared between the registry and the
/// driver.
pub struct SessionHandle {
    id: SessionId,
    request: SessionRequest,
    counters: Arc<SessionCounters>,
    bus: ProgressBus,
    cancel: CancellationToken,
    started_at: DateTime<Utc>,
    meta: Mutex<SessionMeta>,
}

impl SessionHandle {
    fn new(id: SessionId, request: SessionRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            counters: Arc::new(SessionCounters::default()),
            bus: ProgressBus::new(),
            cancel: CancellationToken::new(),
            started_at: now,
            meta: Mutex::new(SessionMeta {
                state: SessionState::Pending,
                ended_at: None,
                last_error: None,
            }),
        }
    }

    fn meta(&self) -> std::sync::MutexGuard<'_, SessionMeta> {
        self.meta.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: SessionState) {
        self.meta().state = state;
    }

    fn snapshot(&self) -> SessionSnapshot {
        let meta = self.meta();
        SessionSnapshot {
            session_id: self.id,
            query: self.request.query.clone(),
            state: meta.state,
            counters: self.counters.snapshot(),
            started_at: self.started_at,
            ended_at: meta.ended_at,
            last_error: meta.last_error.clone(),
        }
    }

    fn is_terminal(&self) -> bool {
        self.meta().state.is_terminal()
    }
}

struct Inner {
    settings: DiscoverySettings,
    harvester: Arc<Harvester>,
    coordinator: Arc<EnrichmentCoordinator>,
    title_filter: TitleFilter,
    extractor: ArtistExtractor,
    store: Arc<dyn Store>,
    quota: QuotaLimiter,
    clock: Arc<dyn Clock>,
    sessions: DashMap<SessionId, Arc<SessionHandle>>,
}

/// Public entry point for running discovery sessions.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<Inner>,
}

impl SessionOrchestrator {
    pub fn new(
        settings: DiscoverySettings,
        harvester: Arc<Harvester>,
        coordinator: Arc<EnrichmentCoordinator>,
        store: Arc<dyn Store>,
        quota: QuotaLimiter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                harvester,
                coordinator,
                title_filter: TitleFilter::new(),
                extractor: ArtistExtractor::new(),
                store,
                quota,
                clock,
                sessions: DashMap::new(),
            }),
        }
    }

    /// Validate the request, allocate a session and start its driver.
    /// Returns immediately with the session id.
    pub fn start(&self, request: SessionRequest) -> Result<SessionId> {
        let (id, _) = self.launch(request, false)?;
        Ok(id)
    }

    /// Like [`start`](Self::start), but subscribes before the driver
    /// runs so the caller observes the session's very first event.
    pub fn start_subscribed(&self, request: SessionRequest) -> Result<(SessionId, EventStream)> {
        let (id, stream) = self.launch(request, true)?;
        Ok((id, stream.expect("subscribed launch returns a stream")))
    }

    fn launch(
        &self,
        request: SessionRequest,
        subscribe: bool,
    ) -> Result<(SessionId, Option<EventStream>)> {
        let request = request.validated()?;

        let active = self.active_sessions();
        if active >= self.inner.settings.max_concurrent_sessions {
            return Err(DiscoveryError::Busy {
                active,
                limit: self.inner.settings.max_concurrent_sessions,
            });
        }

        let id = SessionId::new_v4();
        let handle = Arc::new(SessionHandle::new(id, request, self.inner.clock.now()));
        let stream = subscribe.then(|| handle.bus.subscribe());
        self.inner.sessions.insert(id, handle.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            drive_session(inner, handle).await;
        });

        Ok((id, stream))
    }

    /// Signal cancellation. Idempotent; the driver performs the actual
    /// state transition.
    pub fn cancel(&self, id: SessionId) -> Result<()> {
        let handle = self.handle(id)?;
        handle.cancel.cancel();
        Ok(())
    }

    /// Point-in-time snapshot of counters and state.
    pub fn status(&self, id: SessionId) -> Result<SessionSnapshot> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Stream of events published after this call.
    pub fn subscribe(&self, id: SessionId) -> Result<EventStream> {
        Ok(self.handle(id)?.bus.subscribe())
    }

    /// Sessions currently not in a terminal state.
    pub fn active_sessions(&self) -> usize {
        self.inner
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_terminal())
            .count()
    }

    fn handle(&self, id: SessionId) -> Result<Arc<SessionHandle>> {
        self.inner
            .sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DiscoveryError::NotFound {
                resource: format!("session {id}"),
            })
    }
}

/// Append a lifecycle event to the persistent journal; journal failures
/// degrade to a log line rather than failing the session.
async fn journal(store: &dyn Store, id: SessionId, event: &ProgressEvent) {
    if let Err(e) = store.append_session_event(id, event).await {
        tracing::warn!(session_id = %id, error = %e, "session journal write failed");
    }
}

async fn drive_session(inner: Arc<Inner>, handle: Arc<SessionHandle>) {
    let id = handle.id;
    handle.set_state(SessionState::Running);

    let started = ProgressEvent::SessionStarted {
        session_id: id,
        query: handle.request.query.clone(),
    };
    handle.bus.publish(started.clone());
    journal(inner.store.as_ref(), id, &started).await;
    if let Err(e) = inner.store.record_session(&handle.snapshot()).await {
        // A store that cannot even record the session start is the
        // fatal case: nothing downstream would persist either.
        finish_session(&inner, &handle, Outcome::Fatal(e.to_string()), false).await;
        return;
    }

    tracing::info!(
        session_id = %id,
        query = %handle.request.query,
        target = handle.request.target_count,
        "discovery session started"
    );

    let outcome = run_pipeline(&inner, &handle).await;
    let budget_exhausted = matches!(
        &outcome,
        Outcome::Completed {
            budget_exhausted: true,
            ..
        }
    );
    finish_session(&inner, &handle, outcome, budget_exhausted).await;
}

enum Outcome {
    Completed {
        budget_exhausted: bool,
        target_met: bool,
    },
    Cancelled,
    Fatal(String),
}

async fn run_pipeline(inner: &Arc<Inner>, handle: &Arc<SessionHandle>) -> Outcome {
    let request = &handle.request;
    let target = request.target_count as usize;
    let max_candidates = target.saturating_mul(inner.settings.over_fetch_factor as usize);

    let session_budget = Arc::new(CostBudget::new(request.max_cost_units));
    let gate = Arc::new(SearchBudget::new(inner.quota.clone(), session_budget.clone()));
    let dedup = Arc::new(Deduplicator::new(inner.store.clone()));

    // Fires on session cancellation (via parent) or when the target is
    // reached; stops the harvester and tells workers to drain.
    let pipeline_stop = handle.cancel.child_token();

    let mut candidates = inner.harvester.harvest(
        &request.query,
        &request.filters,
        max_candidates,
        gate.clone(),
        handle.counters.clone(),
        pipeline_stop.clone(),
    );

    let worker_count = inner.settings.enrichment_workers.max(1);
    let (work_tx, work_rx) = mpsc::channel::<ArtistProfile>(worker_count * 2);
    let work_rx = Arc::new(tokio::sync::Mutex::new(work_rx));

    // Each permit is one slot in the stored-artist budget; permits are
    // consumed for good on a successful store.
    let store_slots = Arc::new(Semaphore::new(target));
    let fatal: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let mut workers = JoinSet::new();
    for _ in 0..worker_count {
        workers.spawn(enrichment_worker(
            inner.clone(),
            handle.clone(),
            work_rx.clone(),
            store_slots.clone(),
            pipeline_stop.clone(),
            fatal.clone(),
            target,
        ));
    }

    // Consumer: filter, extract and dedup candidates in arrival order.
    loop {
        let candidate = tokio::select! {
            _ = pipeline_stop.cancelled() => break,
            candidate = candidates.recv() => match candidate {
                Some(candidate) => candidate,
                None => break,
            },
        };

        if let Some(profile) = screen_candidate(inner, handle, &dedup, candidate).await {
            let video_id = profile.source_video_id.clone();
            let name = profile.name.clone();
            tokio::select! {
                _ = pipeline_stop.cancelled() => {
                    // Accepted but the pipeline is closing; it still owes
                    // a terminal event.
                    handle.bus.publish(ProgressEvent::ArtistRejected {
                        video_id,
                        name: Some(name),
                        reason: RejectReason::TargetReached,
                    });
                    break;
                }
                sent = work_tx.send(profile) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    }
    drop(work_tx);
    drop(candidates);

    handle.bus.publish(ProgressEvent::PhaseProgress {
        phase: DiscoveryPhase::Harvest,
        completed: handle.counters.videos_accepted.load(Ordering::Relaxed),
        target: Some(max_candidates as u64),
    });

    // Let workers drain; on cancellation give in-flight work the grace
    // period, then abort.
    if handle.cancel.is_cancelled() {
        let grace = inner.settings.cancel_grace;
        let _ = tokio::time::timeout(grace, async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    } else {
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    tracing::error!(session_id = %handle.id, error = %e, "enrichment worker panicked");
                }
            }
        }
    }

    let fatal_message = fatal.lock().unwrap_or_else(|p| p.into_inner()).clone();
    if let Some(message) = fatal_message {
        return Outcome::Fatal(message);
    }
    if handle.cancel.is_cancelled() {
        return Outcome::Cancelled;
    }

    let stored = handle.counters.artists_stored.load(Ordering::Relaxed);
    Outcome::Completed {
        budget_exhausted: gate.was_denied() || gate.session_exhausted(),
        target_met: stored >= target as u64,
    }
}

/// Title gate, artist extraction and dedup for one candidate. Returns the
/// profile to enqueue when the candidate was accepted.
async fn screen_candidate(
    inner: &Arc<Inner>,
    handle: &Arc<SessionHandle>,
    dedup: &Arc<Deduplicator>,
    candidate: CandidateVideo,
) -> Option<ArtistProfile> {
    let bus = &handle.bus;
    bus.publish(ProgressEvent::CandidateFound {
        video_id: candidate.video_id.clone(),
        title: candidate.title.clone(),
    });

    if !inner.title_filter.accepts(&candidate.title) {
        bus.publish(ProgressEvent::ArtistRejected {
            video_id: Some(candidate.video_id),
            name: None,
            reason: RejectReason::TitleFiltered,
        });
        return None;
    }

    let Some(name) = inner.extractor.artist_name(&candidate.title) else {
        bus.publish(ProgressEvent::ArtistRejected {
            video_id: Some(candidate.video_id),
            name: None,
            reason: RejectReason::NameUnusable,
        });
        return None;
    };

    let profile = build_profile(inner, name, &candidate);

    match dedup.check_and_register(&profile).await {
        Ok(DedupOutcome::Fresh) => {
            handle
                .counters
                .videos_accepted
                .fetch_add(1, Ordering::Relaxed);
            bus.publish(ProgressEvent::ArtistAccepted {
                video_id: candidate.video_id,
                name: profile.name.clone(),
            });
            Some(profile)
        }
        Ok(DedupOutcome::DuplicateInSession) => {
            bus.publish(ProgressEvent::ArtistRejected {
                video_id: Some(candidate.video_id),
                name: Some(profile.name),
                reason: RejectReason::DuplicateInSession,
            });
            None
        }
        Ok(DedupOutcome::DuplicateOf(stored_id)) => {
            bus.publish(ProgressEvent::ArtistRejected {
                video_id: Some(candidate.video_id),
                name: Some(profile.name),
                reason: RejectReason::DuplicateOf { stored_id },
            });
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "dedup check failed; treating candidate as fresh");
            handle
                .counters
                .videos_accepted
                .fetch_add(1, Ordering::Relaxed);
            bus.publish(ProgressEvent::ArtistAccepted {
                video_id: candidate.video_id,
                name: profile.name.clone(),
            });
            Some(profile)
        }
    }
}

fn build_profile(inner: &Arc<Inner>, name: String, candidate: &CandidateVideo) -> ArtistProfile {
    let mut profile = ArtistProfile::new(name);
    profile.source_video_id = Some(candidate.video_id.clone());
    profile.youtube_channel_id = candidate.channel_id.clone();
    profile.youtube_channel_url = candidate.channel_url.clone();

    if let Some(snippet) = &candidate.description_snippet {
        profile.social_links = inner.extractor.social_links(snippet);
        profile.email = inner.extractor.email(snippet);
        profile.instagram_handle = profile.social_links.instagram.as_deref().and_then(|url| {
            inner
                .extractor
                .handle_from_url(crate::models::SocialPlatform::Instagram, url)
        });
        profile.tiktok_handle = profile.social_links.tiktok.as_deref().and_then(|url| {
            inner
                .extractor
                .handle_from_url(crate::models::SocialPlatform::Tiktok, url)
        });
    }
    profile
}

#[allow(clippy::too_many_arguments)]
async fn enrichment_worker(
    inner: Arc<Inner>,
    handle: Arc<SessionHandle>,
    work_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<ArtistProfile>>>,
    store_slots: Arc<Semaphore>,
    pipeline_stop: CancellationToken,
    fatal: Arc<Mutex<Option<String>>>,
    target: usize,
) {
    loop {
        let profile = {
            let mut rx = work_rx.lock().await;
            rx.recv().await
        };
        let Some(profile) = profile else {
            break;
        };

        if handle.cancel.is_cancelled() {
            // Session cancelled: partial results are discarded and the
            // terminal SessionFailed covers queued artists.
            break;
        }

        // Claim a store slot before spending enrichment effort; when the
        // target is already met the artist resolves as rejected.
        let slot = tokio::select! {
            _ = pipeline_stop.cancelled() => {
                if handle.cancel.is_cancelled() {
                    break;
                }
                handle.bus.publish(ProgressEvent::ArtistRejected {
                    video_id: profile.source_video_id.clone(),
                    name: Some(profile.name.clone()),
                    reason: RejectReason::TargetReached,
                });
                continue;
            }
            permit = store_slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (enriched, reports) = inner
            .coordinator
            .enrich(&profile, &handle.cancel)
            .await;

        if handle.cancel.is_cancelled() {
            break;
        }

        let enriched_count = handle
            .counters
            .artists_enriched
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        let applied_sources: Vec<String> = reports
            .iter()
            .filter(|report| report.succeeded())
            .map(|report| report.source.to_string())
            .collect();
        handle.bus.publish(ProgressEvent::ArtistEnriched {
            name: enriched.name.clone(),
            applied_sources,
        });
        handle.bus.publish(ProgressEvent::PhaseProgress {
            phase: DiscoveryPhase::Enrich,
            completed: enriched_count,
            target: None,
        });

        let mut final_profile = enriched;
        final_profile.enrichment_score = scorer::score(&final_profile);

        match inner.store.upsert_artist(&final_profile).await {
            Ok(record) => {
                let stored_event = ProgressEvent::ArtistStored {
                    name: final_profile.name.clone(),
                    artist_id: record.id,
                    score: final_profile.enrichment_score,
                };
                handle.bus.publish(stored_event.clone());
                journal(inner.store.as_ref(), handle.id, &stored_event).await;

                let stored = handle
                    .counters
                    .artists_stored
                    .fetch_add(1, Ordering::Relaxed)
                    + 1;
                handle.bus.publish(ProgressEvent::PhaseProgress {
                    phase: DiscoveryPhase::Store,
                    completed: stored,
                    target: Some(target as u64),
                });
                // This slot is spent for good.
                slot.forget();
                if stored >= target as u64 {
                    pipeline_stop.cancel();
                }
            }
            Err(e) if e.kind() == ErrorKind::DataQuality => {
                handle.bus.publish(ProgressEvent::ArtistRejected {
                    video_id: final_profile.source_video_id.clone(),
                    name: Some(final_profile.name.clone()),
                    reason: RejectReason::DataQuality {
                        detail: e.to_string(),
                    },
                });
                drop(slot);
            }
            Err(e) => {
                tracing::error!(
                    session_id = %handle.id,
                    artist = %final_profile.name,
                    error = %e,
                    "artist store failed"
                );
                let mut fatal_slot = fatal.lock().unwrap_or_else(|p| p.into_inner());
                if fatal_slot.is_none() {
                    *fatal_slot = Some(e.to_string());
                }
                drop(fatal_slot);
                pipeline_stop.cancel();
                break;
            }
        }
    }
}

async fn finish_session(
    inner: &Arc<Inner>,
    handle: &Arc<SessionHandle>,
    outcome: Outcome,
    budget_exhausted: bool,
) {
    let now = inner.clock.now();
    let elapsed_ms = (now - handle.started_at).num_milliseconds().max(0) as u64;

    let (state, event) = match outcome {
        Outcome::Completed { target_met, .. } => {
            let summary = SessionSummary {
                counters: handle.counters.snapshot(),
                budget_exhausted,
                harvest_exhausted: !target_met,
                elapsed_ms,
            };
            (
                SessionState::Completed,
                ProgressEvent::SessionCompleted { summary },
            )
        }
        Outcome::Cancelled => (
            SessionState::Cancelled,
            ProgressEvent::SessionFailed {
                failure: SessionFailure {
                    kind: ErrorKind::Cancelled,
                    message: "session cancelled".to_string(),
                },
            },
        ),
        Outcome::Fatal(message) => (
            SessionState::Failed,
            ProgressEvent::session_failed(ErrorKind::Fatal, message),
        ),
    };

    {
        let mut meta = handle.meta();
        meta.state = state;
        meta.ended_at = Some(now);
        if let ProgressEvent::SessionFailed { failure } = &event {
            meta.last_error = Some(failure.message.clone());
        }
    }

    // Terminal event is flushed before the driver exits; the bus closes
    // itself behind it.
    handle.bus.publish(event.clone());
    journal(inner.store.as_ref(), handle.id, &event).await;
    if let Err(e) = inner.store.record_session(&handle.snapshot()).await {
        tracing::warn!(session_id = %handle.id, error = %e, "final session record failed");
    }

    tracing::info!(
        session_id = %handle.id,
        state = ?state,
        counters = ?handle.counters.snapshot(),
        "discovery session finished"
    );
}
