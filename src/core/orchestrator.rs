//! Harvest orchestrator.
//!
//! Runs every selected source start to finish, one after the other:
//! prepare (selection, schedule check, engine construction), download,
//! save (advancing each cursor only past durably saved items), and finally
//! digest dispatch over what was saved.

use std::collections::HashSet;

use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::{debug, error, info, instrument, warn};

use super::engine::CrawlEngine;
use super::lock::RunLock;
use super::schedule::PollScheduler;
use super::HarvestError;
use crate::adapters::AdapterRegistry;
use crate::config::{Settings, SourceConfig};
use crate::digest::{render_message, DigestBatcher, DigestSender, DigestSource, Outbox};
use crate::domain::{ContentItem, SourceState};
use crate::store::{FileBackend, MediaStore, StateStore, UnitOfWork};

/// Per-invocation switches
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Sources to run (case-insensitive); empty means all
    pub sources: Vec<String>,
    /// Ignore poll schedules
    pub force: bool,
    /// Run disabled sources too
    pub ignore_enabled: bool,
    /// Download only: no saves, no digest, nothing committed
    pub dry_run: bool,
    pub skip_save: bool,
    pub skip_digest: bool,
}

/// Outcome of one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceReport {
    pub name: String,
    /// New items downloaded
    pub fetched: usize,
    /// Items durably saved
    pub saved: usize,
}

/// Outcome of a run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestReport {
    pub sources: Vec<SourceReport>,
    /// Digest messages dispatched
    pub messages: usize,
}

impl HarvestReport {
    pub fn saved(&self) -> usize {
        self.sources.iter().map(|s| s.saved).sum()
    }
}

struct PreparedSource {
    source: SourceConfig,
    engine: CrawlEngine,
    fetched: usize,
    saved: usize,
}

/// Selects sources, runs their engines, persists and reports
pub struct HarvestOrchestrator<Tz: TimeZone = Local> {
    settings: Settings,
    registry: AdapterRegistry,
    store: StateStore,
    scheduler: PollScheduler<Tz>,
    sender: Box<dyn DigestSender>,
    prepared: Vec<PreparedSource>,
}

impl HarvestOrchestrator<Local> {
    /// Orchestrator over the configured backends, writing digests to the
    /// outbox and scheduling in local time
    pub fn new(settings: Settings, registry: AdapterRegistry, started: DateTime<Utc>) -> Self {
        let files = settings
            .files_backend
            .then(|| FileBackend::new(&settings.state_dir, &settings.metadata_dir));
        let store = StateStore::new(MediaStore::new(&settings.media_dir), files);
        let sender = Box::new(Outbox::new(&settings.outbox_dir, started));

        Self {
            settings,
            registry,
            store,
            scheduler: PollScheduler::local(),
            sender,
            prepared: Vec::new(),
        }
    }
}

impl<Tz: TimeZone> HarvestOrchestrator<Tz> {
    /// Replace the poll scheduler
    pub fn with_scheduler<T: TimeZone>(self, scheduler: PollScheduler<T>) -> HarvestOrchestrator<T> {
        HarvestOrchestrator {
            settings: self.settings,
            registry: self.registry,
            store: self.store,
            scheduler,
            sender: self.sender,
            prepared: self.prepared,
        }
    }

    /// Replace the digest sender
    pub fn with_sender(mut self, sender: Box<dyn DigestSender>) -> Self {
        self.sender = sender;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Names of the prepared sources, in run order
    pub fn prepared(&self) -> Vec<&str> {
        self.prepared.iter().map(|p| p.source.name.as_str()).collect()
    }

    /// Build an engine for every selected, enabled and due source,
    /// replacing those of any previous run.
    ///
    /// Sources run in case-insensitive name order. Construction failures
    /// skip the source. Returns the number of engines ready to run.
    pub async fn prepare(
        &mut self,
        uow: &UnitOfWork,
        sources: &[SourceConfig],
        options: &RunOptions,
        now: DateTime<Utc>,
    ) -> usize {
        self.prepared.clear();

        let wanted: Option<HashSet<String>> = (!options.sources.is_empty())
            .then(|| options.sources.iter().map(|s| s.to_lowercase()).collect());

        if let Some(ref wanted) = wanted {
            for name in wanted {
                if !sources.iter().any(|s| s.name.to_lowercase() == *name) {
                    warn!(source = %name, "Requested source is not defined");
                }
            }
        }

        let mut selected: Vec<&SourceConfig> = sources
            .iter()
            .filter(|s| {
                wanted
                    .as_ref()
                    .map_or(true, |w| w.contains(&s.name.to_lowercase()))
            })
            .collect();
        selected.sort_by_key(|s| s.name.to_lowercase());

        for source in selected {
            if !source.enabled && !options.ignore_enabled {
                debug!(source = %source.name, "Disabled, skipping");
                continue;
            }

            let state = self.store.load(uow, &source.name).await;
            let last_updated = state.as_ref().and_then(|s| s.last_updated);
            if !options.force && !self.scheduler.is_due(source.poll_interval, last_updated, now) {
                info!(source = %source.name, interval = %source.poll_interval, "Not due, skipping");
                continue;
            }

            let adapter = match self.registry.build(source) {
                Ok(adapter) => adapter,
                Err(e) => {
                    warn!(source = %source.name, error = %e, "Cannot build adapter, skipping");
                    continue;
                }
            };

            let engine = CrawlEngine::new(
                source,
                adapter,
                self.store.clone(),
                state,
                self.settings.max_batch_size,
            );
            self.prepared.push(PreparedSource {
                source: source.clone(),
                engine,
                fetched: 0,
                saved: 0,
            });
        }

        info!(sources = self.prepared.len(), "Sources prepared");
        self.prepared.len()
    }

    /// Run every prepared engine in order. A failing source never stops
    /// the following ones.
    pub async fn download(&mut self, uow: &UnitOfWork) {
        for prepared in &mut self.prepared {
            prepared.fetched = prepared.engine.run(uow).await;
        }
    }

    /// Persist fetched items in fetch order and flush each source's state
    /// once.
    ///
    /// The first failed save of a source drops it and every later item of
    /// that source; the cursor only covers the saved prefix. Returns the
    /// saved items per source, ready for the digest.
    pub async fn save(&mut self, uow: &UnitOfWork) -> Vec<DigestSource<ContentItem>> {
        let mut digest = Vec::new();

        for prepared in &mut self.prepared {
            let items = prepared.engine.take_results();
            if items.is_empty() {
                continue;
            }

            let name = prepared.source.name.clone();
            let mut state = prepared
                .engine
                .state()
                .cloned()
                .unwrap_or_else(|| SourceState::new(&name));

            let total = items.len();
            let mut saved = Vec::with_capacity(total);
            for item in items {
                match self
                    .store
                    .save_item(uow, prepared.engine.adapter(), &item)
                    .await
                {
                    Ok(_) => {
                        state.advance(&item);
                        saved.push(item);
                    }
                    Err(e) => {
                        error!(
                            source = %name,
                            item = %item.item_id(),
                            error = %e,
                            dropped = total - saved.len(),
                            "Save failed, truncating results"
                        );
                        break;
                    }
                }
            }

            prepared.saved = saved.len();
            if saved.is_empty() {
                continue;
            }

            if let Err(e) = self.store.store(uow, &state).await {
                error!(source = %name, error = %e, "Failed to store source state");
            }
            digest.push(DigestSource::new(name, prepared.source.title.clone(), saved));
        }

        digest
    }

    /// Pack, render and send the digest. Returns the number of messages
    /// sent.
    pub async fn dispatch(&self, sources: Vec<DigestSource<ContentItem>>, now: DateTime<Utc>) -> usize {
        let batcher = DigestBatcher::new(self.settings.digest.max_message_bytes);
        let messages = batcher.pack(sources);

        let mut sent = 0;
        for message in &messages {
            let rendered = render_message(message, &self.settings.digest, now);
            match self.sender.send(&rendered).await {
                Ok(()) => sent += 1,
                Err(e) => error!(message = message.index, error = %e, "Digest dispatch failed"),
            }
        }

        info!(messages = sent, "Digest dispatched");
        sent
    }

    /// Full run under the run lock and a single unit of work
    #[instrument(skip_all, fields(dry_run = options.dry_run))]
    pub async fn run(
        &mut self,
        sources: &[SourceConfig],
        options: &RunOptions,
    ) -> Result<HarvestReport, HarvestError> {
        let _lock = RunLock::acquire(&self.settings.lock_path())?;
        let now = Utc::now();
        let uow = UnitOfWork::begin(self.settings.database.as_deref())?;

        if self.prepare(&uow, sources, options, now).await == 0 {
            info!("Nothing to run");
        }
        self.download(&uow).await;

        let saved = if options.dry_run || options.skip_save {
            info!("Not saving results");
            Vec::new()
        } else {
            self.save(&uow).await
        };

        if options.dry_run {
            drop(uow);
        } else {
            uow.commit()?;
        }

        let mut report = HarvestReport {
            sources: self
                .prepared
                .iter()
                .map(|p| SourceReport {
                    name: p.source.name.clone(),
                    fetched: p.fetched,
                    saved: p.saved,
                })
                .collect(),
            messages: 0,
        };

        if options.dry_run || options.skip_digest {
            debug!("Digest disabled");
        } else if !saved.is_empty() {
            report.messages = self.dispatch(saved, now).await;
        }

        info!(saved = report.saved(), messages = report.messages, "Harvest finished");
        Ok(report)
    }
}
