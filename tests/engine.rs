//! Crawl Engine Integration Tests
//!
//! Crawl and poll walks against an in-memory site: batch limits, start
//! points, dedup against saved items and failure isolation.

mod common;

use common::{ScriptedAdapter, ScriptedSite};
use gleaner::config::SourceConfig;
use gleaner::core::{CrawlEngine, RunMode, StartPoint};
use gleaner::domain::SourceState;
use gleaner::store::{FileBackend, MediaStore, StateStore, UnitOfWork};
use tempfile::TempDir;

fn store(temp: &TempDir) -> StateStore {
    StateStore::new(
        MediaStore::new(temp.path().join("media")),
        Some(FileBackend::new(
            temp.path().join("state"),
            temp.path().join("metadata"),
        )),
    )
}

fn engine(
    temp: &TempDir,
    site: &ScriptedSite,
    source: &SourceConfig,
    state: Option<SourceState>,
    max_batch_size: usize,
) -> CrawlEngine {
    CrawlEngine::new(
        source,
        Box::new(ScriptedAdapter::new("comic", site.clone())),
        store(temp),
        state,
        max_batch_size,
    )
}

fn ids(engine: &CrawlEngine) -> Vec<&str> {
    engine.results().iter().map(|i| i.item_id()).collect()
}

#[tokio::test]
async fn test_crawl_from_first_respects_batch_size() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(5);
    let mut source = common::source("comic", RunMode::Crawl, 3);
    source.initial = StartPoint::First;

    let mut engine = engine(&temp, &site, &source, None, 7);
    let uow = UnitOfWork::files_only();

    assert_eq!(engine.run(&uow).await, 3);
    assert_eq!(ids(&engine), vec!["1", "2", "3"]);
}

#[tokio::test]
async fn test_crawl_capped_by_max_batch_size() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(10);
    let mut source = common::source("comic", RunMode::Crawl, 9);
    source.initial = StartPoint::First;

    let mut engine = engine(&temp, &site, &source, None, 2);
    assert_eq!(engine.batch_size(), 2);

    let uow = UnitOfWork::files_only();
    assert_eq!(engine.crawl(&uow, 100).await.unwrap(), 2);
    assert_eq!(ids(&engine), vec!["1", "2"]);
}

#[tokio::test]
async fn test_crawl_from_seed_url_stops_at_frontier() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(5);
    let mut source = common::source("comic", RunMode::Crawl, 7);
    source.initial = StartPoint::Url(ScriptedSite::url("4"));

    let mut engine = engine(&temp, &site, &source, None, 7);
    let uow = UnitOfWork::files_only();

    assert_eq!(engine.run(&uow).await, 2);
    assert_eq!(ids(&engine), vec!["4", "5"]);
}

#[tokio::test]
async fn test_crawl_resumes_from_cursor_and_skips_saved_item() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(5);
    let mut source = common::source("comic", RunMode::Crawl, 2);
    source.initial = StartPoint::First;
    let uow = UnitOfWork::files_only();

    let mut first = engine(&temp, &site, &source, None, 7);
    first.run(&uow).await;
    let mut state = SourceState::new("comic");
    for item in first.take_results() {
        store(&temp).save_item(&uow, first.adapter(), &item).await.unwrap();
        state.advance(&item);
    }
    assert_eq!(state.last_item_id.as_deref(), Some("2"));

    let mut second = engine(&temp, &site, &source, Some(state), 7);
    second.run(&uow).await;
    assert_eq!(ids(&second), vec!["3", "4"]);
}

#[tokio::test]
async fn test_poll_fetches_newest_only() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(5);
    let source = common::source("comic", RunMode::Poll, 7);

    let mut engine = engine(&temp, &site, &source, None, 7);
    let uow = UnitOfWork::files_only();

    assert_eq!(engine.run(&uow).await, 1);
    assert_eq!(ids(&engine), vec!["5"]);
}

#[tokio::test]
async fn test_poll_twice_yields_nothing_new() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(3);
    let source = common::source("comic", RunMode::Poll, 7);
    let uow = UnitOfWork::files_only();

    let mut first = engine(&temp, &site, &source, None, 7);
    assert_eq!(first.poll(&uow).await.unwrap(), 1);
    for item in first.take_results() {
        store(&temp).save_item(&uow, first.adapter(), &item).await.unwrap();
    }

    let mut second = engine(&temp, &site, &source, None, 7);
    assert_eq!(second.poll(&uow).await.unwrap(), 0);
    assert!(second.results().is_empty());

    site.push("4", b"item-4");
    let mut third = engine(&temp, &site, &source, None, 7);
    assert_eq!(third.poll(&uow).await.unwrap(), 1);
    assert_eq!(ids(&third), vec!["4"]);
}

#[tokio::test]
async fn test_failure_keeps_items_fetched_before_it() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(5);
    site.fail_media("3");
    let mut source = common::source("comic", RunMode::Crawl, 5);
    source.initial = StartPoint::First;

    let mut engine = engine(&temp, &site, &source, None, 7);
    let uow = UnitOfWork::files_only();

    // The error is logged, not propagated
    assert_eq!(engine.run(&uow).await, 2);
    assert_eq!(ids(&engine), vec!["1", "2"]);
}

#[tokio::test]
async fn test_page_failure_aborts_walk() {
    let temp = TempDir::new().unwrap();
    let site = ScriptedSite::with_items(4);
    site.fail_page("2");
    let mut source = common::source("comic", RunMode::Crawl, 4);
    source.initial = StartPoint::First;

    let mut engine = engine(&temp, &site, &source, None, 7);
    let uow = UnitOfWork::files_only();

    assert!(engine.crawl(&uow, 4).await.is_err());
    assert_eq!(ids(&engine), vec!["1"]);
}
