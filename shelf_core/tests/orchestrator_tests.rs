mod common;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use common::{MockEntryBuilder, TestContext};
use shelf_core::{
    MAX_CONCURRENT_SOURCE_CALLS, MigrationConfig, MigrationError, MigrationOptions,
    MigrationOrchestrator, SearchResult,
};
use shelf_db::{Library, SourceEntry};
use shelf_source::{ConcurrencyProbe, FakeSource};
use tokio::time::timeout;

async fn searched(orchestrator: &MigrationOrchestrator) -> Result<()> {
    timeout(Duration::from_secs(10), orchestrator.wait_for_search()).await?;
    Ok(())
}

async fn loaded(orchestrator: &MigrationOrchestrator) -> Result<()> {
    let mut items = orchestrator.subscribe_items();
    timeout(
        Duration::from_secs(10),
        items.wait_for(|items| !items.is_empty()),
    )
    .await??;
    Ok(())
}

fn list(ids: &[u64]) -> MigrationConfig {
    MigrationConfig::List {
        entry_ids: ids.to_vec(),
    }
}

#[tokio::test]
async fn test_picks_similar_candidate_over_unrelated_one() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/berserk-of-gluttony", "Berserk of Gluttony", 40)
            .with_entry("/berserk", "Berserk", 12),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/berserk", "Berserk")
        .with_chapters(10)
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;

    let item = orchestrator.item(old.id).unwrap();
    assert_eq!(item.chapter_summary.chapter_count, 10);
    assert_eq!(item.source_label, "Old");
    let SearchResult::Result(target) = item.search_result() else {
        panic!("expected a match, got {:?}", item.search_result());
    };
    let target = ctx.library().entry(target).await?.unwrap();
    assert_eq!(target.source_id, 2);
    assert_eq!(target.url, "/berserk");
    assert_eq!(ctx.library().chapters(target.id).await?.len(), 12);
    assert!(target.thumbnail_url.is_some());
    assert_eq!(item.progress(), (1, 1));
    assert!(orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_prefers_source_with_most_chapters() -> Result<()> {
    let small = Arc::new(FakeSource::new(2, "Small").with_entry("/monster", "Monster", 12));
    let large = Arc::new(FakeSource::new(3, "Large").with_entry("/monster", "Monster", 20));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), small, large])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;

    let SearchResult::Result(target) = orchestrator.item(old.id).unwrap().search_result() else {
        panic!("expected a match");
    };
    let target = ctx.library().entry(target).await?.unwrap();
    assert_eq!(target.source_id, 3);
    assert_eq!(ctx.library().chapters(target.id).await?.len(), 20);
    Ok(())
}

#[tokio::test]
async fn test_sequential_mode_stops_at_first_match() -> Result<()> {
    let first = Arc::new(FakeSource::new(2, "First").with_entry("/monster", "Monster", 12));
    let second = Arc::new(FakeSource::new(3, "Second").with_entry("/monster", "Monster", 20));
    let ctx = TestContext::new(vec![
        Arc::new(FakeSource::new(1, "Old")),
        first.clone(),
        second.clone(),
    ])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let options = MigrationOptions {
        use_source_with_most_chapters: false,
        ..Default::default()
    };
    let orchestrator = MigrationOrchestrator::start(ctx.context.clone(), options, list(&[old.id]));
    searched(&orchestrator).await?;

    let SearchResult::Result(target) = orchestrator.item(old.id).unwrap().search_result() else {
        panic!("expected a match");
    };
    assert_eq!(ctx.library().entry(target).await?.unwrap().source_id, 2);
    assert!(first.search_calls() > 0);
    assert_eq!(second.search_calls(), 0);
    Ok(())
}

#[tokio::test]
async fn test_source_calls_are_globally_bounded() -> Result<()> {
    let probe = ConcurrencyProbe::new();
    let mut sources = vec![Arc::new(FakeSource::new(1, "Old"))];
    for id in 2..=4 {
        let mut source = FakeSource::new(id, &format!("Source {id}"))
            .with_probe(probe.clone())
            .with_latency(Duration::from_millis(20));
        for n in 0..12 {
            source = source.with_entry(&format!("/series-{n}"), &format!("Series {n}"), 3);
        }
        sources.push(Arc::new(source));
    }
    let ctx = TestContext::new(sources)?;
    let mut ids = vec![];
    for n in 0..12 {
        let entry = MockEntryBuilder::new(1, &format!("/old/{n}"), &format!("Series {n}"))
            .insert(ctx.library())
            .await?;
        ids.push(entry.id);
    }

    let orchestrator =
        MigrationOrchestrator::start(ctx.context.clone(), MigrationOptions::default(), list(&ids));
    searched(&orchestrator).await?;

    assert!(probe.max_in_flight() <= MAX_CONCURRENT_SOURCE_CALLS);
    assert!(probe.max_in_flight() > 1);
    assert_eq!(probe.in_flight(), 0);
    assert_eq!(orchestrator.unfinished_count(), 0);
    assert!(
        orchestrator
            .items()
            .iter()
            .all(|item| matches!(item.search_result(), SearchResult::Result(_)))
    );
    Ok(())
}

#[tokio::test]
async fn test_dispose_cancels_searches() -> Result<()> {
    let slow = Arc::new(
        FakeSource::new(2, "Slow")
            .with_entry("/monster", "Monster", 3)
            .with_latency(Duration::from_secs(30)),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), slow])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    loaded(&orchestrator).await?;
    let items = orchestrator.items();

    orchestrator.dispose();
    searched(&orchestrator).await?;

    assert!(orchestrator.items().is_empty());
    assert_eq!(orchestrator.unfinished_count(), 0);
    assert!(items.iter().all(|item| item.is_cancelled()));
    assert!(!orchestrator.is_done());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_disposed_run_never_publishes_items() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/monster", "Monster", 3)
            .with_latency(Duration::from_millis(50)),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    for attempt in 0..40 {
        let orchestrator = MigrationOrchestrator::start(
            ctx.context.clone(),
            MigrationOptions::default(),
            list(&[old.id]),
        );
        for _ in 0..attempt % 8 {
            tokio::task::yield_now().await;
        }
        orchestrator.dispose();
        searched(&orchestrator).await?;

        assert!(orchestrator.items().is_empty(), "attempt {attempt}");
        assert_eq!(orchestrator.unfinished_count(), 0);
    }
    Ok(())
}

#[tokio::test]
async fn test_remove_item_only_cancels_that_item() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/monster", "Monster", 3)
            .with_entry("/berserk", "Berserk", 3)
            .with_latency(Duration::from_millis(200)),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let monster = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;
    let berserk = MockEntryBuilder::new(1, "/old/berserk", "Berserk")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[monster.id, berserk.id]),
    );
    loaded(&orchestrator).await?;
    let removed = orchestrator.item(monster.id).unwrap();

    assert!(orchestrator.remove_item(monster.id).await);
    assert!(!orchestrator.remove_item(monster.id).await);
    searched(&orchestrator).await?;

    assert!(removed.is_cancelled());
    assert_eq!(removed.search_result(), SearchResult::Searching);
    let items = orchestrator.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].entry.id, berserk.id);
    assert!(matches!(items[0].search_result(), SearchResult::Result(_)));
    assert!(orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_failing_sources_resolve_to_not_found() -> Result<()> {
    let sources = (2..=3)
        .map(|id| {
            Arc::new(
                FakeSource::new(id, &format!("Source {id}"))
                    .with_entry("/monster", "Monster", 5)
                    .failing_query("doomed"),
            )
        })
        .collect::<Vec<_>>();
    let mut all = vec![Arc::new(FakeSource::new(1, "Old"))];
    all.extend(sources);
    let ctx = TestContext::new(all)?;
    let doomed = MockEntryBuilder::new(1, "/old/doomed", "Doomed Tale")
        .insert(ctx.library())
        .await?;
    let monster = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[doomed.id, monster.id]),
    );
    searched(&orchestrator).await?;

    let doomed = orchestrator.item(doomed.id).unwrap();
    assert_eq!(doomed.search_result(), SearchResult::NotFound);
    assert_eq!(doomed.progress(), (2, 2));
    assert_eq!(orchestrator.unfinished_count(), 0);
    assert_eq!(orchestrator.manual_migrations_count(), 1);
    assert!(orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_run_without_matches_never_reports_done() -> Result<()> {
    let broken = Arc::new(FakeSource::new(2, "Broken").failing());
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), broken])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;

    assert_eq!(orchestrator.unfinished_count(), 0);
    assert_eq!(orchestrator.manual_migrations_count(), 1);
    assert!(!orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_missing_entries_are_skipped() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/monster", "Monster", 3));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[9999, old.id]),
    );
    searched(&orchestrator).await?;

    assert_eq!(orchestrator.items().len(), 1);
    assert!(orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_single_mode_uses_known_target() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/monster", "Monster", 5));
    let other = Arc::new(FakeSource::new(3, "Other").with_entry("/monster", "Monster", 50));
    let ctx = TestContext::new(vec![
        Arc::new(FakeSource::new(1, "Old")),
        alt.clone(),
        other.clone(),
    ])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;
    let target = ctx
        .library()
        .network_to_local(2, &SourceEntry::new("/monster", "Monster"))
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        MigrationConfig::Single {
            from: old.id,
            to: Some(target.id),
        },
    );
    searched(&orchestrator).await?;

    let item = orchestrator.item(old.id).unwrap();
    assert_eq!(item.search_result(), SearchResult::Result(target.id));
    assert_eq!(item.progress(), (3, 3));
    assert_eq!(alt.search_calls() + other.search_calls(), 0);
    assert_eq!(ctx.library().chapters(target.id).await?.len(), 5);
    Ok(())
}

#[tokio::test]
async fn test_manual_override() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/kaibutsu", "Kaibutsu", 7));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;
    let item = orchestrator.item(old.id).unwrap();
    assert_eq!(item.search_result(), SearchResult::NotFound);
    assert!(!orchestrator.is_done());

    orchestrator
        .use_entry_for_migration(old.id, 2, SourceEntry::new("/kaibutsu", "Kaibutsu"))
        .await;

    let SearchResult::Result(target) = item.search_result() else {
        panic!("expected the chosen entry");
    };
    let target = ctx.library().entry(target).await?.unwrap();
    assert_eq!(target.url, "/kaibutsu");
    assert_eq!(ctx.library().chapters(target.id).await?.len(), 7);
    assert_eq!(orchestrator.manual_migrations_count(), 0);
    assert!(orchestrator.is_done());
    Ok(())
}

#[tokio::test]
async fn test_manual_override_failure_notifies() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/monster", "Monster", 3));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;
    let mut notices = orchestrator.subscribe_notices();

    orchestrator
        .use_entry_for_migration(old.id, 2, SourceEntry::new("/missing", "Missing"))
        .await;

    assert_eq!(
        orchestrator.item(old.id).unwrap().search_result(),
        SearchResult::NotFound
    );
    let notice = notices.try_recv()?;
    assert!(notice.contains("Monster"), "{notice}");

    orchestrator
        .use_entry_for_migration(4242, 2, SourceEntry::new("/monster", "Monster"))
        .await;
    assert!(notices.try_recv()?.contains("4242"));
    Ok(())
}

#[tokio::test]
async fn test_migrate_all() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/monster", "Monster", 8)
            .with_entry("/berserk", "Berserk", 4),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let monster = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .with_chapters(6)
        .read_up_to(5.0)
        .insert(ctx.library())
        .await?;
    let berserk = MockEntryBuilder::new(1, "/old/berserk", "Berserk")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[monster.id, berserk.id]),
    );
    searched(&orchestrator).await?;
    let mut navigate_out = orchestrator.subscribe_navigate_out();

    orchestrator.migrate_all(true).await?;

    assert_eq!(orchestrator.finalize_progress(), 1.0);
    assert!(*navigate_out.borrow_and_update());
    for (old, url) in [(&monster, "/monster"), (&berserk, "/berserk")] {
        let old = ctx.library().entry(old.id).await?.unwrap();
        assert!(!old.favorite);
        assert_eq!(old.date_added, 0);
        let SearchResult::Result(target) = orchestrator.item(old.id).unwrap().search_result()
        else {
            panic!("expected a match");
        };
        let new = ctx.library().entry(target).await?.unwrap();
        assert_eq!(new.url, url);
        assert!(new.favorite);
        assert!(new.date_added > 0);
    }

    let SearchResult::Result(target) = orchestrator.item(monster.id).unwrap().search_result()
    else {
        panic!("expected a match");
    };
    let read = ctx
        .library()
        .chapters(target)
        .await?
        .iter()
        .filter(|c| c.read)
        .count();
    assert_eq!(read, 5);
    assert_eq!(ctx.downloads.deleted.lock().unwrap().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_cancel_finalize_stops_after_current_entry() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/monster", "Monster", 3)
            .with_entry("/berserk", "Berserk", 3)
            .with_entry("/vagabond", "Vagabond", 3)
            .with_latency(Duration::from_millis(300)),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let mut old = vec![];
    for (url, title) in [
        ("/old/monster", "Monster"),
        ("/old/berserk", "Berserk"),
        ("/old/vagabond", "Vagabond"),
    ] {
        old.push(
            MockEntryBuilder::new(1, url, title)
                .insert(ctx.library())
                .await?,
        );
    }
    let ids = old.iter().map(|e| e.id).collect::<Vec<_>>();

    let orchestrator =
        MigrationOrchestrator::start(ctx.context.clone(), MigrationOptions::default(), list(&ids));
    searched(&orchestrator).await?;
    assert!(orchestrator.is_done());

    let finalize = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.migrate_all(true).await })
    };
    // The first entry is still fetching its chapter list.
    tokio::time::sleep(Duration::from_millis(100)).await;
    orchestrator.cancel_finalize().await;
    let result = timeout(Duration::from_secs(10), finalize).await??;

    assert!(matches!(result, Err(MigrationError::Cancelled)));
    assert!(orchestrator.finalize_progress() < 1.0);
    assert!(!ctx.library().entry(old[0].id).await?.unwrap().favorite);
    for entry in &old[1..] {
        assert!(ctx.library().entry(entry.id).await?.unwrap().favorite);
        let SearchResult::Result(target) = orchestrator.item(entry.id).unwrap().search_result()
        else {
            panic!("expected a match");
        };
        assert!(!ctx.library().entry(target).await?.unwrap().favorite);
    }
    assert_eq!(
        *ctx.downloads.deleted.lock().unwrap(),
        vec![(old[0].id, "Old".to_string())]
    );
    Ok(())
}

#[tokio::test]
async fn test_normal_search_uses_raw_title() -> Result<()> {
    let alt = Arc::new(
        FakeSource::new(2, "Alt")
            .with_entry("/monster-musume", "Monster Musume", 30)
            .with_entry("/monster", "Monster", 12),
    );
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt.clone()])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let options = MigrationOptions {
        use_smart_search: false,
        ..Default::default()
    };
    let orchestrator = MigrationOrchestrator::start(ctx.context.clone(), options, list(&[old.id]));
    searched(&orchestrator).await?;

    assert_eq!(alt.queries(), vec!["Monster".to_string()]);
    let SearchResult::Result(target) = orchestrator.item(old.id).unwrap().search_result() else {
        panic!("expected a match");
    };
    assert_eq!(ctx.library().entry(target).await?.unwrap().url, "/monster");
    Ok(())
}

#[tokio::test]
async fn test_normal_search_appends_extra_params() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/monster", "Monster", 12));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt.clone()])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let options = MigrationOptions {
        use_smart_search: false,
        extra_search_params: Some(" lang:en ".to_string()),
        ..Default::default()
    };
    let orchestrator = MigrationOrchestrator::start(ctx.context.clone(), options, list(&[old.id]));
    searched(&orchestrator).await?;

    assert_eq!(alt.queries(), vec!["Monster lang:en".to_string()]);
    assert_eq!(
        orchestrator.item(old.id).unwrap().search_result(),
        SearchResult::NotFound
    );
    Ok(())
}

#[tokio::test]
async fn test_migrate_one_copy_keeps_old_entry() -> Result<()> {
    let alt = Arc::new(FakeSource::new(2, "Alt").with_entry("/monster", "Monster", 3));
    let ctx = TestContext::new(vec![Arc::new(FakeSource::new(1, "Old")), alt])?;
    let old = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[old.id]),
    );
    searched(&orchestrator).await?;

    orchestrator.migrate_one(old.id, true).await?;

    assert!(orchestrator.items().is_empty());
    assert!(ctx.library().entry(old.id).await?.unwrap().favorite);
    assert!(ctx.downloads.deleted.lock().unwrap().is_empty());
    assert!(*orchestrator.subscribe_navigate_out().borrow());
    Ok(())
}

#[tokio::test]
async fn test_items_matching() -> Result<()> {
    let ctx = TestContext::new(vec![
        Arc::new(FakeSource::new(1, "Old")),
        Arc::new(FakeSource::new(2, "Alt")),
    ])?;
    let monster = MockEntryBuilder::new(1, "/old/monster", "Monster")
        .insert(ctx.library())
        .await?;
    let berserk = MockEntryBuilder::new(1, "/old/berserk", "Berserk (Deluxe)")
        .insert(ctx.library())
        .await?;

    let orchestrator = MigrationOrchestrator::start(
        ctx.context.clone(),
        MigrationOptions::default(),
        list(&[monster.id, berserk.id]),
    );
    searched(&orchestrator).await?;

    let found = orchestrator.items_matching("berserk");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].entry.id, berserk.id);
    Ok(())
}
