//! End-to-end scrape scenarios through the batch coordinator.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use assert_matches::assert_matches;
use tokio::sync::Semaphore;

use common::{coordinator, descriptor, drain, hit, registry, results, shared, FnProvider};
use reelscrape::scrape::providers::{StaticEntry, StaticProvider};
use reelscrape::scrape::{
    BatchEvent, ErrorKind, FetchedEntity, ItemOutcome, JobState, MediaItem, MergeConfig,
    ProviderError, ScrapeTarget, SearchTerm,
};
use reelscrape_common::{CanonicalId, Field, FieldValue, MediaKind, Value};

#[tokio::test]
async fn movie_without_known_id_is_searched_then_scraped() {
    let a = StaticProvider::new(descriptor("a", &[MediaKind::Movie], &[Field::Title, Field::Year]))
        .with_entry(
            StaticEntry::new(MediaKind::Movie, "Example Movie")
                .with_year(1999)
                .with_id(CanonicalId::new("a", "tt0000001"))
                .with_field(Field::Title, "Example Movie")
                .with_field(Field::Year, 1999i64),
        );
    let a = Arc::new(a);
    let engine = coordinator(registry(vec![shared(&a)]), 4);
    let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title, Field::Year]);

    let item = MediaItem::movie("Example Movie", 1999);
    let result = engine.scrape_one(item.clone(), &config).await.unwrap();

    let ItemOutcome::Succeeded { record } = result.outcome else {
        panic!("expected success, got {:?}", result.outcome);
    };
    let expected: BTreeMap<Field, FieldValue> = [
        (
            Field::Title,
            FieldValue::new(Value::from("Example Movie"), "a".into()),
        ),
        (Field::Year, FieldValue::new(Value::Integer(1999), "a".into())),
    ]
    .into();
    assert_eq!(record.fields, expected);
    assert_eq!(record.item_id, item.id);
    assert_eq!(
        record.id_for(&"a".into()),
        Some(&CanonicalId::new("a", "tt0000001"))
    );
    // one search, one scrape
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn failed_required_provider_only_removes_dependent_fields() {
    let show_fields = [Field::Title, Field::Plot, Field::SeasonPoster];

    // `a` finds the show but cannot fetch it.
    let a = FnProvider::new(descriptor("a", &[MediaKind::TvShow], &show_fields))
        .on_search(|_| Ok(vec![hit(CanonicalId::new("a", "tv42"), "Show 42", None)]))
        .on_fetch(|_| Err(ProviderError::NotFound("tv42 is gone".into())));
    // `b` serves artwork keyed by `a` ids.
    let b = FnProvider::new(
        descriptor("b", &[MediaKind::TvShow], &[Field::SeasonPoster]).requires_id_from("a"),
    );
    // `c` is independent.
    let c = FnProvider::new(descriptor("c", &[MediaKind::TvShow], &show_fields))
        .on_search(|_| Ok(vec![hit(CanonicalId::new("c", "42"), "Show 42", None)]))
        .on_fetch(|_| {
            Ok(FetchedEntity {
                ids: vec![CanonicalId::new("c", "42")],
                fields: [
                    (Field::Title, Value::from("Show 42")),
                    (Field::Plot, Value::from("A show.")),
                ]
                .into(),
            })
        });
    let (a, b, c) = (Arc::new(a), Arc::new(b), Arc::new(c));

    let engine = coordinator(registry(vec![shared(&a), shared(&b), shared(&c)]), 4);
    let config = MergeConfig::new()
        .assign(MediaKind::TvShow, Field::Title, "c")
        .assign(MediaKind::TvShow, Field::Plot, "c")
        .assign(MediaKind::TvShow, Field::SeasonPoster, "b");

    let item = MediaItem::new(MediaKind::TvShow, "Show 42");
    let result = engine.scrape_one(item, &config).await.unwrap();

    let ItemOutcome::Partial {
        record,
        field_errors,
    } = result.outcome
    else {
        panic!("expected partial, got {:?}", result.outcome);
    };
    assert_eq!(record.get(Field::Title), Some(&Value::from("Show 42")));
    assert_eq!(record.get(Field::Plot), Some(&Value::from("A show.")));
    assert!(record.get(Field::SeasonPoster).is_none());

    assert_eq!(field_errors.len(), 1);
    assert_eq!(field_errors[0].field, Field::SeasonPoster);
    assert_eq!(field_errors[0].provider, "b");
    assert_eq!(field_errors[0].error.kind(), ErrorKind::MissingDependency);

    // `b` never ran: its dependency failed first.
    assert_eq!(b.calls(), 0);
    assert_eq!(a.fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancel_after_first_item_stops_every_later_event() {
    let gate = Arc::new(Semaphore::new(0));
    let a = FnProvider::new(descriptor("a", &[MediaKind::Movie], &[Field::Title]))
        .gated(gate.clone())
        .on_fetch(|request| {
            let ScrapeTarget::Entity { id } = &request.target else {
                return Err(ProviderError::NotFound("child".into()));
            };
            Ok(FetchedEntity {
                ids: vec![id.clone()],
                fields: [(Field::Title, Value::from(id.value.as_str()))].into(),
            })
        });
    let a = Arc::new(a);
    let engine = coordinator(registry(vec![shared(&a)]), 1);
    let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);

    let items: Vec<MediaItem> = (1..=3)
        .map(|n| {
            MediaItem::movie(format!("Movie {n}"), 2000).with_id(CanonicalId::new("a", n.to_string()))
        })
        .collect();
    let mut handle = engine.submit_batch(items, &config).unwrap();

    // Let exactly one call through. Wait until its item is counted and the
    // next item's call is parked at the gate; the two may arrive in any order.
    gate.add_permits(1);
    let mut seen = Vec::new();
    let mut counted = false;
    let mut running = Vec::new();
    loop {
        let event = handle.next_event().await.unwrap();
        match &event {
            BatchEvent::Progress(progress) if progress.completed == 1 => counted = true,
            BatchEvent::JobStateChanged {
                item_id,
                state: JobState::Running,
                ..
            } => running.push(*item_id),
            _ => {}
        }
        seen.push(event);
        let done = results(&seen).first().map(|r| r.item_id);
        if counted && running.iter().any(|id| Some(*id) != done) {
            break;
        }
    }
    handle.cancel();

    // Let the stuck calls go; nothing but the summary may follow.
    gate.add_permits(10);

    let (rest, summary) = drain(handle).await;
    assert_eq!(rest.len(), 1, "events after cancel: {rest:?}");
    assert_matches!(rest[0], BatchEvent::Finished(_));
    assert_eq!(results(&seen).len(), 1);
    assert!(summary.cancelled);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.not_attempted, 2);
    assert_eq!(summary.total, 3);
}

#[tokio::test]
async fn known_id_skips_the_search() {
    let a = FnProvider::new(descriptor("a", &[MediaKind::Movie], &[Field::Title]))
        .on_fetch(|_| {
            Ok(FetchedEntity {
                ids: Vec::new(),
                fields: [(Field::Title, Value::from("Heat"))].into(),
            })
        });
    let a = Arc::new(a);
    let engine = coordinator(registry(vec![shared(&a)]), 2);
    let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);

    let item = MediaItem::movie("Heat", 1995).with_id(CanonicalId::new("a", "949"));
    for _ in 0..2 {
        let result = engine.scrape_one(item.clone(), &config).await.unwrap();
        assert!(result.outcome.is_success());
    }

    assert_eq!(a.searches.load(Ordering::SeqCst), 0);
    assert_eq!(a.fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn recognised_foreign_id_is_looked_up_instead_of_title_search() {
    let a = FnProvider::new(
        descriptor("a", &[MediaKind::Movie], &[Field::Title]).with_id_format(
            reelscrape::scrape::IdFormat::new("imdb", r"^tt\d{7,8}$").unwrap(),
        ),
    )
    .on_search(|query| match &query.term {
        SearchTerm::Id(id) if id.value == "tt0113277" => {
            Ok(vec![hit(CanonicalId::new("a", "949"), "Heat", Some(1995))])
        }
        _ => Ok(Vec::new()),
    })
    .on_fetch(|_| {
        Ok(FetchedEntity {
            ids: Vec::new(),
            fields: [(Field::Title, Value::from("Heat"))].into(),
        })
    });
    let engine = coordinator(registry(vec![shared(&Arc::new(a))]), 2);
    let config = MergeConfig::single("a", MediaKind::Movie, [Field::Title]);

    let item = MediaItem::movie("Not The Title", 1995).with_id(CanonicalId::new("imdb", "tt0113277"));
    let result = engine.scrape_one(item, &config).await.unwrap();

    let record = result.outcome.record().unwrap();
    assert_eq!(record.get(Field::Title), Some(&Value::from("Heat")));
    assert!(record.id_for(&"imdb".into()).is_some());
    assert!(record.id_for(&"a".into()).is_some());
}

#[tokio::test]
async fn episode_fetch_uses_show_id_found_by_search() {
    let a = FnProvider::new(descriptor(
        "a",
        &[MediaKind::TvShow, MediaKind::Episode],
        &[Field::Title],
    ))
    .on_search(|query| {
        assert_eq!(query.kind, MediaKind::TvShow);
        Ok(vec![hit(CanonicalId::new("a", "tv42"), "The Wire", Some(2002))])
    })
    .on_fetch(|request| match &request.target {
        ScrapeTarget::Child { parent, key } if parent.value == "tv42" => Ok(FetchedEntity {
            ids: Vec::new(),
            fields: [(Field::Title, Value::from(format!("Episode {key}")))].into(),
        }),
        other => Err(ProviderError::NotFound(format!("{other:?}"))),
    });
    let engine = coordinator(registry(vec![shared(&Arc::new(a))]), 2);
    let config = MergeConfig::single("a", MediaKind::Episode, [Field::Title]);

    let item = MediaItem::episode(
        reelscrape::scrape::ParentRef::titled("The Wire").with_year(2002),
        1,
        3,
    );
    let result = engine.scrape_one(item, &config).await.unwrap();
    assert_matches!(result.outcome, ItemOutcome::Succeeded { ref record } if
        record.get(Field::Title) == Some(&Value::from("Episode S01E03")));
}
