use history_expiry::{BookmarkService, HistoryNotification, VisitReader};
use history_rust::{Config, HistoryService, StorageBackend};
use history_storage::{ArchivedDatabase, HistoryDatabase, MemoryDatabase, ThumbnailDatabase};
use history_types::{CoreTransition, IconType, PageTransition, Timestamp, Url, UrlId, UrlRow, VisitRow, VisitSource};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::broadcast;

const DAY: i64 = 24 * 60 * 60 * 1_000_000;

fn memory_config() -> Config {
    let mut config = Config::default();
    config.storage.backend = StorageBackend::Memory;
    config
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn add_url(service: &HistoryService<MemoryDatabase>, s: &str, visit_count: i32, typed_count: i32) -> UrlId {
    service
        .history()
        .add_url(&UrlRow::new(url(s)).with_counts(visit_count, typed_count))
        .unwrap()
}

fn add_visit(service: &HistoryService<MemoryDatabase>, url_id: UrlId, time: i64, transition: PageTransition) {
    let history = service.history();
    history
        .add_visit(
            &VisitRow::new(url_id, Timestamp::from_micros(time), 0, transition),
            VisitSource::Browsed,
        )
        .unwrap();
    let mut row = history.get_url_row(url_id).unwrap().unwrap();
    if row.last_visit.as_micros() < time {
        row.last_visit = Timestamp::from_micros(time);
        history.update_url_row(&row).unwrap();
    }
}

fn drain(receiver: &mut broadcast::Receiver<HistoryNotification>) -> Vec<HistoryNotification> {
    let mut out = Vec::new();
    while let Ok(notification) = receiver.try_recv() {
        out.push(notification);
    }
    out
}

#[test]
fn test_delete_url_with_mixed_visits() {
    let service = HistoryService::in_memory(memory_config()).unwrap();
    let id = add_url(&service, "https://a.com/", 3, 1);
    add_visit(&service, id, 10, CoreTransition::Typed.into());
    add_visit(&service, id, 20, CoreTransition::AutoSubframe.into());
    add_visit(&service, id, 30, CoreTransition::AutoSubframe.into());
    let mut notifications = service.subscribe();

    service.manager().delete_url(&url("https://a.com/")).unwrap();

    assert_eq!(service.history().visit_count().unwrap(), 0);
    assert!(service.history().get_row_for_url(&url("https://a.com/")).unwrap().is_none());

    let notifications = drain(&mut notifications);
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        HistoryNotification::UrlsDeleted(details) => {
            assert!(!details.archived);
            assert_eq!(details.rows.len(), 1);
            assert_eq!(details.rows[0].url, url("https://a.com/"));
        }
        other => panic!("unexpected notification {:?}", other),
    }
}

#[test]
fn test_archive_pass_over_mixed_visits() {
    let service = HistoryService::in_memory(memory_config()).unwrap();
    let id = add_url(&service, "https://a.com/", 2, 1);
    add_visit(&service, id, 10, CoreTransition::Typed.into());
    add_visit(&service, id, 20, CoreTransition::AutoSubframe.into());

    service
        .manager()
        .archive_history_before(Timestamp::from_micros(20))
        .unwrap();

    assert_eq!(service.history().visit_count().unwrap(), 0);
    let archived = service.archived().unwrap();
    let archived_row = archived.get_row_for_url(&url("https://a.com/")).unwrap().unwrap();
    let visits = archived.get_visits_for_url(archived_row.id).unwrap();
    assert_eq!(visits.len(), 1);
    assert_eq!(visits[0].transition.core(), CoreTransition::Typed);
    assert_eq!(service.inspect().unwrap().stats.visits_archived, 1);
}

#[test]
fn test_bookmarked_url_survives_archival() {
    let mut config = memory_config();
    config.bookmarks.urls = vec![url("https://kept.com/")];
    let service = HistoryService::in_memory(config).unwrap();
    let id = add_url(&service, "https://kept.com/", 2, 0);
    add_visit(&service, id, 10, CoreTransition::Link.into());
    add_visit(&service, id, 20, CoreTransition::Link.into());

    service.archive_older_than(1).unwrap();

    let row = service.history().get_row_for_url(&url("https://kept.com/")).unwrap().unwrap();
    assert_eq!(row.visit_count, 0);
    assert!(row.last_visit.is_null());
    assert!(service.bookmarks().is_bookmarked(&url("https://kept.com/")));
}

#[test]
fn test_favicons_follow_their_pages() {
    let service = HistoryService::in_memory(memory_config()).unwrap();
    let a = add_url(&service, "https://a.com/", 1, 0);
    let b = add_url(&service, "https://b.com/", 1, 0);
    add_visit(&service, a, 10, CoreTransition::Link.into());
    add_visit(&service, b, 10, CoreTransition::Link.into());

    let thumbnails = service.thumbnails().unwrap();
    let shared = thumbnails
        .add_favicon(&url("https://cdn.com/icon.png"), IconType::Favicon)
        .unwrap();
    thumbnails.add_icon_mapping(&url("https://a.com/"), shared).unwrap();
    thumbnails.add_icon_mapping(&url("https://b.com/"), shared).unwrap();

    service.manager().delete_url(&url("https://a.com/")).unwrap();
    assert!(thumbnails.get_favicon_header(shared).unwrap().is_some());

    service.manager().delete_url(&url("https://b.com/")).unwrap();
    assert!(thumbnails.get_favicon_header(shared).unwrap().is_none());
    assert_eq!(thumbnails.favicon_count().unwrap(), 0);
}

#[test]
fn test_expire_range_restricted_to_urls() {
    let service = HistoryService::in_memory(memory_config()).unwrap();
    let a = add_url(&service, "https://a.com/", 2, 0);
    let b = add_url(&service, "https://b.com/", 1, 0);
    add_visit(&service, a, 10, CoreTransition::Link.into());
    add_visit(&service, a, 100, CoreTransition::Link.into());
    add_visit(&service, b, 10, CoreTransition::Link.into());
    let mut notifications = service.subscribe();

    let restrict = BTreeSet::from([url("https://a.com/")]);
    service
        .manager()
        .expire_history_between(&restrict, Timestamp::null(), Timestamp::from_micros(50))
        .unwrap();

    assert_eq!(service.history().get_visits_for_url(a).unwrap().len(), 1);
    assert_eq!(service.history().get_visits_for_url(b).unwrap().len(), 1);

    let notifications = drain(&mut notifications);
    assert_eq!(notifications.len(), 1);
    match &notifications[0] {
        HistoryNotification::UrlsModified(details) => {
            assert_eq!(details.changed_urls.len(), 1);
            assert_eq!(details.changed_urls[0].visit_count, 1);
            assert_eq!(details.changed_urls[0].last_visit.as_micros(), 100);
        }
        other => panic!("unexpected notification {:?}", other),
    }
}

#[test]
fn test_batches_drain_old_history() {
    let mut config = memory_config();
    config.expiry.batch_size = 4;
    let service = HistoryService::in_memory(config).unwrap();
    let id = add_url(&service, "https://old.com/", 10, 10);
    for i in 0..10 {
        add_visit(&service, id, DAY + i, CoreTransition::Typed.into());
    }

    let end_time = service.manager().current_archive_time();
    let mut batches = 0;
    while service
        .manager()
        .archive_some_old_history(end_time, VisitReader::AllVisits, 4)
        .unwrap()
    {
        batches += 1;
    }

    assert_eq!(batches, 2);
    assert_eq!(service.history().visit_count().unwrap(), 0);
    assert_eq!(service.archived().unwrap().visit_count().unwrap(), 10);
    assert_eq!(service.archived().unwrap().url_count().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_background_archiving_service() {
    let mut config = memory_config();
    config.expiry.expiration_delay_secs = 10;
    let service = HistoryService::in_memory(config).unwrap();
    let id = add_url(&service, "https://old.com/", 1, 1);
    add_visit(&service, id, DAY, CoreTransition::Typed.into());

    service.start();
    tokio::time::sleep(Duration::from_secs(11)).await;
    for _ in 0..10 {
        if service.history().visit_count().unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(service.history().visit_count().unwrap(), 0);
    assert_eq!(service.archived().unwrap().visit_count().unwrap(), 1);

    service.stop();
    assert!(!service.manager().is_archiving());
}
