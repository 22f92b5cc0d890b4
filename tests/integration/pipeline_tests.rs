use super::*;
use uatu_changewatch::models::NotificationFormat;
use uatu_changewatch::notification::FILTER_FAILURE_TITLE;
use uatu_changewatch::processors::checksum;
use uatu_changewatch::{CheckOutcome, WatchStore};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PAGE_V1: &str = "<html><body><h1>News</h1><div id='headline'>First story</div></body></html>";
const PAGE_V2: &str = "<html><body><h1>News</h1><div id='headline'>Second story</div></body></html>";

#[tokio::test]
async fn test_checksum_matches_latest_snapshot() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/news", server.uri()))).await;

    for page in [PAGE_V1, PAGE_V2] {
        serve(&server, "/news", page).await;
        pipeline.worker.process(&uuid).await;

        let watch = pipeline.watch(&uuid).await;
        let (_, latest) = watch.history.last_key_value().unwrap();
        let snapshot = pipeline.store.read_snapshot(&uuid, latest).await.unwrap();
        assert_eq!(watch.previous_checksum, Some(checksum(&snapshot)));
    }
}

#[tokio::test]
async fn test_first_snapshot_never_notifies() {
    let server = MockServer::start().await;
    serve(&server, "/news", PAGE_V1).await;

    let mut pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/news", server.uri()))).await;

    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: false }
    );
    assert!(pipeline.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_identical_fetches_keep_one_history_entry() {
    let server = MockServer::start().await;
    serve(&server, "/news", PAGE_V1).await;

    let mut pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/news", server.uri()))).await;

    pipeline.worker.process(&uuid).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);

    assert_eq!(pipeline.watch(&uuid).await.history_n(), 1);
    assert!(pipeline.notifications.try_recv().is_err());
}

#[tokio::test]
async fn test_change_notifies_global_targets_with_diff() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/news", server.uri()))).await;

    serve(&server, "/news", PAGE_V1).await;
    pipeline.worker.process(&uuid).await;
    serve(&server, "/news", PAGE_V2).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );

    let payload = pipeline.notifications.try_recv().unwrap();
    assert_eq!(payload.notification_urls, vec!["https://hooks.example/global".to_string()]);
    assert_eq!(payload.uuid, uuid);
    assert_eq!(
        payload.diff.as_deref(),
        Some("(changed) First story\n(into) Second story")
    );
    assert_eq!(
        payload.diff_full.as_deref(),
        Some("News\n(changed) First story\n(into) Second story")
    );

    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.history_n(), 2);
    assert!(watch.last_changed.is_some());
    assert_eq!(watch.last_check_status, Some(200));
    let content_type = watch.content_type.unwrap().to_lowercase().replace(' ', "");
    assert_eq!(content_type, "text/html;charset=utf-8");
}

#[tokio::test]
async fn test_watch_targets_override_global() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let mut watch = Watch::new(&format!("{}/news", server.uri()));
    watch.notification_urls = vec!["https://hooks.example/own".to_string()];
    watch.notification_format = NotificationFormat::Html;
    let uuid = pipeline.add(watch).await;

    serve(&server, "/news", PAGE_V1).await;
    pipeline.worker.process(&uuid).await;
    serve(&server, "/news", PAGE_V2).await;
    pipeline.worker.process(&uuid).await;

    let payload = pipeline.notifications.try_recv().unwrap();
    assert_eq!(payload.notification_urls, vec!["https://hooks.example/own".to_string()]);
    assert_eq!(
        payload.diff.as_deref(),
        Some("(changed) First story</br>(into) Second story")
    );
}

#[tokio::test]
async fn test_missing_filter_forces_change_when_it_returns() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let mut watch = Watch::new(&format!("{}/news", server.uri()));
    watch.include_filters = vec!["#headline".to_string()];
    let uuid = pipeline.add(watch).await;

    serve(&server, "/news", PAGE_V1).await;
    pipeline.worker.process(&uuid).await;
    assert!(pipeline.watch(&uuid).await.previous_checksum.is_some());

    serve(&server, "/news", "<html><body><h1>News</h1></body></html>").await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Failed("filter_not_found")
    );
    let watch = pipeline.watch(&uuid).await;
    assert!(watch.previous_checksum.is_none());
    assert_eq!(watch.consecutive_filter_failures, 1);
    assert_eq!(watch.last_error.as_deref(), Some("Warning, filter '#headline' not found"));

    // Same content as before the outage still counts as a change
    serve(&server, "/news", PAGE_V1).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.consecutive_filter_failures, 0);
    assert!(watch.last_error.is_none());

    let payload = pipeline.notifications.try_recv().unwrap();
    assert_eq!(payload.diff.as_deref(), Some(""));
}

#[tokio::test]
async fn test_filter_failure_alert_after_threshold() {
    let server = MockServer::start().await;
    serve(&server, "/news", "<html><body><h1>News</h1></body></html>").await;

    let mut settings = test_settings();
    settings.notifications.filter_failure_threshold_attempts = 3;
    let mut pipeline = Pipeline::new(settings);
    let mut watch = Watch::new(&format!("{}/news", server.uri()));
    watch.include_filters = vec!["#headline".to_string()];
    let uuid = pipeline.add(watch).await;

    for attempt in 1..=2 {
        pipeline.worker.process(&uuid).await;
        assert_eq!(pipeline.watch(&uuid).await.consecutive_filter_failures, attempt);
        assert!(pipeline.notifications.try_recv().is_err());
    }

    pipeline.worker.process(&uuid).await;
    let alert = pipeline.notifications.try_recv().unwrap();
    assert_eq!(alert.notification_title, FILTER_FAILURE_TITLE);
    assert!(alert.notification_body.contains("'#headline'"));
    assert!(alert.notification_body.contains("after 3 attempts"));
    assert_eq!(pipeline.watch(&uuid).await.consecutive_filter_failures, 0);
}

#[tokio::test]
async fn test_error_status_is_recorded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not here"))
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/gone", server.uri()))).await;

    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Failed("empty_reply"));
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.last_check_status, Some(404));
    assert_eq!(
        watch.last_error.as_deref(),
        Some("Empty reply from server, status code 404")
    );
    assert_eq!(watch.history_n(), 0);
    assert!(watch.last_checked.is_some());
}

#[tokio::test]
async fn test_ignored_status_codes_are_processed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(
            ResponseTemplate::new(500).set_body_raw("<p>Maintenance</p>".as_bytes().to_vec(), "text/html"),
        )
        .mount(&server)
        .await;

    let pipeline = Pipeline::new(test_settings());
    let mut watch = Watch::new(&format!("{}/flaky", server.uri()));
    watch.ignore_status_codes = true;
    let uuid = pipeline.add(watch).await;

    pipeline.worker.process(&uuid).await;
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.last_check_status, Some(500));
    assert_eq!(watch.previous_checksum, Some(checksum(b"Maintenance")));
}

#[tokio::test]
async fn test_page_without_text_keeps_checksum() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new(&format!("{}/news", server.uri()))).await;

    serve(&server, "/news", PAGE_V1).await;
    pipeline.worker.process(&uuid).await;
    let before = pipeline.watch(&uuid).await.previous_checksum;

    serve(&server, "/news", "<html><body><img src='a.png'></body></html>").await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Failed("no_text"));

    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.previous_checksum, before);
    assert_eq!(watch.last_error.as_deref(), Some("Got HTML content but no text found."));
}

#[tokio::test]
async fn test_deleted_watch_is_skipped() {
    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(Watch::new("http://127.0.0.1:1/")).await;
    pipeline.store.remove_watch(&uuid).await;

    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Skipped);
    assert!(pipeline.store.get(&uuid).await.unwrap().is_none());
}
