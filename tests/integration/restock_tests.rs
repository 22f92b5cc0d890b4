use super::*;
use rust_decimal::Decimal;
use uatu_changewatch::models::{InStockProcessing, ProcessorKind, RestockSettings, Tag};
use uatu_changewatch::CheckOutcome;
use wiremock::MockServer;

fn product_page(price: &str, availability: &str) -> String {
    format!(
        r#"<html><head><script type="application/ld+json">
        {{"@context": "https://schema.org", "@type": "Product", "name": "Kettle",
          "offers": {{"@type": "Offer", "price": "{}", "priceCurrency": "EUR",
                      "availability": "https://schema.org/{}"}}}}
        </script></head><body><h1>Kettle</h1></body></html>"#,
        price, availability
    )
}

fn dec(s: &str) -> Decimal {
    s.parse().unwrap()
}

fn restock_watch(server: &MockServer, settings: RestockSettings) -> Watch {
    let mut watch = Watch::new(&format!("{}/kettle", server.uri()));
    watch.processor = ProcessorKind::RestockDiff;
    watch.restock_settings = settings;
    watch
}

#[tokio::test]
async fn test_back_in_stock_notifies() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(restock_watch(&server, RestockSettings::default())).await;

    serve(&server, "/kettle", &product_page("30.00", "OutOfStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.history_n(), 1);
    assert_eq!(watch.restock.as_ref().unwrap().in_stock, Some(false));

    serve(&server, "/kettle", &product_page("30.00", "InStock")).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );

    let payload = pipeline.notifications.try_recv().unwrap();
    assert_eq!(
        payload.diff.as_deref(),
        Some("(changed) In Stock: false - Price: 30\n(into) In Stock: true - Price: 30")
    );
}

#[tokio::test]
async fn test_going_out_of_stock_is_quiet_by_default() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(restock_watch(&server, RestockSettings::default())).await;

    serve(&server, "/kettle", &product_page("30.00", "InStock")).await;
    pipeline.worker.process(&uuid).await;
    serve(&server, "/kettle", &product_page("30.00", "OutOfStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);

    assert!(pipeline.notifications.try_recv().is_err());
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.restock.unwrap().in_stock, Some(false));
}

#[tokio::test]
async fn test_price_threshold_suppresses_small_moves() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let settings = RestockSettings {
        follow_price_changes: true,
        price_change_threshold_percent: Some(dec("5")),
        ..Default::default()
    };
    let uuid = pipeline.add(restock_watch(&server, settings)).await;

    serve(&server, "/kettle", &product_page("100.00", "InStock")).await;
    pipeline.worker.process(&uuid).await;

    serve(&server, "/kettle", &product_page("103.00", "InStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);
    assert!(pipeline.notifications.try_recv().is_err());

    // Compared against the previous check's 103
    serve(&server, "/kettle", &product_page("106.00", "InStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);

    serve(&server, "/kettle", &product_page("112.00", "InStock")).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );
    assert!(pipeline.notifications.try_recv().is_ok());

    let restock = pipeline.watch(&uuid).await.restock.unwrap();
    assert_eq!(restock.original_price, Some(dec("112.00")));
    assert_eq!(restock.price, Some(dec("112.00")));
}

#[tokio::test]
async fn test_steady_price_after_one_move_is_unchanged() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    let settings = RestockSettings {
        follow_price_changes: true,
        ..Default::default()
    };
    let uuid = pipeline.add(restock_watch(&server, settings)).await;

    serve(&server, "/kettle", &product_page("100.00", "InStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);

    serve(&server, "/kettle", &product_page("110.00", "InStock")).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );
    assert!(pipeline.notifications.try_recv().is_ok());

    for _ in 0..2 {
        assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);
    }
    assert!(pipeline.notifications.try_recv().is_err());
    assert_eq!(pipeline.watch(&uuid).await.history_n(), 2);
}

#[tokio::test]
async fn test_price_band_suppresses_changes_inside() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::new(test_settings());
    let settings = RestockSettings {
        follow_price_changes: true,
        price_change_min: Some(dec("90")),
        price_change_max: Some(dec("110")),
        ..Default::default()
    };
    let uuid = pipeline.add(restock_watch(&server, settings)).await;

    serve(&server, "/kettle", &product_page("100.00", "InStock")).await;
    pipeline.worker.process(&uuid).await;

    serve(&server, "/kettle", &product_page("110.00", "InStock")).await;
    assert_eq!(pipeline.worker.process(&uuid).await, CheckOutcome::Unchanged);

    serve(&server, "/kettle", &product_page("111.00", "InStock")).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );
}

#[tokio::test]
async fn test_tag_settings_override_watch() {
    let server = MockServer::start().await;
    let mut pipeline = Pipeline::new(test_settings());
    pipeline
        .store
        .insert_tag(Tag {
            uuid: "kitchen".to_string(),
            title: "Kitchen".to_string(),
            overrides_watch: true,
            restock_settings: RestockSettings {
                in_stock_processing: InStockProcessing::AllChanges,
                ..Default::default()
            },
        })
        .await;

    let mut watch = restock_watch(
        &server,
        RestockSettings {
            in_stock_processing: InStockProcessing::Off,
            ..Default::default()
        },
    );
    watch.tags = vec!["kitchen".to_string()];
    let uuid = pipeline.add(watch).await;

    serve(&server, "/kettle", &product_page("30.00", "InStock")).await;
    pipeline.worker.process(&uuid).await;
    serve(&server, "/kettle", &product_page("30.00", "OutOfStock")).await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Changed { notified: true }
    );
    assert!(pipeline.notifications.try_recv().is_ok());
}

#[tokio::test]
async fn test_two_prices_on_page_is_an_error() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(restock_watch(&server, RestockSettings::default())).await;

    let page = r#"<html><head>
        <meta property="product:price:amount" content="19.99">
        <script type="application/ld+json">
        {"@type": "Product", "offers": {"price": "24.99", "availability": "InStock"}}
        </script></head><body></body></html>"#;
    serve(&server, "/kettle", page).await;

    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Failed("more_than_one_price")
    );
    let watch = pipeline.watch(&uuid).await;
    assert!(watch.last_error.as_ref().unwrap().contains("more than one price"));
    assert_eq!(watch.history_n(), 0);
}

#[tokio::test]
async fn test_page_without_stock_signal() {
    let server = MockServer::start().await;
    let pipeline = Pipeline::new(test_settings());
    let uuid = pipeline.add(restock_watch(&server, RestockSettings::default())).await;

    serve(&server, "/kettle", "<html><body><p>Just a blog post</p></body></html>").await;
    assert_eq!(
        pipeline.worker.process(&uuid).await,
        CheckOutcome::Failed("restock_data_unavailable")
    );
    let watch = pipeline.watch(&uuid).await;
    assert_eq!(watch.last_check_status, Some(200));
}
