use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use coviddash::model::{Article, Domain};
use coviddash::store::Store;
use coviddash::web;
use std::sync::Arc;
use tempfile::tempdir;
use tower::ServiceExt;

async fn setup() -> (tempfile::TempDir, Arc<Store>, Router) {
    let td = tempdir().unwrap();
    let store = Arc::new(Store::open(td.path().join("dashboard.json")).await.unwrap());
    let app = web::router(store.clone());
    (td, store, app)
}

async fn page_text(app: Router) -> String {
    let res = app
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

#[tokio::test]
async fn dashboard_renders_current_document() {
    let (_td, store, app) = setup().await;
    store
        .apply_news(vec![Article {
            title: "case numbers fall".into(),
            url: "https://example.com/a".into(),
        }])
        .await
        .unwrap();

    let page = page_text(app).await;
    assert!(page.contains("case numbers fall"));
    assert!(page.contains("N/A"));
    assert!(page.contains("Exeter"));
}

#[tokio::test]
async fn submit_adds_one_update_per_checked_domain() {
    let (_td, store, app) = setup().await;
    let res = app
        .oneshot(
            Request::post("/submit")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from(
                    "name=morning&interval=01:00&covid=on&news=on&repeat=on",
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let doc = store.snapshot().await;
    assert_eq!(doc.covid_updates.len(), 1);
    assert_eq!(doc.news_updates.len(), 1);
    let rec = &doc.covid_updates[0];
    assert_eq!(rec.name, "morning");
    assert_eq!(rec.interval, 60);
    assert!(rec.repetitive);
}

#[tokio::test]
async fn duplicate_submit_surfaces_collision_once() {
    let (_td, store, app) = setup().await;
    for _ in 0..2 {
        let res = app
            .clone()
            .oneshot(
                Request::post("/submit")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("name=morning&interval=30&covid=on"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::SEE_OTHER);
    }

    let doc = store.snapshot().await;
    assert_eq!(doc.covid_updates.len(), 1);

    let page = page_text(app.clone()).await;
    assert!(page.contains("Update with the same name already exists."));

    // the message renders once, then clears
    let page = page_text(app).await;
    assert!(!page.contains("Update with the same name already exists."));
}

#[tokio::test]
async fn invalid_interval_is_rejected_with_message() {
    let (_td, store, app) = setup().await;
    let res = app
        .clone()
        .oneshot(
            Request::post("/submit")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("name=bad&interval=abc&covid=on"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    assert!(store.snapshot().await.covid_updates.is_empty());
    let page = page_text(app).await;
    assert!(page.contains("Invalid interval."));
}

#[tokio::test]
async fn remove_link_clears_update_from_both_domains() {
    let (_td, store, app) = setup().await;
    store
        .add_update("morning", 60, Domain::Covid, true)
        .await
        .unwrap();
    store
        .add_update("morning", 60, Domain::News, true)
        .await
        .unwrap();

    let res = app
        .oneshot(
            Request::get("/?update_item=morning")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let doc = store.snapshot().await;
    assert!(doc.covid_updates.is_empty());
    assert!(doc.news_updates.is_empty());
}

#[tokio::test]
async fn dismiss_link_blacklists_article() {
    let (_td, store, app) = setup().await;
    store
        .apply_news(vec![Article {
            title: "headline".into(),
            url: "https://example.com/a".into(),
        }])
        .await
        .unwrap();

    let res = app
        .oneshot(
            Request::get("/?notif=https%3A%2F%2Fexample.com%2Fa")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let doc = store.snapshot().await;
    assert!(doc.news_articles.is_empty());
    assert_eq!(doc.blacklisted_articles, vec!["https://example.com/a"]);
}
