//! The dashboard web front end.
//!
//! One page: headline statistics, the current news column with dismiss
//! links, the scheduled-updates column with remove links, and the
//! add-update form. Mutations go through the store's validated operations
//! and redirect back to `/`.

use crate::model::{Document, Domain};
use crate::store::{Store, StoreError};
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use maud::{html, Markup, DOCTYPE};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use urlencoding::encode as urlencode;

pub type SharedState = Arc<Store>;

#[derive(Clone, Debug)]
#[must_use]
pub struct Maud(pub Markup);

impl IntoResponse for Maud {
    fn into_response(self) -> Response {
        (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            )],
            self.0 .0,
        )
            .into_response()
    }
}

pub fn router(store: SharedState) -> Router {
    Router::new()
        .route("/", get(dashboard))
        .route("/submit", post(submit))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    update_item: Option<String>,
    notif: Option<String>,
}

async fn dashboard(
    State(store): State<SharedState>,
    Query(query): Query<DashboardQuery>,
) -> Response {
    if let Some(name) = query.update_item {
        // the link carries no domain; clear the name wherever it appears
        for domain in Domain::ALL {
            match store.remove_update(&name, domain).await {
                Ok(()) | Err(StoreError::UpdateNotFound(..)) => {}
                Err(err) => warn!(?err, %domain, "failed to remove update"),
            }
        }
        return Redirect::to("/").into_response();
    }

    if let Some(url) = query.notif {
        if let Err(err) = store.blacklist_article(&url).await {
            warn!(?err, "failed to blacklist article");
        }
        return Redirect::to("/").into_response();
    }

    let name_err = match store.take_name_err().await {
        Ok(msg) => msg,
        Err(err) => {
            warn!(?err, "failed to clear form error");
            None
        }
    };
    let doc = store.snapshot().await;
    Maud(render_dashboard(&doc, name_err.as_deref())).into_response()
}

#[derive(Debug, Deserialize)]
pub struct SubmitForm {
    pub name: String,
    pub interval: String,
    #[serde(default)]
    pub covid: Option<String>,
    #[serde(default)]
    pub news: Option<String>,
    #[serde(default)]
    pub repeat: Option<String>,
}

async fn submit(State(store): State<SharedState>, Form(form): Form<SubmitForm>) -> Redirect {
    let Some(interval) = parse_interval(&form.interval) else {
        if let Err(err) = store.set_name_err("Invalid interval.").await {
            warn!(?err, "failed to record form error");
        }
        return Redirect::to("/");
    };

    let repetitive = form.repeat.is_some();
    let mut domains = Vec::new();
    if form.covid.is_some() {
        domains.push(Domain::Covid);
    }
    if form.news.is_some() {
        domains.push(Domain::News);
    }

    for domain in domains {
        match store.add_update(&form.name, interval, domain, repetitive).await {
            Ok(()) => {}
            // validation failures already recorded their message for the UI
            Err(StoreError::InvalidName | StoreError::NameTaken(_)) => {}
            Err(err) => warn!(?err, %domain, "failed to add update"),
        }
    }
    Redirect::to("/")
}

/// Accepts `MM:SS` (seconds below 60) or a plain number of seconds.
pub fn parse_interval(text: &str) -> Option<u64> {
    let text = text.trim();
    if let Some((minutes, seconds)) = text.split_once(':') {
        let minutes: u64 = minutes.parse().ok()?;
        let seconds: u64 = seconds.parse().ok()?;
        (seconds < 60).then_some(minutes * 60 + seconds)
    } else {
        text.parse().ok()
    }
}

fn render_dashboard(doc: &Document, name_err: Option<&str>) -> Markup {
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="utf-8";
                title { "COVID dashboard" }
                style { (STYLE) }
            }
            body {
                header {
                    h1 { "COVID dashboard" }
                    @if let Some(msg) = name_err {
                        p ."error" { (msg) }
                    }
                }
                (render_stats(doc))
                main ."columns" {
                    (render_news(doc))
                    (render_updates(doc))
                }
                (render_form())
            }
        }
    }
}

fn render_stats(doc: &Document) -> Markup {
    html! {
        section ."stats" {
            div ."stat" {
                span ."stat__label" { (doc.location) " 7-day infections" }
                span ."stat__value" { (doc.local_7day_infections) }
            }
            div ."stat" {
                span ."stat__label" { (doc.nation_location) " 7-day infections" }
                span ."stat__value" { (doc.national_7day_infections) }
            }
            div ."stat" {
                span ."stat__label" { "Hospital cases" }
                span ."stat__value" { (doc.hospital_cases) }
            }
            div ."stat" {
                span ."stat__label" { "Total deaths" }
                span ."stat__value" { (doc.deaths_total) }
            }
            @if let Some(at) = &doc.last_updated {
                p ."stats__updated" { "Last updated " (at.format("%Y-%m-%d %H:%M:%S UTC")) }
            }
        }
    }
}

fn render_news(doc: &Document) -> Markup {
    html! {
        section ."news" {
            h2 { "News" }
            @if doc.news_articles.is_empty() {
                p { "No articles yet." }
            }
            ul {
                @for article in &doc.news_articles {
                    li {
                        a href=(article.url) { (article.title) }
                        " "
                        a ."dismiss" href={"/?notif=" (urlencode(&article.url))} { "dismiss" }
                    }
                }
            }
        }
    }
}

fn render_updates(doc: &Document) -> Markup {
    let mut rows = Vec::new();
    for domain in Domain::ALL {
        rows.extend(doc.updates(domain).iter().map(|r| (domain, r)));
    }
    html! {
        section ."updates" {
            h2 { "Scheduled updates" }
            @if rows.is_empty() {
                p { "No updates scheduled." }
            }
            ul {
                @for (domain, record) in &rows {
                    li {
                        strong { (record.name) }
                        ": " (record.content)
                        " "
                        a ."dismiss" href={"/?update_item=" (urlencode(&record.name))} {
                            "remove"
                        }
                        span ."updates__domain" { " [" (domain) "]" }
                    }
                }
            }
        }
    }
}

fn render_form() -> Markup {
    html! {
        section ."add" {
            h2 { "Add an update" }
            form action="/submit" method="post" {
                label { "Name " input type="text" name="name" autocomplete="off"; }
                label { "Interval (MM:SS or seconds) " input type="text" name="interval" value="05:00"; }
                label { input type="checkbox" name="covid" value="on"; " COVID statistics" }
                label { input type="checkbox" name="news" value="on"; " News articles" }
                label { input type="checkbox" name="repeat" value="on"; " Repeat" }
                button { "Schedule" }
            }
        }
    }
}

const STYLE: &str = "\
body { font-family: sans-serif; margin: 2rem auto; max-width: 60rem; }
.error { color: #b00; font-weight: bold; }
.stats { display: flex; gap: 2rem; }
.stat__label { display: block; color: #555; }
.stat__value { font-size: 1.6rem; font-weight: bold; }
.columns { display: flex; gap: 2rem; }
.columns section { flex: 1; }
.dismiss { color: #b00; font-size: 0.85rem; }
.add label { display: block; margin: 0.3rem 0; }
";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Article, Stat};

    #[test]
    fn interval_accepts_minutes_seconds() {
        assert_eq!(parse_interval("01:30"), Some(90));
        assert_eq!(parse_interval("00:00"), Some(0));
        assert_eq!(parse_interval("10:05"), Some(605));
    }

    #[test]
    fn interval_accepts_plain_seconds() {
        assert_eq!(parse_interval("45"), Some(45));
        assert_eq!(parse_interval(" 300 "), Some(300));
    }

    #[test]
    fn interval_rejects_garbage() {
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("abc"), None);
        assert_eq!(parse_interval("01:75"), None);
        assert_eq!(parse_interval("-5"), None);
        assert_eq!(parse_interval("1:2:3"), None);
    }

    #[test]
    fn page_shows_stats_and_articles() {
        let mut doc = Document::default();
        doc.local_7day_infections = Stat::Value(712);
        doc.news_articles.push(Article {
            title: "case numbers fall".into(),
            url: "https://example.com/a?x=1".into(),
        });
        let page = render_dashboard(&doc, Some("Name already taken.")).0;
        assert!(page.contains("712"));
        assert!(page.contains("N/A"));
        assert!(page.contains("case numbers fall"));
        assert!(page.contains("Name already taken."));
        assert!(page.contains("/?notif=https%3A%2F%2Fexample.com%2Fa%3Fx%3D1"));
    }

}
