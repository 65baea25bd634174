use chrono::{TimeZone, Utc};
use mockito::Matcher;
use std::time::Duration;

use newswatch::error::FetchError;
use newswatch::sources::forum::{ForumCredentials, ForumFetcher, ForumSettings};
use newswatch::sources::SourceFetcher;

const LISTING: &str = r#"{
  "kind": "Listing",
  "data": {
    "children": [
      {"kind": "t3", "data": {"title": "Weekly discussion thread", "selftext": "Pinned", "permalink": "/r/stocks/comments/1/weekly/",
        "author": "AutoModerator", "score": 5, "created_utc": 1770000000.0, "stickied": true}},
      {"kind": "t3", "data": {"title": "Nvidia beats earnings", "selftext": "Revenue was up   120% year over year.",
        "permalink": "/r/stocks/comments/2/nvidia_beats/", "author": "chipfan", "score": 431, "created_utc": 1770000000.0}},
      {"kind": "t3", "data": {"title": "Nvidia link post", "selftext": "", "permalink": "/r/stocks/comments/3/link/",
        "author": null, "score": 12, "created_utc": 1770000000.0}},
      {"kind": "t3", "data": {"title": "Removed post", "selftext": "[removed]", "permalink": "/r/stocks/comments/4/removed/",
        "author": "someone", "score": 1, "created_utc": 1770000000.0, "removed_by_category": "moderator"}},
      {"kind": "t3", "data": {"title": "Ancient Nvidia post", "selftext": "old news", "permalink": "/r/stocks/comments/5/old/",
        "author": "historian", "score": 2, "created_utc": 1600000000.0}}
    ]
  }
}"#;

const EMPTY_LISTING: &str = r#"{"kind": "Listing", "data": {"children": []}}"#;

fn public_settings(base: String) -> ForumSettings {
    ForumSettings {
        polite_delay: Duration::from_millis(1),
        timeout_secs: 5,
        public_base_url: base,
        ..ForumSettings::default()
    }
}

#[tokio::test]
async fn public_search_filters_posts() {
    let mut server = mockito::Server::new_async().await;
    let search = server
        .mock("GET", "/r/stocks/search.json")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("q".into(), "\"Nvidia\"".into()),
            Matcher::UrlEncoded("sort".into(), "new".into()),
            Matcher::UrlEncoded("limit".into(), "10".into()),
            Matcher::UrlEncoded("t".into(), "week".into()),
            Matcher::UrlEncoded("restrict_sr".into(), "1".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(LISTING)
        .create_async()
        .await;

    let fetcher = ForumFetcher::new(public_settings(server.url())).unwrap();
    let since = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    let items = fetcher.fetch("Nvidia", &["r/stocks".to_string()], since).await.unwrap();

    assert_eq!(items.len(), 2);

    let post = &items[0];
    assert_eq!(post.url, "https://reddit.com/r/stocks/comments/2/nvidia_beats/");
    assert_eq!(post.text, "Revenue was up 120% year over year.");
    assert_eq!(post.extras.author.as_deref(), Some("chipfan"));
    assert_eq!(post.extras.score, Some(431));
    assert_eq!(post.extras.community.as_deref(), Some("stocks"));
    assert_eq!(post.published_at, Utc.timestamp_opt(1770000000, 0).single());

    let link = &items[1];
    assert_eq!(link.text, "Nvidia link post");
    assert_eq!(link.extras.author.as_deref(), Some("[deleted]"));

    search.assert_async().await;
}

#[tokio::test]
async fn global_community_is_searched_by_default_name() {
    let mut server = mockito::Server::new_async().await;
    let search = server
        .mock("GET", "/r/all/search.json")
        .match_query(Matcher::UrlEncoded("q".into(), "\"Nvidia\"".into()))
        .with_status(200)
        .with_body(EMPTY_LISTING)
        .create_async()
        .await;

    let fetcher = ForumFetcher::new(public_settings(server.url())).unwrap();
    let items = fetcher.fetch("Nvidia", &["all".to_string()], None).await.unwrap();

    assert!(items.is_empty());
    search.assert_async().await;
}

#[tokio::test]
async fn one_community_failing_does_not_abort_the_others() {
    let mut server = mockito::Server::new_async().await;
    let _broken = server
        .mock("GET", "/r/broken/search.json")
        .match_query(Matcher::Any)
        .with_status(500)
        .create_async()
        .await;
    let _stocks = server
        .mock("GET", "/r/stocks/search.json")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(LISTING)
        .create_async()
        .await;

    let fetcher = ForumFetcher::new(public_settings(server.url())).unwrap();
    let items = fetcher
        .fetch("Nvidia", &["broken".to_string(), "stocks".to_string()], None)
        .await
        .unwrap();

    // stickied and removed posts are still skipped without a cutoff
    assert_eq!(items.len(), 3);
}

#[tokio::test]
async fn rate_limit_returns_partial_items_and_wait() {
    let mut server = mockito::Server::new_async().await;
    let _stocks = server
        .mock("GET", "/r/stocks/search.json")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(LISTING)
        .create_async()
        .await;
    let _limited = server
        .mock("GET", "/r/investing/search.json")
        .match_query(Matcher::Any)
        .with_status(429)
        .with_header("retry-after", "7")
        .create_async()
        .await;

    let fetcher = ForumFetcher::new(public_settings(server.url())).unwrap();
    let err = fetcher
        .fetch("Nvidia", &["stocks".to_string(), "investing".to_string()], None)
        .await
        .unwrap_err();

    match err {
        FetchError::RateLimited { wait, partial, .. } => {
            assert_eq!(wait, Duration::from_secs(7));
            assert_eq!(partial.len(), 3);
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn oauth_token_is_fetched_once_and_used_as_bearer() {
    let mut server = mockito::Server::new_async().await;
    let token = server
        .mock("POST", "/api/v1/access_token")
        .match_body(Matcher::UrlEncoded("grant_type".into(), "password".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token": "tok-123", "token_type": "bearer", "expires_in": 3600}"#)
        .expect(1)
        .create_async()
        .await;
    let search = server
        .mock("GET", "/r/stocks/search")
        .match_query(Matcher::Any)
        .match_header("authorization", "Bearer tok-123")
        .with_status(200)
        .with_body(EMPTY_LISTING)
        .expect(2)
        .create_async()
        .await;

    let settings = ForumSettings {
        oauth_base_url: server.url(),
        token_url: format!("{}/api/v1/access_token", server.url()),
        credentials: Some(ForumCredentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            username: "bot".to_string(),
            password: "hunter2".to_string(),
        }),
        ..public_settings(server.url())
    };
    let fetcher = ForumFetcher::new(settings).unwrap();

    fetcher.fetch("Nvidia", &["stocks".to_string()], None).await.unwrap();
    fetcher.fetch("Nvidia", &["stocks".to_string()], None).await.unwrap();

    token.assert_async().await;
    search.assert_async().await;
}

#[tokio::test]
async fn rejected_credentials_are_unauthorized() {
    let mut server = mockito::Server::new_async().await;
    let _token = server
        .mock("POST", "/api/v1/access_token")
        .with_status(401)
        .create_async()
        .await;

    let settings = ForumSettings {
        oauth_base_url: server.url(),
        token_url: format!("{}/api/v1/access_token", server.url()),
        credentials: Some(ForumCredentials {
            client_id: "id".to_string(),
            client_secret: "wrong".to_string(),
            username: "bot".to_string(),
            password: "wrong".to_string(),
        }),
        ..public_settings(server.url())
    };
    let fetcher = ForumFetcher::new(settings).unwrap();

    let err = fetcher.fetch("Nvidia", &["stocks".to_string()], None).await.unwrap_err();
    assert!(matches!(err, FetchError::Unauthorized { .. }));
}
