//! Session negotiation and HTTP history against the mock backend

use crate::test_utils::*;
use monitor_core::LinkConfig;
use monitor_link::{
    HistoryError, HistoryQuery, HistorySource, HttpHistory, LinkClient, LinkError, SessionBuilder,
};
use serde_json::json;

#[tokio::test]
async fn test_finalize_with_token() {
    init_tracing();
    let backend = MockBackend::start(layout("plant-a", &["unit001", "unit002"])).await;
    let token = backend.issue_token();

    let session = backend.session(&token).await;

    assert_eq!(session.token(), token);
    assert_eq!(session.layout(), &layout("plant-a", &["unit001", "unit002"]));
    assert_eq!(session.endpoints().ws, format!("ws://{}/ws", backend.uri()));
    assert_eq!(backend.login_count(), 0);
}

#[tokio::test]
async fn test_finalize_with_credentials() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;

    let session = SessionBuilder::new(backend.uri())
        .unwrap()
        .credentials(LOGIN, PASSWORD)
        .secure(false)
        .finalize()
        .await
        .unwrap();

    assert_eq!(session.token(), "token-0");
    assert_eq!(backend.login_count(), 1);
}

#[tokio::test]
async fn test_wrong_credentials() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;

    let result = SessionBuilder::new(backend.uri())
        .unwrap()
        .credentials(LOGIN, "wrong")
        .secure(false)
        .finalize()
        .await;

    match result {
        Err(LinkError::InvalidCredentials { login }) => assert_eq!(login, LOGIN),
        other => panic!("expected invalid credentials, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stale_token_refreshed_once() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;

    let session = SessionBuilder::new(backend.uri())
        .unwrap()
        .token("stale")
        .credentials(LOGIN, PASSWORD)
        .secure(false)
        .finalize()
        .await
        .unwrap();

    assert_ne!(session.token(), "stale");
    assert_eq!(backend.login_count(), 1);
    assert_eq!(session.layout(), &layout("plant-a", &["unit001"]));
}

#[tokio::test]
async fn test_stale_token_without_credentials() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;

    let result = SessionBuilder::new(backend.uri())
        .unwrap()
        .token("stale")
        .secure(false)
        .finalize()
        .await;

    assert!(matches!(result, Err(LinkError::Unauthorized)));
    assert_eq!(backend.login_count(), 0);
}

#[tokio::test]
async fn test_client_from_config() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;
    let mut config = LinkConfig::local(backend.uri());
    config.auth.login = Some(LOGIN.to_string());
    config.auth.password = Some(PASSWORD.to_string());

    let client = LinkClient::from_config(&config).await.unwrap();

    assert_eq!(client.token(), "token-0");
    assert_eq!(client.groups(), &layout("plant-a", &["unit001"]));
}

#[tokio::test]
async fn test_http_history() {
    let backend = MockBackend::start(layout("plant-a", &["unit001"])).await;
    let token = backend.issue_token();
    let session = backend.session(&token).await;
    backend.set_history("plant-a", "unit001", (1..=10).map(history_item).collect());
    let history = HttpHistory::from_session(&session);

    let query = HistoryQuery {
        group: "plant-a".to_string(),
        unit: "unit001".to_string(),
        from: 3,
        to: 5,
    };
    let items = history.fetch(&query).await.unwrap();
    assert_eq!(items.iter().map(|i| i.index).collect::<Vec<_>>(), vec![3, 4, 5]);
    assert_eq!(
        backend.hist_requests(),
        vec![HistRequest {
            from: 3,
            to: 5,
            group: "plant-a".to_string(),
            unit: "unit001".to_string(),
        }]
    );

    backend.fail_history(&[503]);
    assert_eq!(history.fetch(&query).await, Err(HistoryError::Status(503)));

    backend.revoke(&token);
    assert_eq!(history.fetch(&query).await, Err(HistoryError::Unauthorized));
}

#[tokio::test]
async fn test_http_fetch_last() {
    let backend = MockBackend::start(layout("plant-a", &["unit001", "unit002"])).await;
    let token = backend.issue_token();
    let session = backend.session(&token).await;
    backend.set_last(json!({
        "plant-a": [["unit001", {"s": true, "i": 3, "t": 100, "y": "n"}], ["unit002", null]]
    }));

    let snapshot = HttpHistory::from_session(&session).fetch_last().await.unwrap();

    let units = &snapshot["plant-a"];
    assert_eq!(units.len(), 2);
    assert_eq!(units[0].0, "unit001");
    assert_eq!(units[0].1.as_ref().map(|item| item.index), Some(3));
    assert!(units[1].1.is_none());
}
