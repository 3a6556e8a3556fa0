use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tempfile::tempdir;

use quickbooks_rs::{
    CallbackParams, CredentialStore, Error, JsonFileCredentialStore, TokenManager, TokenRecord,
};

mod test_utils;
use test_utils::*;

fn manager(
    store: Arc<CountingStore>,
    transport: Arc<MockTransport>,
) -> (TokenManager, Arc<MockClock>) {
    do_setup();
    let clock = Arc::new(MockClock::new(EPOCH));
    let tokens = TokenManager::with_clock(&test_config(), store, transport, clock.clone());
    (tokens, clock)
}

#[tokio::test]
async fn test_exchange_authorization_code_persists_tokens() {
    let store = Arc::new(CountingStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(TOKEN_PATH, 200, token_body("access-1", "refresh-1"));
    let (tokens, _) = manager(store.clone(), transport.clone());

    let record = tokens
        .exchange_authorization_code("ABC123", REALM_ID)
        .await
        .unwrap();

    assert_eq!(record.realm_id, REALM_ID);
    assert_eq!(record.access_token, "access-1");
    assert_eq!(record.refresh_token, "refresh-1");
    assert_eq!(record.access_expires_at, EPOCH + time::Duration::seconds(3600));
    assert_eq!(record.refresh_expires_at, EPOCH + time::Duration::seconds(8_726_400));
    assert_eq!(store.get(REALM_ID).await, Some(record));
    assert_eq!(store.saves(), 1);

    let requests = transport.requests_to(TOKEN_PATH);
    assert_eq!(requests.len(), 1);
    let form = requests[0].form();
    assert_eq!(form.get("grant_type").map(String::as_str), Some("authorization_code"));
    assert_eq!(form.get("code").map(String::as_str), Some("ABC123"));
    assert!(requests[0].header("authorization").unwrap().starts_with("Basic "));
}

#[tokio::test]
async fn test_rejected_exchange_stores_nothing() {
    let store = Arc::new(CountingStore::new());
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(TOKEN_PATH, 400, json!({"error": "invalid_grant"}));
    let (tokens, _) = manager(store.clone(), transport);

    let err = tokens
        .exchange_authorization_code("used-code", REALM_ID)
        .await
        .unwrap_err();

    match err {
        Error::AuthExchange { realm_id, response, .. } => {
            assert_eq!(realm_id, REALM_ID);
            assert_eq!(response.unwrap().error, "invalid_grant");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.saves(), 0);
    assert_eq!(store.get(REALM_ID).await, None);
}

#[tokio::test]
async fn test_fresh_token_is_returned_without_refresh() {
    let store = Arc::new(CountingStore::new());
    store.seed(fresh_record()).await;
    let transport = Arc::new(MockTransport::new());
    let (tokens, _) = manager(store.clone(), transport.clone());

    let record = tokens.get_valid_token(REALM_ID).await.unwrap();

    assert_eq!(record, fresh_record());
    assert!(transport.requests().is_empty());
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn test_token_inside_refresh_margin_is_refreshed() {
    let store = Arc::new(CountingStore::new());
    store.seed(fresh_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(TOKEN_PATH, 200, token_body("access-2", "refresh-2"));
    let (tokens, clock) = manager(store.clone(), transport.clone());

    // 30 seconds left, inside the default 60 second margin.
    clock.advance(time::Duration::minutes(59) + time::Duration::seconds(30));
    let record = tokens.get_valid_token(REALM_ID).await.unwrap();

    assert_eq!(record.access_token, "access-2");
    assert_eq!(record.refresh_token, "refresh-2");
    let form = transport.requests_to(TOKEN_PATH)[0].form();
    assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
    assert_eq!(form.get("refresh_token").map(String::as_str), Some("refresh-0"));
    assert_eq!(store.get(REALM_ID).await, Some(record));
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(50)));
    transport.reply_json(TOKEN_PATH, 200, token_body("access-1", "refresh-1"));
    let (tokens, _) = manager(store.clone(), transport.clone());

    let results = join_all((0..10).map(|_| tokens.get_valid_token(REALM_ID))).await;

    for result in &results {
        assert_eq!(result.as_ref().unwrap().access_token, "access-1");
    }
    assert_eq!(transport.count(TOKEN_PATH), 1);
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_failure() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(50)));
    transport.reply_json(
        TOKEN_PATH,
        400,
        json!({"error": "invalid_grant", "error_description": "Token invalid"}),
    );
    let (tokens, _) = manager(store.clone(), transport.clone());

    let results = join_all((0..5).map(|_| tokens.get_valid_token(REALM_ID))).await;

    for result in results {
        assert!(matches!(result, Err(Error::RefreshFailed { .. })));
    }
    assert_eq!(transport.count(TOKEN_PATH), 1);
}

#[tokio::test]
async fn test_rejected_refresh_leaves_store_untouched() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(TOKEN_PATH, 400, json!({"error": "invalid_grant"}));
    let (tokens, _) = manager(store.clone(), transport);

    let err = tokens.get_valid_token(REALM_ID).await.unwrap_err();

    match &err {
        Error::RefreshFailed { response, .. } => {
            assert_eq!(response.as_ref().unwrap().error, "invalid_grant");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(store.saves(), 0);
    assert_eq!(store.get(REALM_ID).await, Some(expired_record()));
}

#[tokio::test]
async fn test_network_failure_during_refresh_is_a_transport_error() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply(
        TOKEN_PATH,
        Err(quickbooks_rs::TransportError::connect("connection refused")),
    );
    let (tokens, _) = manager(store.clone(), transport);

    let err = tokens.get_valid_token(REALM_ID).await.unwrap_err();

    assert!(matches!(err, Error::Transport { .. }));
    assert!(err.is_retryable());
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn test_missing_refresh_token_in_response_keeps_previous() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(
        TOKEN_PATH,
        200,
        json!({
            "token_type": "bearer",
            "access_token": "access-2",
            "expires_in": 3600,
            "x_refresh_token_expires_in": 8_726_400
        }),
    );
    let (tokens, _) = manager(store.clone(), transport);

    let record = tokens.get_valid_token(REALM_ID).await.unwrap();

    assert_eq!(record.access_token, "access-2");
    assert_eq!(record.refresh_token, "refresh-0");
}

#[tokio::test]
async fn test_expired_refresh_token_requires_reauthorization() {
    let store = Arc::new(CountingStore::new());
    store.seed(fresh_record()).await;
    let transport = Arc::new(MockTransport::new());
    let (tokens, clock) = manager(store.clone(), transport.clone());

    clock.advance(time::Duration::days(101));
    let err = tokens.get_valid_token(REALM_ID).await.unwrap_err();

    assert!(matches!(err, Error::ReauthorizationRequired { .. }));
    assert!(transport.requests().is_empty());

    // A forced refresh is refused for the same reason.
    let err = tokens.refresh(REALM_ID).await.unwrap_err();
    assert!(matches!(err, Error::ReauthorizationRequired { .. }));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_unknown_realm_has_no_credentials() {
    let (tokens, _) = manager(Arc::new(CountingStore::new()), Arc::new(MockTransport::new()));

    let err = tokens.get_valid_token("4620816365").await.unwrap_err();

    match err {
        Error::MissingCredentials { realm_id } => assert_eq!(realm_id, "4620816365"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_forced_refresh_ignores_expiry() {
    let store = Arc::new(CountingStore::new());
    store.seed(fresh_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply_json(TOKEN_PATH, 200, token_body("access-3", "refresh-3"));
    let (tokens, _) = manager(store.clone(), transport.clone());

    let record = tokens.refresh(REALM_ID).await.unwrap();

    assert_eq!(record.access_token, "access-3");
    assert_eq!(transport.count(TOKEN_PATH), 1);
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn test_revoke_posts_refresh_token() {
    let store = Arc::new(CountingStore::new());
    store.seed(fresh_record()).await;
    let transport = Arc::new(MockTransport::new());
    transport.reply_json("/v2/oauth2/tokens/revoke", 200, json!({}));
    let (tokens, _) = manager(store.clone(), transport.clone());

    tokens.revoke(REALM_ID).await.unwrap();

    let requests = transport.requests_to("/v2/oauth2/tokens/revoke");
    assert_eq!(requests.len(), 1);
    let form = requests[0].form();
    assert_eq!(form.get("token").map(String::as_str), Some("refresh-0"));
    assert_eq!(store.saves(), 0);
}

#[tokio::test]
async fn test_authorization_url_carries_state_and_scope() {
    let (tokens, _) = manager(Arc::new(CountingStore::new()), Arc::new(MockTransport::new()));

    let (url, state) = tokens.authorization_url();

    assert_eq!(url.host_str(), Some("appcenter.intuit.com"));
    let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs.get("client_id").map(String::as_str), Some("client-id"));
    assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
    assert_eq!(pairs.get("state"), Some(state.secret()));
    assert!(pairs["scope"].contains("com.intuit.quickbooks.accounting"));
}

#[tokio::test]
async fn test_handle_callback_exchanges_code() {
    let harness = Harness::new().await;
    harness
        .transport
        .reply_json(TOKEN_PATH, 200, token_body("access-9", "refresh-9"));
    let (_, state) = harness.client.authorization_url();
    let callback = url::Url::parse(&format!(
        "https://example.com/callback?code=ABC123&realmId=4620816365&state={}",
        state.secret()
    ))
    .unwrap();

    let record = harness.client.handle_callback(&callback, &state).await.unwrap();

    assert_eq!(record.realm_id, "4620816365");
    assert_eq!(harness.store.get("4620816365").await, Some(record));
}

#[tokio::test]
async fn test_handle_callback_rejects_wrong_state() {
    let harness = Harness::new().await;
    let (_, state) = harness.client.authorization_url();
    let callback =
        url::Url::parse("https://example.com/callback?code=ABC123&realmId=9991&state=forged")
            .unwrap();

    let err = harness.client.handle_callback(&callback, &state).await.unwrap_err();

    assert!(matches!(err, Error::InvalidCallback(_)));
    assert!(harness.transport.requests().is_empty());
}

#[test]
fn test_callback_params_report_denial() {
    let url = url::Url::parse("https://example.com/callback?error=access_denied&state=x").unwrap();
    let err = CallbackParams::from_url(&url).unwrap_err();
    assert!(err.to_string().contains("access_denied"));

    let url = url::Url::parse("https://example.com/callback?code=a&state=x").unwrap();
    let err = CallbackParams::from_url(&url).unwrap_err();
    assert!(err.to_string().contains("realmId"));
}

#[tokio::test]
async fn test_json_file_store_survives_reload() -> anyhow::Result<()> {
    do_setup();
    let dir = tempdir()?;
    let path = dir.path().join("credentials.json");

    let store = JsonFileCredentialStore::load(&path).await?;
    assert_eq!(store.fetch(REALM_ID).await?, None);
    store.save(REALM_ID, fresh_record()).await?;

    let reloaded = JsonFileCredentialStore::load(&path).await?;
    assert_eq!(reloaded.fetch(REALM_ID).await?, Some(fresh_record()));
    Ok(())
}

#[tokio::test]
async fn test_json_file_store_rejects_garbage() {
    do_setup();
    let dir = tempdir().unwrap();
    let path = dir.path().join("credentials.json");
    tokio::fs::write(&path, "not json").await.unwrap();

    let err = JsonFileCredentialStore::load(&path).await.unwrap_err();

    assert!(matches!(err, quickbooks_rs::StoreError::Parse(_)));
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_refresh_leaves_store_intact() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(200)));
    transport.reply_json(TOKEN_PATH, 200, token_body("access-1", "refresh-1"));
    let (tokens, _) = manager(store.clone(), transport.clone());

    let first =
        tokio::time::timeout(Duration::from_millis(20), tokens.get_valid_token(REALM_ID)).await;

    assert!(first.is_err(), "refresh should still be waiting on the token endpoint");
    assert_eq!(store.saves(), 0);
    assert_eq!(store.get(REALM_ID).await, Some(expired_record()));

    let record = tokens.get_valid_token(REALM_ID).await.unwrap();

    assert_eq!(record.access_token, "access-1");
    assert_eq!(transport.count(TOKEN_PATH), 1);
    assert_eq!(store.saves(), 1);
    assert_eq!(store.get(REALM_ID).await, Some(record));
}

#[tokio::test(start_paused = true)]
async fn test_exchange_is_not_overwritten_by_running_refresh() {
    let store = Arc::new(CountingStore::new());
    store.seed(expired_record()).await;
    let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(50)));
    // Served in arrival order: the exchange reaches the endpoint first.
    transport.reply_json(TOKEN_PATH, 200, token_body("access-new", "refresh-new"));
    transport.reply_json(TOKEN_PATH, 200, token_body("access-1", "refresh-1"));
    let (tokens, _) = manager(store.clone(), transport.clone());

    let exchange = {
        let tokens = tokens.clone();
        tokio::spawn(async move { tokens.exchange_authorization_code("ABC123", REALM_ID).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let refreshed = tokens.get_valid_token(REALM_ID).await.unwrap();
    let exchanged = exchange.await.unwrap().unwrap();

    assert_eq!(refreshed.access_token, "access-1");
    assert_eq!(exchanged.access_token, "access-new");
    assert_eq!(store.get(REALM_ID).await, Some(exchanged));
    assert_eq!(store.saves(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_json_file_stores_sharing_a_directory() -> anyhow::Result<()> {
    do_setup();
    let dir = tempdir()?;

    for i in 0..50 {
        let path_a = dir.path().join(format!("a{i}.json"));
        let path_b = dir.path().join(format!("b{i}.json"));
        let store_a = Arc::new(JsonFileCredentialStore::load(&path_a).await?);
        let store_b = Arc::new(JsonFileCredentialStore::load(&path_b).await?);
        let record_a = fresh_record();
        let record_b = TokenRecord {
            realm_id: "4620816365".to_string(),
            access_token: "access-b".to_string(),
            ..fresh_record()
        };

        let save_a = {
            let (store, record) = (store_a.clone(), record_a.clone());
            tokio::spawn(async move { store.save(REALM_ID, record).await })
        };
        let save_b = {
            let (store, record) = (store_b.clone(), record_b.clone());
            tokio::spawn(async move { store.save("4620816365", record).await })
        };
        let (saved_a, saved_b) = tokio::join!(save_a, save_b);
        saved_a??;
        saved_b??;

        let reloaded_a = JsonFileCredentialStore::load(&path_a).await?;
        let reloaded_b = JsonFileCredentialStore::load(&path_b).await?;
        assert_eq!(reloaded_a.fetch(REALM_ID).await?, Some(record_a));
        assert_eq!(reloaded_a.fetch("4620816365").await?, None);
        assert_eq!(reloaded_b.fetch("4620816365").await?, Some(record_b));
        assert_eq!(reloaded_b.fetch(REALM_ID).await?, None);
    }
    Ok(())
}
