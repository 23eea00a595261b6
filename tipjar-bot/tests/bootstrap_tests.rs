//! Startup against a real LMDB directory and the inbound command flow.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tipjar_bot::{bootstrap, handle_event, BotConfig, InboundEvent, StartupIssue};
use tipjar_core::{AccountRecord, CacheConfig, PermitConfig};
use tipjar_storage::{LmdbRecordStore, RecordStore};
use tipjar_test_utils::{fixtures, ActionKind, IdentityKey, RecordingGateway, WalletRef};

fn config_in(dir: &TempDir) -> BotConfig {
    BotConfig::default()
        .with_database_path(dir.path().join("accounts"))
        .with_permits(
            PermitConfig::default()
                .with_interval(Duration::from_millis(10))
                .with_burst(5),
        )
}

fn event(text: &str) -> InboundEvent {
    InboundEvent {
        chat_id: -100,
        message_id: 1,
        from: fixtures::alice(),
        text: text.to_string(),
    }
}

#[tokio::test]
async fn test_start_creates_wallet_that_survives_restart() {
    let dir = TempDir::new().expect("temp dir");
    let config = config_in(&dir);
    let gateway = Arc::new(RecordingGateway::new());

    let bot = bootstrap(&config, gateway.clone()).expect("bootstrap succeeds");
    let reply = handle_event(&bot, &event("/start")).await;
    assert!(reply.is_some());

    let wallet_reply = handle_event(&bot, &event("/wallet")).await;
    assert!(wallet_reply.is_some());

    let texts: Vec<String> = gateway.calls().into_iter().filter_map(|c| c.text).collect();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "Wallet created: wallet-42");
    assert_eq!(texts[1], "Your wallet: wallet-42");
    assert_eq!(gateway.count(ActionKind::Reply), 2);
    bot.shutdown().await;

    let store = LmdbRecordStore::open(dir.path().join("accounts"), 64).expect("reopen");
    let stored = store
        .find_by_key(&IdentityKey::from(42))
        .await
        .expect("read")
        .expect("alice was saved");
    assert_eq!(stored.wallet, Some(WalletRef::new("wallet-42")));
}

#[tokio::test]
async fn test_wallet_created_for_stored_profile_is_served_from_cache() {
    let dir = TempDir::new().expect("temp dir");
    {
        let store = LmdbRecordStore::open(dir.path().join("accounts"), 64).expect("open");
        store
            .save(&AccountRecord::seed(fixtures::alice()))
            .await
            .expect("seed alice without a wallet");
    }

    let gateway = Arc::new(RecordingGateway::new());
    let bot = bootstrap(&config_in(&dir), gateway.clone()).expect("bootstrap succeeds");

    // The wallet-less record read here is queued for the cache while the
    // new wallet is written; the queued copy must not win.
    handle_event(&bot, &event("/start")).await;
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    handle_event(&bot, &event("/wallet")).await;

    let texts: Vec<String> = gateway.calls().into_iter().filter_map(|c| c.text).collect();
    assert_eq!(texts, vec!["Wallet created: wallet-42", "Your wallet: wallet-42"]);
    bot.shutdown().await;
}

#[tokio::test]
async fn test_start_twice_keeps_first_wallet() {
    let dir = TempDir::new().expect("temp dir");
    let gateway = Arc::new(RecordingGateway::new());
    let bot = bootstrap(&config_in(&dir), gateway.clone()).expect("bootstrap succeeds");

    handle_event(&bot, &event("/start")).await;
    handle_event(&bot, &event("/start")).await;

    let last = gateway.calls().pop().and_then(|c| c.text);
    assert_eq!(last.as_deref(), Some("You already have a wallet: wallet-42"));
    bot.shutdown().await;
}

#[tokio::test]
async fn test_wallet_before_start_prompts() {
    let dir = TempDir::new().expect("temp dir");
    let gateway = Arc::new(RecordingGateway::new());
    let bot = bootstrap(&config_in(&dir), gateway.clone()).expect("bootstrap succeeds");

    handle_event(&bot, &event("/balance")).await;
    let text = gateway.calls().pop().and_then(|c| c.text);
    assert_eq!(
        text.as_deref(),
        Some("You have no wallet yet. Send /start to create one.")
    );

    // Plain chatter gets no reply.
    assert!(handle_event(&bot, &event("thanks!")).await.is_none());
    assert_eq!(gateway.calls().len(), 1);
    bot.shutdown().await;
}

#[tokio::test]
async fn test_whois_reports_each_state() {
    let dir = TempDir::new().expect("temp dir");
    let gateway = Arc::new(RecordingGateway::new());
    let bot = bootstrap(&config_in(&dir), gateway.clone()).expect("bootstrap succeeds");

    let mut bob_says = event("/wallet");
    bob_says.from = fixtures::bob();
    handle_event(&bot, &bob_says).await;
    handle_event(&bot, &event("/start")).await;

    handle_event(&bot, &event("/whois @Alice")).await;
    handle_event(&bot, &event("/whois bob")).await;
    handle_event(&bot, &event("/whois carol")).await;

    let texts: Vec<String> = gateway.calls().into_iter().filter_map(|c| c.text).collect();
    let tail = &texts[texts.len() - 3..];
    assert_eq!(tail[0], "@Alice has a wallet: wallet-42");
    assert_eq!(tail[1], "@bob has not used the bot yet.");
    assert_eq!(tail[2], "@carol has not used the bot yet.");
    bot.shutdown().await;
}

#[tokio::test]
async fn test_bootstrap_reports_every_issue() {
    let dir = TempDir::new().expect("temp dir");
    let not_a_dir = dir.path().join("occupied");
    std::fs::write(&not_a_dir, b"not a database").expect("write file");

    let config = BotConfig::default()
        .with_database_path(&not_a_dir)
        .with_cache(CacheConfig::default().with_queue_capacity(0))
        .with_permits(PermitConfig::default().with_burst(0));

    let error = match bootstrap(&config, Arc::new(RecordingGateway::new())) {
        Ok(_) => panic!("bootstrap should fail"),
        Err(e) => e,
    };

    assert_eq!(error.issues.len(), 3);
    let config_issues = error
        .issues
        .iter()
        .filter(|i| matches!(i, StartupIssue::Config(_)))
        .count();
    assert_eq!(config_issues, 2);
    assert!(error
        .issues
        .iter()
        .any(|i| matches!(i, StartupIssue::Store { .. })));

    let text = error.to_string();
    assert!(text.starts_with("startup failed with 3 issue(s)"));
    assert!(text.contains("cache.queue_capacity"));
    assert!(text.contains("permits.burst"));
}
