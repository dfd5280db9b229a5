//! End-to-end sync flows against an in-memory mock remote.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use parley_store::{
    ActionUpsert, Channel, Message, MessageAction, MessageContent, MessageUpsert, MemberUpsert,
    StoreError, User, VersionMeta,
};
use parley_sync::{
    CacheConfig, ChatCache, EntityKind, MessageReceipt, Page, PageRequest, RemoteChatService,
    RemoteError, SyncEngine, SyncError,
};

// ---------------------------------------------------------------------------
// Mock remote
// ---------------------------------------------------------------------------

/// Pages are keyed by the request's start token; fetching a token with no
/// page configured fails, which doubles as the remote-failure fixture.
#[derive(Default)]
struct MockRemote {
    channels: HashMap<String, Channel>,
    channel_pages: HashMap<Option<String>, Page<Channel>>,
    message_pages: HashMap<Option<String>, Page<MessageUpsert>>,
    page_fetches: AtomicUsize,
    sent: Mutex<Vec<String>>,
    send_timetoken: i64,
}

impl MockRemote {
    fn fetch_count(&self) -> usize {
        self.page_fetches.load(Ordering::SeqCst)
    }

    fn sent_ids(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

fn unsupported<T>() -> Result<T, RemoteError> {
    Err(RemoteError::new("not wired in this test"))
}

impl RemoteChatService for MockRemote {
    async fn fetch_channel(&self, id: &str) -> Result<Channel, RemoteError> {
        self.channels
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::new(format!("no channel {id}")))
    }

    async fn fetch_channels(&self, page: &PageRequest) -> Result<Page<Channel>, RemoteError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.channel_pages
            .get(&page.start)
            .cloned()
            .ok_or_else(|| RemoteError::new(format!("no page at {:?}", page.start)))
    }

    async fn create_channel(&self, _channel: &Channel) -> Result<Channel, RemoteError> {
        unsupported()
    }

    async fn update_channel(&self, _channel: &Channel) -> Result<Channel, RemoteError> {
        unsupported()
    }

    async fn remove_channel(&self, _id: &str) -> Result<(), RemoteError> {
        unsupported()
    }

    async fn fetch_user(&self, _id: &str) -> Result<User, RemoteError> {
        unsupported()
    }

    async fn fetch_users(&self, _page: &PageRequest) -> Result<Page<User>, RemoteError> {
        unsupported()
    }

    async fn create_user(&self, _user: &User) -> Result<User, RemoteError> {
        unsupported()
    }

    async fn update_user(&self, _user: &User) -> Result<User, RemoteError> {
        unsupported()
    }

    async fn remove_user(&self, _id: &str) -> Result<(), RemoteError> {
        unsupported()
    }

    async fn fetch_member(
        &self,
        _channel_id: &str,
        _user_id: &str,
    ) -> Result<MemberUpsert, RemoteError> {
        unsupported()
    }

    async fn fetch_members(
        &self,
        _channel_id: &str,
        _page: &PageRequest,
    ) -> Result<Page<MemberUpsert>, RemoteError> {
        unsupported()
    }

    async fn fetch_message(&self, _id: &str) -> Result<MessageUpsert, RemoteError> {
        unsupported()
    }

    async fn fetch_messages(
        &self,
        _channel_id: &str,
        page: &PageRequest,
    ) -> Result<Page<MessageUpsert>, RemoteError> {
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        self.message_pages
            .get(&page.start)
            .cloned()
            .ok_or_else(|| RemoteError::new(format!("no page at {:?}", page.start)))
    }

    async fn remove_message(&self, _id: &str) -> Result<(), RemoteError> {
        unsupported()
    }

    async fn send_message(&self, message: &Message) -> Result<MessageReceipt, RemoteError> {
        self.sent.lock().unwrap().push(message.id.clone());
        Ok(MessageReceipt {
            timetoken: self.send_timetoken,
            version: VersionMeta {
                etag: Some("sent".into()),
                updated_at: Some(Utc::now()),
            },
        })
    }

    async fn send_signal(
        &self,
        _channel_id: &str,
        _payload: serde_json::Value,
    ) -> Result<(), RemoteError> {
        Ok(())
    }

    async fn fetch_actions(
        &self,
        _channel_id: &str,
        _page: &PageRequest,
    ) -> Result<Page<ActionUpsert>, RemoteError> {
        unsupported()
    }

    async fn add_action(&self, _action: &MessageAction) -> Result<MessageAction, RemoteError> {
        unsupported()
    }

    async fn remove_action(
        &self,
        _user_id: &str,
        _parent_timetoken: i64,
        _action_timetoken: i64,
    ) -> Result<(), RemoteError> {
        unsupported()
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn open_cache() -> (tempfile::TempDir, ChatCache) {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig {
        db_path: Some(dir.path().join("cache.db")),
        ..CacheConfig::default()
    };
    let cache = ChatCache::open(config).unwrap();
    (dir, cache)
}

fn named_channel(id: &str, name: &str) -> Channel {
    let mut ch = Channel::stub(id);
    ch.name = Some(name.to_string());
    ch
}

fn text_upsert(id: &str, channel_id: &str, author: &str, text: &str) -> MessageUpsert {
    MessageUpsert {
        message: Message {
            id: id.to_string(),
            timetoken: 0,
            created_at: Utc::now(),
            content: MessageContent::Text { text: text.to_string() },
            custom: None,
            author_user_id: author.to_string(),
            channel_id: channel_id.to_string(),
            version: VersionMeta::default(),
        },
        channel: Some(Channel::stub(channel_id)),
        author: Some(User::stub(author)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sync_one_channel_caches_the_row_and_notifies() {
    let (_dir, cache) = open_cache();
    let mut events = cache.subscribe();

    let mut remote = MockRemote::default();
    remote.channels.insert("c1".into(), named_channel("c1", "General"));
    let engine = SyncEngine::new(&cache, Arc::new(remote));

    let stored = engine.sync_channel("c1").await.unwrap();
    assert_eq!(stored.name.as_deref(), Some("General"));

    let reader = cache.reader().unwrap();
    assert_eq!(reader.get_channel("c1").unwrap().name.as_deref(), Some("General"));

    let event = events.recv().await.unwrap();
    assert_eq!(event.kind, EntityKind::Channel);
    assert_eq!(event.id, "c1");
}

#[tokio::test]
async fn sync_all_terminates_when_the_next_token_repeats() {
    let (_dir, cache) = open_cache();

    let mut remote = MockRemote::default();
    remote.channel_pages.insert(
        None,
        Page { items: vec![named_channel("c1", "one"), named_channel("c2", "two")], next: Some("t1".into()) },
    );
    remote.channel_pages.insert(
        Some("t1".into()),
        Page { items: vec![named_channel("c3", "three")], next: Some("t2".into()) },
    );
    // Page 3 repeats page 2's token: the walk must stop after this fetch.
    remote.channel_pages.insert(
        Some("t2".into()),
        Page { items: vec![named_channel("c4", "four")], next: Some("t2".into()) },
    );

    let remote = Arc::new(remote);
    let engine = SyncEngine::new(&cache, remote.clone());

    let mut pages_seen = 0;
    let run = engine
        .sync_all_channels(PageRequest::first(10), &CancellationToken::new(), |_page| {
            pages_seen += 1;
        })
        .await
        .unwrap();

    assert_eq!(remote.fetch_count(), 3);
    assert_eq!(pages_seen, 3);
    assert_eq!(run.pages, 3);
    assert_eq!(run.applied, 4);
    assert!(!run.cancelled);

    let reader = cache.reader().unwrap();
    assert_eq!(reader.list_channels().unwrap().len(), 4);
}

#[tokio::test]
async fn remote_failure_carries_the_request_that_failed() {
    let (_dir, cache) = open_cache();

    let mut remote = MockRemote::default();
    remote.channel_pages.insert(
        None,
        Page { items: vec![named_channel("c1", "one")], next: Some("t1".into()) },
    );
    // No page configured at t1: the second fetch fails.

    let engine = SyncEngine::new(&cache, Arc::new(remote));
    let err = engine
        .sync_all_channels(PageRequest::first(10), &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    let failed = err.failed_request().expect("page error should carry its request");
    assert_eq!(failed.start.as_deref(), Some("t1"));

    // The first page committed before the failure.
    let reader = cache.reader().unwrap();
    assert!(reader.channel_exists("c1").unwrap());
}

#[tokio::test]
async fn dangling_reference_on_the_first_page_aborts_the_walk() {
    let (_dir, cache) = open_cache();

    let mut remote = MockRemote::default();
    let mut orphan = text_upsert("m1", "c1", "ghost", "hi");
    orphan.author = None; // ghost author, not embedded and not cached
    remote
        .message_pages
        .insert(None, Page::last(vec![orphan]));

    let engine = SyncEngine::new(&cache, Arc::new(remote));
    let err = engine
        .sync_all_messages("c1", PageRequest::first(10), &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Store(StoreError::MissingRequiredData(_))));
}

#[tokio::test]
async fn dangling_reference_after_the_first_page_is_tolerated() {
    let (_dir, cache) = open_cache();

    let mut remote = MockRemote::default();
    remote.message_pages.insert(
        None,
        Page { items: vec![text_upsert("m1", "c1", "u1", "first")], next: Some("t1".into()) },
    );
    let mut orphan = text_upsert("m2", "c1", "ghost", "second");
    orphan.author = None;
    remote.message_pages.insert(
        Some("t1".into()),
        Page::last(vec![orphan, text_upsert("m3", "c1", "u1", "third")]),
    );

    let engine = SyncEngine::new(&cache, Arc::new(remote));
    let run = engine
        .sync_all_messages("c1", PageRequest::first(10), &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert_eq!(run.pages, 2);
    assert_eq!(run.applied, 2);
    assert_eq!(run.skipped, 1);

    let reader = cache.reader().unwrap();
    assert!(reader.message_exists("m1").unwrap());
    assert!(!reader.message_exists("m2").unwrap());
    assert!(reader.message_exists("m3").unwrap());
}

#[tokio::test]
async fn cancelled_walk_requests_no_pages() {
    let (_dir, cache) = open_cache();

    let mut remote = MockRemote::default();
    remote
        .channel_pages
        .insert(None, Page::last(vec![named_channel("c1", "one")]));
    let remote = Arc::new(remote);
    let engine = SyncEngine::new(&cache, remote.clone());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let run = engine
        .sync_all_channels(PageRequest::first(10), &cancel, |_| {})
        .await
        .unwrap();

    assert!(run.cancelled);
    assert_eq!(run.pages, 0);
    assert_eq!(remote.fetch_count(), 0);
}

#[tokio::test]
async fn send_message_folds_in_the_server_timetoken() {
    let (_dir, cache) = open_cache();

    // The channel and author must be cached before composing.
    cache
        .queue()
        .run(|batch| {
            batch.db().upsert_channel(&Channel::stub("c1"))?;
            batch.db().upsert_user(&User::stub("u1"))?;
            Ok(())
        })
        .await
        .unwrap();

    let remote = Arc::new(MockRemote { send_timetoken: 777, ..MockRemote::default() });
    let engine = SyncEngine::new(&cache, remote.clone());

    let sent = engine
        .send_message("c1", "u1", MessageContent::Text { text: "hello".into() }, None)
        .await
        .unwrap();

    assert_eq!(sent.timetoken, 777);
    assert_eq!(sent.channel_id, "c1");
    assert_eq!(sent.author_user_id, "u1");

    // Re-sending the same composed message is idempotent: still one row,
    // same id, timetoken re-acknowledged.
    let mut retry = sent.clone();
    retry.timetoken = 0;
    retry.version = VersionMeta::default();
    let resent = engine.resend_message(retry).await.unwrap();
    assert_eq!(resent.id, sent.id);
    assert_eq!(resent.timetoken, 777);

    let reader = cache.reader().unwrap();
    assert_eq!(reader.list_messages("c1", 50, 0).unwrap().len(), 1);
    assert_eq!(remote.sent_ids(), vec![sent.id.clone(), sent.id.clone()]);
}

#[tokio::test]
async fn composing_into_an_unknown_channel_is_rejected() {
    let (_dir, cache) = open_cache();
    let engine = SyncEngine::new(&cache, Arc::new(MockRemote::default()));

    let err = engine
        .send_message("nowhere", "nobody", MessageContent::Text { text: "hi".into() }, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Store(StoreError::MissingRequiredData(_))));
}
