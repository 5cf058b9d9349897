//! Behaviour every [`Store`] backend must share.
//!
//! Backend crates call these from their own integration tests so the embedded and the
//! relational engine are held to exactly the same soft-delete, paging and lookup rules.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;

use crate::*;

pub fn keypair(token: &str, name: &str) -> KeyPair {
    KeyPair {
        token: Token::from(token),
        secret: "00".repeat(32),
        name: name.to_string(),
        perm: "read".to_string(),
        extra: String::new(),
        created_at: Utc::now(),
        is_deleted: false,
    }
}

pub fn user(name: &str) -> User {
    let now = Utc::now();
    User {
        id: UserId::new(),
        name: name.to_string(),
        miner: None,
        comment: String::new(),
        source_type: SourceType(0),
        state: UserState::Enabled,
        burst: 0,
        rate: 0,
        created_at: now,
        updated_at: now,
        is_deleted: false,
    }
}

pub fn rule(name: &str, service: &str, api: &str) -> RateLimitRule {
    RateLimitRule {
        id: String::new(),
        name: name.to_string(),
        service: service.to_string(),
        api: api.to_string(),
        capacity: 10,
        reset_duration: Duration::from_secs(60),
    }
}

fn tokens_of(kps: &[KeyPair]) -> Vec<String> {
    kps.iter().map(|kp| kp.token.0.clone()).collect()
}

pub async fn token_lifecycle(s: &dyn Store) {
    let kp = keypair("tok-1", "alice");
    s.put_token(&kp).await.unwrap();

    assert!(s.has_token(&kp.token).await.unwrap());
    let got = s.get_token(&kp.token).await.unwrap();
    assert_eq!(got.name, "alice");
    assert_eq!(got.secret, kp.secret);
    assert!(!got.is_deleted);

    s.delete_token(&kp.token).await.unwrap();
    assert!(!s.has_token(&kp.token).await.unwrap());
    assert!(matches!(
        s.get_token(&kp.token).await.unwrap_err(),
        StoreError::Deleted
    ));
    assert!(matches!(
        s.delete_token(&kp.token).await.unwrap_err(),
        StoreError::Deleted
    ));
}

pub async fn unknown_token_is_not_found(s: &dyn Store) {
    let missing = Token::from("never-issued");
    assert!(!s.has_token(&missing).await.unwrap());
    assert!(matches!(
        s.get_token(&missing).await.unwrap_err(),
        StoreError::NotFound
    ));
    assert!(matches!(
        s.delete_token(&missing).await.unwrap_err(),
        StoreError::NotFound
    ));
}

pub async fn token_pagination(s: &dyn Store) {
    for i in 0..5 {
        s.put_token(&keypair(&format!("tok-{i}"), &format!("user-{i}")))
            .await
            .unwrap();
    }
    let gone = keypair("tok-deleted", "user-2a");
    s.put_token(&gone).await.unwrap();
    s.delete_token(&gone.token).await.unwrap();

    let first = tokens_of(&s.list_tokens(0, 2).await.unwrap());
    let second = tokens_of(&s.list_tokens(2, 2).await.unwrap());
    let third = tokens_of(&s.list_tokens(4, 2).await.unwrap());
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert_eq!(third.len(), 1);

    let mut all = BTreeSet::new();
    for t in first.iter().chain(&second).chain(&third) {
        assert!(all.insert(t.clone()), "token {t} listed twice");
    }
    assert_eq!(all.len(), 5);
    assert!(!all.contains("tok-deleted"));

    // stable across calls
    assert_eq!(tokens_of(&s.list_tokens(0, 2).await.unwrap()), first);
    assert!(s.list_tokens(5, 10).await.unwrap().is_empty());
}

pub async fn tokens_by_name_skips_deleted(s: &dyn Store) {
    s.put_token(&keypair("a-1", "alice")).await.unwrap();
    s.put_token(&keypair("a-2", "alice")).await.unwrap();
    s.put_token(&keypair("b-1", "bob")).await.unwrap();
    s.delete_token(&Token::from("a-2")).await.unwrap();

    let alice = tokens_of(&s.tokens_by_name("alice").await.unwrap());
    assert_eq!(alice, vec!["a-1".to_string()]);
    assert!(s.tokens_by_name("carol").await.unwrap().is_empty());
}

pub async fn update_token_rewrites_secret(s: &dyn Store) {
    let mut kp = keypair("legacy", "alice");
    kp.secret = String::new();
    s.put_token(&kp).await.unwrap();

    kp.secret = "ab".repeat(32);
    s.update_token(&kp).await.unwrap();
    assert_eq!(s.get_token(&kp.token).await.unwrap().secret, kp.secret);
}

pub async fn user_lifecycle(s: &dyn Store) {
    let mut u = user("alice");
    u.comment = "first".into();
    s.put_user(&u).await.unwrap();
    assert!(s.has_user("alice").await.unwrap());

    let got = s.get_user("alice").await.unwrap();
    assert_eq!(got.id, u.id);
    assert_eq!(got.comment, "first");

    let mut changed = got.clone();
    changed.id = UserId::new();
    changed.comment = "second".into();
    changed.burst = 5;
    s.update_user(&changed).await.unwrap();
    let got = s.get_user("alice").await.unwrap();
    assert_eq!(got.id, u.id, "update must not replace the id");
    assert_eq!(got.comment, "second");
    assert_eq!(got.burst, 5);

    s.delete_user("alice").await.unwrap();
    assert!(!s.has_user("alice").await.unwrap());
    assert!(matches!(
        s.get_user("alice").await.unwrap_err(),
        StoreError::Deleted
    ));
    assert!(s.delete_user("alice").await.is_err());
    assert!(matches!(
        s.get_user("nobody").await.unwrap_err(),
        StoreError::NotFound
    ));
    assert!(matches!(
        s.delete_user("nobody").await.unwrap_err(),
        StoreError::NotFound
    ));
}

pub async fn user_name_never_reused(s: &dyn Store) {
    s.put_user(&user("alice")).await.unwrap();
    assert!(matches!(
        s.put_user(&user("alice")).await.unwrap_err(),
        StoreError::AlreadyExists
    ));

    s.delete_user("alice").await.unwrap();
    assert!(matches!(
        s.put_user(&user("alice")).await.unwrap_err(),
        StoreError::AlreadyExists
    ));
}

pub async fn list_users_filters(s: &dyn Store) {
    let mut a = user("a");
    a.source_type = SourceType(1);
    a.state = UserState::Enabled;
    let mut b = user("b");
    b.source_type = SourceType(1);
    b.state = UserState::Disabled;
    let mut c = user("c");
    c.source_type = SourceType(2);
    c.state = UserState::Enabled;
    let mut d = user("d");
    d.source_type = SourceType(1);
    for u in [&a, &b, &c, &d] {
        s.put_user(u).await.unwrap();
    }
    s.delete_user("d").await.unwrap();

    let names = |users: Vec<User>| -> BTreeSet<String> { users.into_iter().map(|u| u.name).collect() };
    let page = Page::new(0, 100);

    let by_source = s
        .list_users(&UserFilter {
            page,
            source_type: SourceType(1),
            state: UserState::Enabled,
            mask: FilterMask(FilterMask::SOURCE_TYPE),
        })
        .await
        .unwrap();
    assert_eq!(names(by_source), BTreeSet::from(["a".to_string(), "b".to_string()]));

    let by_state = s
        .list_users(&UserFilter {
            page,
            state: UserState::Enabled,
            mask: FilterMask(FilterMask::STATE),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(names(by_state), BTreeSet::from(["a".to_string(), "c".to_string()]));

    let both = s
        .list_users(&UserFilter {
            page,
            source_type: SourceType(1),
            state: UserState::Disabled,
            mask: FilterMask(FilterMask::SOURCE_TYPE | FilterMask::STATE),
        })
        .await
        .unwrap();
    assert_eq!(names(both), BTreeSet::from(["b".to_string()]));

    let all = s
        .list_users(&UserFilter {
            page,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}

pub async fn list_users_pagination(s: &dyn Store) {
    for i in 0..5 {
        let mut u = user(&format!("user-{i}"));
        u.source_type = SourceType(7);
        s.put_user(&u).await.unwrap();
    }
    s.put_user(&user("other")).await.unwrap();

    let filter = |skip, limit| UserFilter {
        page: Page::new(skip, limit),
        source_type: SourceType(7),
        mask: FilterMask(FilterMask::SOURCE_TYPE),
        ..Default::default()
    };
    let first = s.list_users(&filter(0, 3)).await.unwrap();
    let second = s.list_users(&filter(3, 3)).await.unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(second.len(), 2);

    let mut seen = BTreeSet::new();
    for u in first.iter().chain(&second) {
        assert!(seen.insert(u.name.clone()));
    }
    assert!(!seen.contains("other"));
}

pub async fn miner_lookup(s: &dyn Store) {
    let mut a = user("alice");
    a.miner = Some("f01000".into());
    let mut b = user("bob");
    b.miner = Some("f02000".into());
    s.put_user(&a).await.unwrap();
    s.put_user(&b).await.unwrap();

    assert!(s.has_miner("f01000").await.unwrap());
    assert_eq!(s.get_user_by_miner("f01000").await.unwrap().name, "alice");
    assert!(!s.has_miner("f09999").await.unwrap());
    assert!(matches!(
        s.get_user_by_miner("f09999").await.unwrap_err(),
        StoreError::NotFound
    ));

    s.delete_user("bob").await.unwrap();
    assert!(!s.has_miner("f02000").await.unwrap());
    assert!(s.get_user_by_miner("f02000").await.unwrap_err().is_absent());
}

pub async fn miner_duplicates_return_a_live_match(s: &dyn Store) {
    for name in ["m1", "m2", "m3"] {
        let mut u = user(name);
        u.miner = Some("f01234".into());
        s.put_user(&u).await.unwrap();
    }
    s.delete_user("m1").await.unwrap();

    let got = s.get_user_by_miner("f01234").await.unwrap();
    assert!(got.name == "m2" || got.name == "m3");
    assert!(!got.is_deleted);
}

pub async fn rate_limit_roundtrip(s: &dyn Store) {
    let id = s.put_rate_limit(&rule("alice", "chain", "*")).await.unwrap();
    assert!(!id.is_empty());

    let rules = s.get_rate_limits("alice", None).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, id);
    assert_eq!(rules[0].service, "chain");
    assert_eq!(rules[0].api, "*");
    assert_eq!(rules[0].capacity, 10);
    assert_eq!(rules[0].reset_duration, Duration::from_secs(60));

    s.delete_rate_limit("alice", &id).await.unwrap();
    assert!(s.get_rate_limits("alice", None).await.unwrap().is_empty());
}

pub async fn rate_limit_upsert_and_single_lookup(s: &dyn Store) {
    let first = s.put_rate_limit(&rule("alice", "chain", "*")).await.unwrap();
    let second = s
        .put_rate_limit(&rule("alice", "wallet", "WalletSign"))
        .await
        .unwrap();
    assert_ne!(first, second);

    let mut replaced = rule("alice", "chain", "ChainHead");
    replaced.id = first.clone();
    replaced.capacity = 99;
    assert_eq!(s.put_rate_limit(&replaced).await.unwrap(), first);

    let all = s.get_rate_limits("alice", None).await.unwrap();
    assert_eq!(all.len(), 2);

    let one = s.get_rate_limits("alice", Some(&first)).await.unwrap();
    assert_eq!(one.len(), 1);
    assert_eq!(one[0].capacity, 99);
    assert_eq!(one[0].api, "ChainHead");

    assert!(s
        .get_rate_limits("alice", Some("no-such-rule"))
        .await
        .unwrap()
        .is_empty());
}

pub async fn rate_limit_sets_are_per_user(s: &dyn Store) {
    let alice = s.put_rate_limit(&rule("alice", "chain", "*")).await.unwrap();
    s.put_rate_limit(&rule("bob", "chain", "*")).await.unwrap();

    // deleting alice's rule id under bob must not touch alice
    s.delete_rate_limit("bob", &alice).await.unwrap();
    assert_eq!(s.get_rate_limits("alice", None).await.unwrap().len(), 1);
    assert_eq!(s.get_rate_limits("bob", None).await.unwrap().len(), 1);

    // unknown user and unknown id are both no-ops
    s.delete_rate_limit("carol", "nope").await.unwrap();
    assert!(s.get_rate_limits("carol", None).await.unwrap().is_empty());
}
