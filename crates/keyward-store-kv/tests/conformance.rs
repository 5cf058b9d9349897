use keyward_storage::conformance;
use keyward_store_kv::KvStore;

macro_rules! conformance_tests {
    ($($name:ident),* $(,)?) => {
        $(
            #[tokio::test]
            async fn $name() {
                let store = KvStore::open_temporary().await.unwrap();
                conformance::$name(&store).await;
            }
        )*
    };
}

conformance_tests!(
    token_lifecycle,
    unknown_token_is_not_found,
    token_pagination,
    tokens_by_name_skips_deleted,
    update_token_rewrites_secret,
    user_lifecycle,
    user_name_never_reused,
    list_users_filters,
    list_users_pagination,
    miner_lookup,
    miner_duplicates_return_a_live_match,
    rate_limit_roundtrip,
    rate_limit_upsert_and_single_lookup,
    rate_limit_sets_are_per_user,
);
