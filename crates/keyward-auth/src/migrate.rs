//! One-time backfill for tokens issued before every token had its own secret.

use keyward_storage::{Store, DEFAULT_PAGE_LIMIT};

use crate::AuthError;

/// Give every live token with an empty secret the service's master secret (hex).
/// Returns how many records were rewritten.
pub async fn backfill_secrets(store: &dyn Store, master_secret: &str) -> Result<usize, AuthError> {
    if hex::decode(master_secret).is_err() {
        return Err(AuthError::InvalidRequest("master secret is not hex".into()));
    }

    let mut skip = 0;
    let mut updated = 0;
    loop {
        let page = store.list_tokens(skip, DEFAULT_PAGE_LIMIT).await?;
        if page.is_empty() {
            break;
        }
        for mut kp in page {
            if !kp.secret.is_empty() {
                continue;
            }
            kp.secret = master_secret.to_string();
            store.update_token(&kp).await?;
            updated += 1;
            let short: String = kp.token.as_str().chars().take(12).collect();
            tracing::info!(token = %short, name = %kp.name, "backfilled token secret");
        }
        skip += DEFAULT_PAGE_LIMIT;
    }
    Ok(updated)
}
