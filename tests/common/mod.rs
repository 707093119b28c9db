use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::watch;

use smartmark::sync::ViewState;

/// Upper bound for anything a test waits on.
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// A fixed instant `secs` seconds after a common origin.
#[allow(dead_code)]
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).expect("valid timestamp")
}

/// Waits until the published view satisfies `pred`, failing after [`WAIT`].
#[allow(dead_code)]
pub async fn wait_for_view(
    rx: &mut watch::Receiver<ViewState>,
    pred: impl FnMut(&ViewState) -> bool,
) -> ViewState {
    tokio::time::timeout(WAIT, rx.wait_for(pred))
        .await
        .expect("view did not reach expected state in time")
        .expect("view publisher dropped")
        .clone()
}

/// Token endpoint body for `user_id`.
#[allow(dead_code)]
pub fn token_body(access_token: &str, user_id: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": 3600,
        "refresh_token": format!("refresh-{access_token}"),
        "user": { "id": user_id, "email": format!("{user_id}@example.com") }
    })
}

/// A row as the row store returns it.
#[allow(dead_code)]
pub fn row_json(id: &str, title: &str, user_id: &str, created_at: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": title,
        "url": format!("https://example.com/{id}"),
        "user_id": user_id,
        "created_at": created_at
    })
}
