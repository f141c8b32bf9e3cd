//! Login command - authenticate and persist the session

use anyhow::Result;
use remotecar_client::Account;
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

/// Log in and show the resulting session (without its tokens)
pub async fn login(account: &Account, cancel: &CancellationToken, ctx: &OutputContext) -> Result<()> {
    let session = account.login(cancel).await?;

    ctx.success("Logged in");
    ctx.print_kv(&[
        ("Region", session.region.to_string()),
        ("Expires", session.expires_at.to_rfc3339()),
        ("GCID", session.gcid.unwrap_or_else(|| "-".to_string())),
        ("Session", session.session_id.unwrap_or_else(|| "-".to_string())),
    ]);
    Ok(())
}
