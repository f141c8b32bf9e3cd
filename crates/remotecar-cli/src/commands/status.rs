//! Status command - list vehicles with their state

use anyhow::Result;
use remotecar_client::Account;
use tokio_util::sync::CancellationToken;

use crate::output::{OutputContext, VehicleRow};

/// Fetch all vehicles of the account
pub async fn status(account: &Account, cancel: &CancellationToken, ctx: &OutputContext) -> Result<()> {
    let vehicles = account.get_vehicles(false, cancel).await?;

    let rows: Vec<VehicleRow> = vehicles.iter().map(VehicleRow::from).collect();
    ctx.print(&rows, &vehicles);
    Ok(())
}
