use crate::store::RevocationLedger;
use anyhow::Result;
use chrono::Utc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
}

/// Delete ledger entries whose credentials have expired.
/// # Errors
/// Returns an error if the database is unreachable or the delete fails.
pub async fn execute(args: Args) -> Result<()> {
    let store = super::server::connect(&args.dsn).await?;
    let pruned = store.prune_expired(Utc::now()).await?;
    info!(pruned, "Revocation ledger pruned");
    println!("pruned {pruned} expired ledger entries");
    Ok(())
}
