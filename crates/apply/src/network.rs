//! Default-network teardown. Firewall rules referencing a network block its
//! deletion, so every matching rule is deleted and waited on first.

use plinth_core::{network_link, ReconcileError, ReconcileResult};
use plinth_ops::{ComputeAdmin, OperationPoller, OperationWaiter};
use tracing::{debug, info};

pub async fn force_delete_network(
    compute: &dyn ComputeAdmin,
    poller: &dyn OperationPoller,
    waiter: &OperationWaiter,
    project_id: &str,
    network: &str,
) -> ReconcileResult<()> {
    let filter = format!("network eq {}", network_link(project_id, network));
    let mut deleted = 0usize;
    // Always re-list from the first page: deletions shift the remote's paging,
    // so a continuation token from before them can skip rules.
    loop {
        let page = compute
            .list_firewalls(project_id, &filter, None)
            .await
            .map_err(|e| ReconcileError::remote(format!("listing firewall rules of network {:?} in {:?}", network, project_id), e))?;
        if page.items.is_empty() {
            break;
        }
        for fw in &page.items {
            let op = compute
                .delete_firewall(project_id, &fw.name)
                .await
                .map_err(|e| ReconcileError::remote(format!("deleting firewall rule {:?} in {:?}", fw.name, project_id), e))?;
            waiter.wait(poller, project_id, op, &format!("deleting firewall rule {:?}", fw.name)).await?;
            deleted += 1;
        }
    }
    debug!(project = %project_id, network = %network, deleted, "firewall rules removed");

    let op = compute
        .delete_network(project_id, network)
        .await
        .map_err(|e| ReconcileError::remote(format!("deleting network {:?} in {:?}", network, project_id), e))?;
    waiter.wait(poller, project_id, op, &format!("deleting network {:?}", network)).await?;
    info!(project = %project_id, network = %network, firewalls = deleted, "network deleted");
    Ok(())
}
