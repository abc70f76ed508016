//! Queue maintenance outside of a crawl run

use crate::queue::{Priority, PriorityRules};
use crate::storage::{Storage, StorageResult};
use crate::url::parse_domain_name;
use url::Url;

/// Marks domains ok to spider and queues each root page at high priority
///
/// Root pages that were already queued (or consumed) are requeued. Entries
/// that are not valid domain names are skipped with a warning. Returns the
/// number of domains blessed.
pub fn bless_domains<S: Storage>(storage: &mut S, domains: &[String]) -> StorageResult<usize> {
    let mut blessed = Vec::new();
    let mut roots = Vec::new();

    for domain in domains {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            continue;
        }

        let root = parse_domain_name(&domain)
            .ok()
            .and_then(|_| Url::parse(&format!("https://{}/", domain)).ok());
        match root {
            Some(root) => {
                blessed.push(domain);
                roots.push(root);
            }
            None => tracing::warn!("Skipping invalid domain: {}", domain),
        }
    }

    storage.with_transaction(|s| {
        s.mark_domains_ok_to_spider(&blessed, true)?;
        for root in &roots {
            s.enqueue(root, Priority::High, true)?;
        }
        Ok(())
    })?;

    tracing::info!("Blessed {} domains", blessed.len());
    Ok(blessed.len())
}

/// Recomputes the priority of every unconsumed queue item
///
/// Returns the number of items whose priority changed.
pub fn reprioritize<S: Storage>(storage: &mut S, rules: &PriorityRules) -> StorageResult<usize> {
    let items = storage.unconsumed_items()?;
    let total = items.len();

    let changed = storage.with_transaction(|s| {
        let mut changed = 0;
        for item in &items {
            let Ok(url) = Url::parse(&item.url) else {
                tracing::warn!("Queue item #{} has an unparseable URL: {}", item.id, item.url);
                continue;
            };

            let priority = rules.priority_of(&url);
            if priority != item.priority {
                tracing::debug!("{}: {} -> {}", item.url, item.priority, priority);
                s.set_priority(item.id, priority)?;
                changed += 1;
            }
        }
        Ok(changed)
    })?;

    tracing::info!("Reprioritized {} of {} queue items", changed, total);
    Ok(changed)
}
