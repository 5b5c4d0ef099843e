//! Reply-text rendering for catalog listings and search results.

use chrono::{DateTime, Utc};

use plugmart_core::{current_unix_timestamp, format_relative_secs};

use crate::{CatalogEntry, CatalogSnapshot, CATALOG_PAGE_SIZE};

/// Renders one catalog page with 1-based indices and install hints.
pub fn render_market_page(snapshot: &CatalogSnapshot, page: usize) -> String {
    if snapshot.is_empty() {
        return "no plugins available".to_string();
    }
    let total_pages = snapshot.total_pages();
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * CATALOG_PAGE_SIZE;
    let rows = snapshot
        .entries()
        .iter()
        .enumerate()
        .skip(start)
        .take(CATALOG_PAGE_SIZE);

    let now_unix = current_unix_timestamp();
    let mut reply = format!("plugin market (page {page}/{total_pages})\n\n");
    for (index, entry) in rows {
        reply.push_str(&render_entry(index + 1, entry, now_unix));
    }
    if page < total_pages {
        reply.push_str(&format!("next page: /plugin market {}\n", page + 1));
    }
    reply
}

/// Renders one page of search hits, preserving each hit's position in the
/// full listing so the install hints keep working.
pub fn render_search_results(snapshot: &CatalogSnapshot, term: &str, page: usize) -> String {
    let hits = snapshot.search(term);
    if hits.is_empty() {
        return format!("no plugins matching '{term}'");
    }
    let total_pages = hits.len().div_ceil(CATALOG_PAGE_SIZE).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * CATALOG_PAGE_SIZE;

    let now_unix = current_unix_timestamp();
    let mut reply = format!(
        "search results for '{term}' (page {page}/{total_pages}, {} matches)\n\n",
        hits.len()
    );
    for (position, entry) in hits.iter().skip(start).take(CATALOG_PAGE_SIZE) {
        reply.push_str(&render_entry(*position, entry, now_unix));
    }
    if page < total_pages {
        reply.push_str(&format!("next page: /plugin search {term} {}\n", page + 1));
    }
    reply
}

fn render_entry(position: usize, entry: &CatalogEntry, now_unix: u64) -> String {
    let mut block = format!("{position}. {}\n", entry.key);
    block.push_str(&format!(
        "   author: {}\n",
        entry.author.as_deref().unwrap_or("unknown")
    ));
    block.push_str(&format!(
        "   {}\n",
        entry.desc.as_deref().unwrap_or("no description")
    ));
    let mut meta = Vec::new();
    if let Some(stars) = entry.stars {
        meta.push(format!("{stars} stars"));
    }
    if let Some(age) = entry
        .updated_at
        .as_deref()
        .and_then(|updated_at| relative_updated(updated_at, now_unix))
    {
        meta.push(format!("updated {age}"));
    }
    if !meta.is_empty() {
        block.push_str(&format!("   {}\n", meta.join(", ")));
    }
    block.push_str(&format!("   install: /plugin install {position}\n\n"));
    block
}

fn relative_updated(updated_at: &str, now_unix: u64) -> Option<String> {
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(updated_at).ok()?.into();
    let updated_unix = u64::try_from(parsed.timestamp()).ok()?;
    Some(format_relative_secs(now_unix.saturating_sub(updated_unix)))
}
