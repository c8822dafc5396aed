// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Affiliate link registry and click tracking.
//!
//! A link is stored before its tracking URL exists: the URL embeds the
//! link's own id, so the record is inserted first and the URL is
//! backfilled right after.

use crate::LedgerError;
use crate::base::{LinkId, ReviewStatus, UserId};
use crate::config::Settings;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AffiliateLink {
    pub id: LinkId,
    pub owner: UserId,
    pub original_url: String,
    pub tracking_url: String,
    pub click_count: u64,
    /// Review state of the link itself. Nothing downstream reads it yet.
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// Decides which links can be converted and how tracking URLs look.
#[derive(Debug, Clone)]
pub struct MerchantPolicy {
    domains: Vec<String>,
    tracking_base_url: String,
}

impl MerchantPolicy {
    pub fn new(domains: Vec<String>, tracking_base_url: impl Into<String>) -> Self {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.trim().trim_end_matches('.').to_lowercase())
                .collect(),
            tracking_base_url: tracking_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.merchant_domains.clone(),
            settings.tracking_base_url.clone(),
        )
    }

    /// True when `url` is an http(s) URL whose host is a merchant domain
    /// or one of its subdomains.
    pub fn accepts(&self, url: &str) -> bool {
        self.normalize(url).is_some()
    }

    /// The browser-normalized form of an accepted merchant URL. This is
    /// what gets stored and redirected to.
    pub fn normalize(&self, url: &str) -> Option<String> {
        let parsed = parse_web_url(url)?;
        let host = parsed.host_str()?.trim_end_matches('.');
        self.domains
            .iter()
            .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
            .then(|| parsed.to_string())
    }

    pub fn tracking_url(&self, id: LinkId) -> String {
        format!("{}/{}", self.tracking_base_url, id)
    }

    /// Maps a tracking URL produced by [`Self::tracking_url`] back to its id.
    pub fn resolve(&self, tracking_url: &str) -> Option<LinkId> {
        let rest = tracking_url.strip_prefix(&self.tracking_base_url)?;
        let id = rest.strip_prefix('/')?.trim_end_matches('/');
        id.parse().ok().map(LinkId)
    }
}

impl Default for MerchantPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Parses `url` the way a browser would and returns it when it is a
/// credential-free http(s) URL with a host.
fn parse_web_url(url: &str) -> Option<Url> {
    let parsed = Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return None;
    }
    parsed.host_str()?;
    Some(parsed)
}

/// Thread-safe link store.
///
/// Click counts are bumped under the link's map entry, so concurrent
/// clicks never lose an increment.
#[derive(Debug)]
pub struct LinkRegistry {
    links: DashMap<LinkId, AffiliateLink>,
    next_id: AtomicU64,
    policy: MerchantPolicy,
}

impl LinkRegistry {
    pub fn new(policy: MerchantPolicy) -> Self {
        Self {
            links: DashMap::new(),
            next_id: AtomicU64::new(1),
            policy,
        }
    }

    pub fn policy(&self) -> &MerchantPolicy {
        &self.policy
    }

    /// Registers `original_url` for `owner` and returns the stored link.
    ///
    /// # Errors
    ///
    /// [`LedgerError::InvalidMerchantUrl`] when the URL is not a merchant link.
    pub fn create(
        &self,
        owner: UserId,
        original_url: &str,
        now: DateTime<Utc>,
    ) -> Result<AffiliateLink, LedgerError> {
        let original_url = self
            .policy
            .normalize(original_url)
            .ok_or(LedgerError::InvalidMerchantUrl)?;

        let id = LinkId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.links.insert(
            id,
            AffiliateLink {
                id,
                owner,
                original_url,
                tracking_url: String::new(),
                click_count: 0,
                status: ReviewStatus::Pending,
                created_at: now,
            },
        );

        let mut link = self.links.get_mut(&id).ok_or(LedgerError::LinkNotFound)?;
        link.tracking_url = self.policy.tracking_url(id);
        Ok(link.value().clone())
    }

    /// Counts one click and returns the URL to redirect to.
    pub fn track_click(&self, id: LinkId) -> Result<String, LedgerError> {
        let mut link = self.links.get_mut(&id).ok_or(LedgerError::LinkNotFound)?;
        link.click_count += 1;
        Ok(link.original_url.clone())
    }

    pub fn get(&self, id: LinkId) -> Option<AffiliateLink> {
        self.links.get(&id).map(|link| link.value().clone())
    }

    /// Looks up a link owned by `owner`; other users' links are not found.
    pub fn get_owned(&self, owner: UserId, id: LinkId) -> Result<AffiliateLink, LedgerError> {
        self.get(id)
            .filter(|link| link.owner == owner)
            .ok_or(LedgerError::LinkNotFound)
    }

    /// The owner's links, newest first.
    pub fn for_owner(&self, owner: UserId) -> Vec<AffiliateLink> {
        let mut links: Vec<AffiliateLink> = self
            .links
            .iter()
            .filter(|entry| entry.owner == owner)
            .map(|entry| entry.value().clone())
            .collect();
        links.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        links
    }

    pub fn count_for(&self, owner: UserId) -> usize {
        self.links.iter().filter(|entry| entry.owner == owner).count()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new(MerchantPolicy::default())
    }
}
