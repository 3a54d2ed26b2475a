use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use ipnet::IpNet;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gatehouse_common::{AdmissionConfig, GatehouseError, RequestInfo};
use gatehouse_db_entities::{BlockRule, Visit};

use super::cache::{BlocklistCache, RuleKind};

/// Outcome of an admission check.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Admitted,
    Forbidden,
}

/// A blocklist rule to be created. Matchers are typed so an invalid
/// IP or network cannot reach the store.
#[derive(Clone, Debug)]
pub enum NewRule {
    Ip { address: IpAddr, reason: String },
    Network { network: IpNet, reason: String },
    Agent { substring: String, reason: String },
}

/// Rule and visit counts for the admin surface.
#[derive(Clone, Debug)]
pub struct AdmissionStatus {
    pub ip_rule_count: u64,
    pub network_rule_count: u64,
    pub agent_rule_count: u64,
    pub tracked_visit_count: u64,
}

/// Central service for request admission: blocklist checks, visit
/// accounting and rule management. Blocklist lookups are served from
/// an in-memory TTL cache and fail open when the store is unreachable.
pub struct AdmissionService {
    config: AdmissionConfig,
    db: Arc<Mutex<DatabaseConnection>>,
    cache: BlocklistCache,
}

impl AdmissionService {
    pub fn new(config: AdmissionConfig, db: Arc<Mutex<DatabaseConnection>>) -> Self {
        let cache = BlocklistCache::new(config.cache_ttl);
        Self { config, db, cache }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn trusts_forwarded_headers(&self) -> bool {
        self.config.trust_x_forwarded_headers
    }

    /// Decide whether a request may proceed. Never returns an error:
    /// when a blocklist cannot be loaded the corresponding check is
    /// skipped, and counter updates are advisory.
    pub async fn check(&self, request: &RequestInfo) -> Verdict {
        if !self.config.enabled {
            return Verdict::Admitted;
        }

        if let Ok(ip) = request.ip.parse::<IpAddr>() {
            if self.blocked_ips().await.contains(&ip) {
                info!(ip = %ip, path = %request.path, "Request rejected by IP blocklist");
                self.record_rule_hit(BlockRule::Column::IpAddress, &ip.to_string())
                    .await;
                return Verdict::Forbidden;
            }

            if let Some(network) = self
                .blocked_networks()
                .await
                .into_iter()
                .find(|network| network.contains(&ip))
            {
                info!(ip = %ip, network = %network, path = %request.path, "Request rejected by network blocklist");
                self.record_rule_hit(BlockRule::Column::Network, &network.to_string())
                    .await;
                return Verdict::Forbidden;
            }
        }

        if !request.user_agent.is_empty() {
            let agent = request.user_agent.to_lowercase();
            if let Some(pattern) = self
                .blocked_agents()
                .await
                .into_iter()
                .find(|pattern| agent.contains(&pattern.to_lowercase()))
            {
                info!(agent = %request.user_agent, path = %request.path, "Request rejected by user agent blocklist");
                self.record_rule_hit(BlockRule::Column::UserAgent, &pattern)
                    .await;
                return Verdict::Forbidden;
            }
        }

        Verdict::Admitted
    }

    /// Cached set of exactly blocked IPs; empty when the store is
    /// unreachable.
    pub async fn blocked_ips(&self) -> HashSet<IpAddr> {
        if let Some(ips) = self.cache.ips().await {
            return ips;
        }
        let ips = match self.load_ips().await {
            Ok(ips) => ips,
            Err(error) => {
                warn!(%error, "Failed to load IP blocklist, treating as empty");
                return HashSet::new();
            }
        };
        self.cache.set_ips(ips.clone()).await;
        ips
    }

    /// Cached list of blocked networks; empty when the store is
    /// unreachable.
    pub async fn blocked_networks(&self) -> Vec<IpNet> {
        if let Some(networks) = self.cache.networks().await {
            return networks;
        }
        let networks = match self.load_networks().await {
            Ok(networks) => networks,
            Err(error) => {
                warn!(%error, "Failed to load network blocklist, treating as empty");
                return Vec::new();
            }
        };
        self.cache.set_networks(networks.clone()).await;
        networks
    }

    /// Cached list of blocked user agent substrings, as stored; empty
    /// when the store is unreachable.
    pub async fn blocked_agents(&self) -> Vec<String> {
        if let Some(agents) = self.cache.agents().await {
            return agents;
        }
        let agents = match self.load_agents().await {
            Ok(agents) => agents,
            Err(error) => {
                warn!(%error, "Failed to load user agent blocklist, treating as empty");
                return Vec::new();
            }
        };
        self.cache.set_agents(agents.clone()).await;
        agents
    }

    async fn load_ips(&self) -> Result<HashSet<IpAddr>, GatehouseError> {
        let db = self.db.lock().await;
        let rules = BlockRule::Entity::find()
            .filter(BlockRule::Column::IpAddress.is_not_null())
            .all(&*db)
            .await?;

        let mut ips = HashSet::new();
        for rule in rules {
            let Some(value) = &rule.ip_address else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match value.parse::<IpAddr>() {
                Ok(ip) => {
                    ips.insert(ip);
                }
                Err(_) => warn!(rule = %rule.id, value = %value, "Skipping unparsable blocked IP"),
            }
        }
        debug!(count = ips.len(), "Loaded IP blocklist");
        Ok(ips)
    }

    async fn load_networks(&self) -> Result<Vec<IpNet>, GatehouseError> {
        let db = self.db.lock().await;
        let rules = BlockRule::Entity::find()
            .filter(BlockRule::Column::Network.is_not_null())
            .all(&*db)
            .await?;

        let mut networks = Vec::new();
        for rule in rules {
            let Some(value) = &rule.network else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            match value.parse::<IpNet>() {
                Ok(network) => networks.push(network),
                Err(_) => {
                    warn!(rule = %rule.id, value = %value, "Skipping unparsable blocked network")
                }
            }
        }
        debug!(count = networks.len(), "Loaded network blocklist");
        Ok(networks)
    }

    async fn load_agents(&self) -> Result<Vec<String>, GatehouseError> {
        let db = self.db.lock().await;
        let rules = BlockRule::Entity::find()
            .filter(BlockRule::Column::UserAgent.is_not_null())
            .all(&*db)
            .await?;

        let agents = rules
            .into_iter()
            .filter_map(|rule| rule.user_agent)
            .filter(|value| !value.is_empty())
            .collect::<Vec<_>>();
        debug!(count = agents.len(), "Loaded user agent blocklist");
        Ok(agents)
    }

    /// Count a visit against the `(ip, path)` record, creating it on
    /// first sight and freezing it at the configured ceiling. Never
    /// fails; recording is advisory.
    pub async fn record_visit(&self, request: &RequestInfo) {
        if request.ip.parse::<IpAddr>().is_err() {
            debug!(ip = %request.ip, "Skipping visit record for unparsable source address");
            return;
        }
        if let Err(error) = self.store_visit(request).await {
            warn!(%error, ip = %request.ip, path = %request.path, "Failed to record visit");
        }
    }

    async fn store_visit(&self, request: &RequestInfo) -> Result<(), GatehouseError> {
        let db = self.db.lock().await;
        let now = Utc::now();

        let existing = Visit::Entity::find()
            .filter(Visit::Column::IpAddress.eq(request.ip.as_str()))
            .filter(Visit::Column::Path.eq(request.path.as_str()))
            .one(&*db)
            .await?;

        match existing {
            None => {
                let record = Visit::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ip_address: Set(request.ip.clone()),
                    path: Set(request.path.clone()),
                    hits: Set(1),
                    user_agent: Set(request.user_agent.clone()),
                    first_seen_at: Set(now),
                    last_seen_at: Set(now),
                };
                record.insert(&*db).await?;
            }
            Some(visit) if visit.hits < self.config.max_visit_count => {
                let hits = visit.hits + 1;
                let mut record: Visit::ActiveModel = visit.into();
                record.hits = Set(hits);
                record.user_agent = Set(request.user_agent.clone());
                record.last_seen_at = Set(now);
                record.update(&*db).await?;
            }
            // Frozen at the ceiling: neither counter nor agent moves.
            Some(_) => {}
        }

        Ok(())
    }

    async fn record_rule_hit(&self, column: BlockRule::Column, value: &str) {
        if let Err(error) = self.bump_hit_count(column, value).await {
            warn!(%error, matcher = value, "Failed to record blocklist hit");
        }
    }

    async fn bump_hit_count(
        &self,
        column: BlockRule::Column,
        value: &str,
    ) -> Result<(), GatehouseError> {
        let db = self.db.lock().await;
        let Some(rule) = BlockRule::Entity::find()
            .filter(column.eq(value))
            .one(&*db)
            .await?
        else {
            return Ok(());
        };

        let hit_count = rule.hit_count + 1;
        let mut record: BlockRule::ActiveModel = rule.into();
        record.hit_count = Set(hit_count);
        record.update(&*db).await?;
        Ok(())
    }

    /// Create a blocklist rule and invalidate the cache slice it
    /// belongs to, so the next check sees it.
    pub async fn add_rule(&self, rule: NewRule) -> Result<BlockRule::Model, GatehouseError> {
        let now = Utc::now();
        let (kind, record) = match rule {
            NewRule::Ip { address, reason } => (
                RuleKind::Ip,
                BlockRule::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ip_address: Set(Some(address.to_string())),
                    network: Set(None),
                    user_agent: Set(None),
                    reason: Set(reason),
                    hit_count: Set(0),
                    created_at: Set(now),
                },
            ),
            NewRule::Network { network, reason } => (
                RuleKind::Network,
                BlockRule::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    ip_address: Set(None),
                    network: Set(Some(network.to_string())),
                    user_agent: Set(None),
                    reason: Set(reason),
                    hit_count: Set(0),
                    created_at: Set(now),
                },
            ),
            NewRule::Agent { substring, reason } => {
                if substring.trim().is_empty() {
                    return Err(GatehouseError::EmptyAgentMatcher);
                }
                (
                    RuleKind::Agent,
                    BlockRule::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        ip_address: Set(None),
                        network: Set(None),
                        user_agent: Set(Some(substring)),
                        reason: Set(reason),
                        hit_count: Set(0),
                        created_at: Set(now),
                    },
                )
            }
        };

        let model = {
            let db = self.db.lock().await;
            record.insert(&*db).await?
        };
        self.cache.invalidate(kind).await;

        info!(rule = %model.id, ?kind, reason = %model.reason, "Added block rule");
        Ok(model)
    }

    /// Delete a blocklist rule and invalidate its cache slice.
    /// Matchers are immutable after creation; replacing one is a
    /// remove followed by an add, so these two hooks cover every
    /// change that can affect a cached slice.
    pub async fn remove_rule(&self, id: Uuid) -> Result<(), GatehouseError> {
        let kind = {
            let db = self.db.lock().await;
            let Some(rule) = BlockRule::Entity::find_by_id(id).one(&*db).await? else {
                return Err(GatehouseError::RuleNotFound(id));
            };
            let kind = rule_kind(&rule);
            BlockRule::Entity::delete_by_id(id).exec(&*db).await?;
            kind
        };

        if let Some(kind) = kind {
            self.cache.invalidate(kind).await;
        }
        info!(rule = %id, "Removed block rule");
        Ok(())
    }

    pub async fn list_rules(&self) -> Result<Vec<BlockRule::Model>, GatehouseError> {
        let db = self.db.lock().await;
        Ok(BlockRule::Entity::find().all(&*db).await?)
    }

    pub async fn status(&self) -> Result<AdmissionStatus, GatehouseError> {
        let db = self.db.lock().await;

        let ip_rule_count = BlockRule::Entity::find()
            .filter(BlockRule::Column::IpAddress.is_not_null())
            .count(&*db)
            .await?;
        let network_rule_count = BlockRule::Entity::find()
            .filter(BlockRule::Column::Network.is_not_null())
            .count(&*db)
            .await?;
        let agent_rule_count = BlockRule::Entity::find()
            .filter(BlockRule::Column::UserAgent.is_not_null())
            .count(&*db)
            .await?;
        let tracked_visit_count = Visit::Entity::find().count(&*db).await?;

        Ok(AdmissionStatus {
            ip_rule_count,
            network_rule_count,
            agent_rule_count,
            tracked_visit_count,
        })
    }
}

fn rule_kind(rule: &BlockRule::Model) -> Option<RuleKind> {
    if rule.ip_address.is_some() {
        Some(RuleKind::Ip)
    } else if rule.network.is_some() {
        Some(RuleKind::Network)
    } else if rule.user_agent.is_some() {
        Some(RuleKind::Agent)
    } else {
        None
    }
}
