//! Hierarchical role -> channel -> guild permission evaluation (C3).
//!
//! The engine is read-only: it resolves roles and walks stored permission
//! node lists, it never mutates them. Mutation happens in the service
//! handlers via the storage repository.

use async_trait::async_trait;

use crate::errors::CoreResult;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::model::{NodeEffect, PermissionNode};

/// What a policy entry demands of the Permission Engine for a given call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionRequirement {
    /// No check performed.
    None,
    /// Caller must be `guild.owner_id`.
    Owner,
    /// Caller must hold the named dotted permission node.
    Node(&'static str),
}

/// Read-only view over role and permission-node storage that the engine
/// evaluates against. Implemented by the storage repository.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn is_owner(&self, guild: GuildId, user: UserId) -> CoreResult<bool>;

    /// Roles held by `user` in `guild`, ordered by `Role::position` ascending.
    async fn roles_for_user(&self, guild: GuildId, user: UserId) -> CoreResult<Vec<RoleId>>;

    /// Permission nodes stored for `(guild, channel, role)`. Returns `None`
    /// when no channel-scoped override exists for this role so the caller
    /// can fall back to the guild-scoped list.
    async fn channel_permissions(
        &self,
        guild: GuildId,
        channel: ChannelId,
        role: RoleId,
    ) -> CoreResult<Option<Vec<PermissionNode>>>;

    async fn guild_permissions(&self, guild: GuildId, role: RoleId) -> CoreResult<Vec<PermissionNode>>;
}

pub struct PermissionEngine;

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PermissionEngine {
    pub fn new() -> Self {
        Self
    }

    /// Implements the §4.3 algorithm: owner short-circuit, then roles in
    /// position order, each evaluated against its channel-scoped nodes (if
    /// any) or else its guild-scoped nodes; deny if no role produces a match.
    pub async fn check(
        &self,
        source: &dyn PermissionSource,
        guild: GuildId,
        channel: Option<ChannelId>,
        user: UserId,
        requirement: PermissionRequirement,
    ) -> CoreResult<bool> {
        match requirement {
            PermissionRequirement::None => Ok(true),
            PermissionRequirement::Owner => source.is_owner(guild, user).await,
            PermissionRequirement::Node(node) => {
                if source.is_owner(guild, user).await? {
                    return Ok(true);
                }

                let roles = source.roles_for_user(guild, user).await?;
                for role in roles {
                    let nodes = match channel {
                        Some(channel) => match source.channel_permissions(guild, channel, role).await? {
                            Some(nodes) => nodes,
                            None => source.guild_permissions(guild, role).await?,
                        },
                        None => source.guild_permissions(guild, role).await?,
                    };

                    if let Some(effect) = first_match(&nodes, node) {
                        return Ok(effect == NodeEffect::Allow);
                    }
                }

                Ok(false)
            }
        }
    }
}

fn first_match(nodes: &[PermissionNode], requested: &str) -> Option<NodeEffect> {
    nodes
        .iter()
        .find(|n| node_matches(&n.path, requested))
        .map(|n| n.effect)
}

/// `pattern` may contain `*` segments that match exactly one dotted segment,
/// or a trailing `*` that matches any suffix (e.g. `messages.*` matches
/// `messages.send` and `messages.send.bulk`).
fn node_matches(pattern: &str, requested: &str) -> bool {
    let pattern_segs: Vec<&str> = pattern.split('.').collect();
    let requested_segs: Vec<&str> = requested.split('.').collect();

    for (i, seg) in pattern_segs.iter().enumerate() {
        if *seg == "*" && i == pattern_segs.len() - 1 {
            return true;
        }
        match requested_segs.get(i) {
            Some(rseg) if *seg == "*" || seg == rseg => continue,
            _ => return false,
        }
    }

    pattern_segs.len() == requested_segs.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match() {
        assert!(node_matches("messages.send", "messages.send"));
        assert!(!node_matches("messages.send", "messages.delete"));
    }

    #[test]
    fn single_segment_wildcard() {
        assert!(node_matches("messages.*", "messages.send"));
        assert!(node_matches("messages.*", "messages.delete"));
        assert!(!node_matches("messages.*", "channels.send"));
    }

    #[test]
    fn trailing_wildcard_matches_any_suffix_depth() {
        assert!(node_matches("messages.*", "messages.send.bulk"));
    }

    #[test]
    fn full_wildcard_matches_everything() {
        assert!(node_matches("*", "messages.send"));
        assert!(node_matches("*", "anything"));
    }
}
