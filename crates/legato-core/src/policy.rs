//! Process-wide RPC policy registry (C1).
//!
//! Registration is declarative and immutable after startup: a
//! `PolicyRegistry` is built once via [`PolicyRegistryBuilder`] at server
//! construction time and handed to the request pipeline as a plain value.
//! There is deliberately no ambient/global table and no `init()`-style
//! self-registration; ordering hazards that style invites are the reason.

use std::collections::HashMap;
use std::time::Duration;

use bitflags::bitflags;

use crate::perms::PermissionRequirement;

bitflags! {
    /// Which fields of a request's Location must be present and resolve to
    /// existing entities before the handler runs.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct LocationRequirement: u8 {
        const GUILD   = 0b0000_0001;
        const CHANNEL = 0b0000_0010;
        const MESSAGE = 0b0000_0100;
        /// Caller must own the referenced message.
        const AUTHOR  = 0b0000_1000;
        /// Caller must be a member of the referenced guild.
        const JOINED  = 0b0001_0000;
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimit {
    pub duration: Duration,
    pub burst: u32,
}

/// Declarative cross-cutting policy for a single RPC method.
#[derive(Clone, Debug)]
pub struct RpcConfig {
    pub rate_limit: Option<RateLimit>,
    pub auth: bool,
    pub location_required: LocationRequirement,
    pub permission: PermissionRequirement,
    pub local_only: bool,
}

impl Default for RpcConfig {
    /// An unregistered method inherits these defaults: no rate limit, no
    /// auth, no location resolution, no permission check.
    fn default() -> Self {
        Self {
            rate_limit: None,
            auth: false,
            location_required: LocationRequirement::empty(),
            permission: PermissionRequirement::None,
            local_only: false,
        }
    }
}

impl RpcConfig {
    pub fn builder() -> RpcConfigBuilder {
        RpcConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct RpcConfigBuilder {
    cfg: RpcConfig,
}

impl RpcConfigBuilder {
    pub fn rate_limit(mut self, duration: Duration, burst: u32) -> Self {
        self.cfg.rate_limit = Some(RateLimit { duration, burst });
        self
    }

    pub fn auth_required(mut self) -> Self {
        self.cfg.auth = true;
        self
    }

    pub fn requires(mut self, bits: LocationRequirement) -> Self {
        self.cfg.location_required |= bits;
        self
    }

    pub fn permission(mut self, req: PermissionRequirement) -> Self {
        self.cfg.permission = req;
        self
    }

    pub fn local_only(mut self) -> Self {
        self.cfg.local_only = true;
        self
    }

    pub fn build(self) -> RpcConfig {
        self.cfg
    }
}

/// Immutable process-wide method -> policy mapping.
#[derive(Clone, Debug)]
pub struct PolicyRegistry {
    methods: HashMap<&'static str, RpcConfig>,
    default: RpcConfig,
}

impl PolicyRegistry {
    pub fn builder() -> PolicyRegistryBuilder {
        PolicyRegistryBuilder::default()
    }

    /// Looks up policy for `method`; unregistered methods get the default.
    pub fn resolve(&self, method: &str) -> &RpcConfig {
        self.methods.get(method).unwrap_or(&self.default)
    }
}

#[derive(Default)]
pub struct PolicyRegistryBuilder {
    methods: HashMap<&'static str, RpcConfig>,
}

impl PolicyRegistryBuilder {
    pub fn register(mut self, method: &'static str, cfg: RpcConfig) -> Self {
        self.methods.insert(method, cfg);
        self
    }

    pub fn build(self) -> PolicyRegistry {
        PolicyRegistry {
            methods: self.methods,
            default: RpcConfig::default(),
        }
    }
}

/// Declarative registration for the methods this server exposes, built once
/// at startup and handed immutably to the pipeline. This replaces the
/// source's module-load-time self-registration.
pub fn default_registry() -> PolicyRegistry {
    use LocationRequirement as Loc;
    use PermissionRequirement as Perm;

    PolicyRegistry::builder()
        .register(
            "core.v1.CreateGuild",
            RpcConfig::builder()
                .auth_required()
                .rate_limit(Duration::from_secs(60), 5)
                .build(),
        )
        .register(
            "core.v1.DeleteGuild",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD)
                .permission(Perm::Owner)
                .build(),
        )
        .register(
            "core.v1.CreateChannel",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::JOINED)
                .permission(Perm::Node("channels.manage"))
                .rate_limit(Duration::from_secs(10), 10)
                .build(),
        )
        .register(
            "core.v1.UpdateChannelOrder",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::CHANNEL | Loc::JOINED)
                .permission(Perm::Node("channels.manage"))
                .build(),
        )
        .register(
            "core.v1.SendMessage",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::CHANNEL | Loc::JOINED)
                .permission(Perm::Node("messages.send"))
                .rate_limit(Duration::from_secs(10), 20)
                .build(),
        )
        .register(
            "core.v1.UpdateMessage",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::CHANNEL | Loc::MESSAGE | Loc::AUTHOR)
                .permission(Perm::Node("messages.send"))
                .build(),
        )
        .register(
            "core.v1.JoinGuild",
            RpcConfig::builder()
                .auth_required()
                .rate_limit(Duration::from_secs(60), 10)
                .build(),
        )
        .register(
            "core.v1.LeaveGuild",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::JOINED)
                .build(),
        )
        .register(
            "core.v1.CreateRole",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::JOINED)
                .permission(Perm::Node("roles.manage"))
                .build(),
        )
        .register(
            "core.v1.SetPermissions",
            RpcConfig::builder()
                .auth_required()
                .requires(Loc::GUILD | Loc::JOINED)
                .permission(Perm::Node("roles.manage"))
                .build(),
        )
        .register(
            "core.v1.StreamEvents",
            RpcConfig::builder().auth_required().build(),
        )
        .register(
            "profile.v1.StatusUpdate",
            RpcConfig::builder()
                .auth_required()
                .rate_limit(Duration::from_secs(5), 5)
                .build(),
        )
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_method_gets_permissive_defaults() {
        let reg = default_registry();
        let cfg = reg.resolve("core.v1.GetGuild");
        assert!(!cfg.auth);
        assert!(cfg.rate_limit.is_none());
        assert_eq!(cfg.location_required, LocationRequirement::empty());
    }

    #[test]
    fn registered_method_carries_its_policy() {
        let reg = default_registry();
        let cfg = reg.resolve("core.v1.DeleteGuild");
        assert!(cfg.auth);
        assert!(cfg.location_required.contains(LocationRequirement::GUILD));
        assert_eq!(cfg.permission, PermissionRequirement::Owner);
    }
}
