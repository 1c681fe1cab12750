//! Ordered interceptor chain for unary RPCs, and the shorter chain for
//! stream-opening RPCs (C4).
//!
//! The chain is fixed and applied the same way to every method: rate
//! limiting, request validation, authentication, location resolution,
//! permission check, handler dispatch under panic recovery, then metrics and
//! logging on the way back out. Interceptors run in this order for every
//! unary call; nothing opts out of a step short of the policy registry
//! saying that step doesn't apply (e.g. `auth: false`). Rate limiting runs
//! before authentication on purpose: an auth-required method still has to
//! burn an invalid caller's burst before rejecting it, or the rate limit
//! gives no protection against token-guessing traffic.

use std::future::Future;
use std::time::Instant;

use crate::errors::{CoreError, CoreResult};
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::identity::Identity;
use crate::perms::{PermissionEngine, PermissionSource};
use crate::policy::{LocationRequirement, PolicyRegistry, RpcConfig};
use crate::ratelimit::{CallerKey, RateLimiter};

/// Raw location identifiers taken off the wire request, before resolution.
#[derive(Clone, Debug, Default)]
pub struct LocationInputs {
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub message_id: Option<MessageId>,
}

/// A location resolved and validated against storage: every id the policy
/// required was confirmed to exist and, where applicable, to nest correctly
/// (channel belongs to guild, message belongs to channel).
#[derive(Clone, Debug, Default)]
pub struct ResolvedLocation {
    pub guild_id: Option<GuildId>,
    pub channel_id: Option<ChannelId>,
    pub message_id: Option<MessageId>,
    pub message_author_id: Option<UserId>,
}

/// Confirms a `LocationInputs` exists and resolves any fields the policy
/// requires but the request omitted context for (e.g. a message's author).
/// Implemented by the storage repository.
#[async_trait::async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, inputs: &LocationInputs, required: LocationRequirement) -> CoreResult<ResolvedLocation>;

    /// Whether `user` is a member of `guild`. Only consulted when the policy
    /// sets `LocationRequirement::JOINED`.
    async fn is_member(&self, guild: GuildId, user: UserId) -> CoreResult<bool>;
}

/// Everything a handler needs: who's calling, what they're calling, and what
/// entities the pipeline already confirmed exist.
#[derive(Clone, Debug)]
pub struct RequestContext {
    pub method: &'static str,
    pub identity: Identity,
    pub location: ResolvedLocation,
}

/// Optional self-validation a request message can expose. Types that have
/// nothing to check beyond what location resolution and permission already
/// cover can rely on the default `Ok(())` — this mirrors the source's
/// type-assertion check for a `Validate() error` method, made explicit as a
/// trait with a no-op default instead of a runtime capability test.
pub trait Validate {
    fn validate(&self) -> CoreResult<()> {
        Ok(())
    }
}

impl Validate for () {}

/// The fixed set of collaborators the pipeline consults on every call. Built
/// once at server construction next to the `PolicyRegistry` it wraps.
pub struct Pipeline {
    policy: PolicyRegistry,
    rate_limiter: RateLimiter,
    perm_engine: PermissionEngine,
    metrics: legato_metrics::RpcMetrics,
}

impl Pipeline {
    pub fn new(policy: PolicyRegistry, metrics_namespace: &'static str) -> Self {
        Self {
            policy,
            rate_limiter: RateLimiter::new(),
            perm_engine: PermissionEngine::new(),
            metrics: legato_metrics::RpcMetrics::new(metrics_namespace),
        }
    }

    /// Runs the full unary interceptor chain and, if every step passes,
    /// dispatches to `handler`. Any interceptor failing short-circuits the
    /// chain with the relevant `CoreError` and the handler never runs.
    pub async fn dispatch_unary<Req, F, Fut, Resp>(
        &self,
        method: &'static str,
        identity: Option<Identity>,
        caller_addr: &str,
        req: &Req,
        location_inputs: LocationInputs,
        perm_source: &dyn PermissionSource,
        location_resolver: &dyn LocationResolver,
        handler: F,
    ) -> CoreResult<Resp>
    where
        Req: Validate + Sync,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<Resp>> + Send + 'static,
        Resp: Send + 'static,
    {
        let start = Instant::now();
        let cfg = self.policy.resolve(method).clone();

        let outcome = self
            .run_chain(method, identity, caller_addr, req, location_inputs, &cfg, perm_source, location_resolver, handler)
            .await;

        self.metrics.rpc_seconds(method, start.elapsed().as_secs_f64());
        self.metrics.rpc_total(method, if outcome.is_ok() { "ok" } else { "error" });
        if matches!(outcome, Err(CoreError::ResourceExhausted(_))) {
            self.metrics.rate_limited(method);
        }
        if matches!(outcome, Err(CoreError::PermissionDenied(_))) {
            self.metrics.perm_denied(method);
        }
        if let Err(err) = &outcome {
            tracing::warn!(method, error = %err, "rpc failed");
        } else {
            tracing::debug!(method, elapsed_ms = start.elapsed().as_millis() as u64, "rpc ok");
        }
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_chain<Req, F, Fut, Resp>(
        &self,
        method: &'static str,
        identity: Option<Identity>,
        caller_addr: &str,
        req: &Req,
        location_inputs: LocationInputs,
        cfg: &RpcConfig,
        perm_source: &dyn PermissionSource,
        location_resolver: &dyn LocationResolver,
        handler: F,
    ) -> CoreResult<Resp>
    where
        Req: Validate + Sync,
        F: FnOnce(RequestContext) -> Fut + Send + 'static,
        Fut: Future<Output = CoreResult<Resp>> + Send + 'static,
        Resp: Send + 'static,
    {
        // Rate limit: keyed off whatever identity the caller presented, even
        // an unauthenticated one, so invalid-token probing against an
        // auth-required method still burns its burst before being rejected.
        if let Some(limit) = cfg.rate_limit {
            let key = match &identity {
                Some(Identity::Local(uid)) => CallerKey::User(uid.raw()),
                Some(Identity::Foreign { handle, .. }) => CallerKey::Addr(handle.clone()),
                None => CallerKey::Addr(caller_addr.to_string()),
            };
            if !self.rate_limiter.try_acquire(method, key, limit) {
                return Err(CoreError::ResourceExhausted("rate limit exceeded"));
            }
        }

        // Request validation.
        req.validate()?;

        // Authentication.
        if cfg.auth && identity.is_none() {
            return Err(CoreError::Unauthenticated);
        }
        let identity = identity.unwrap_or(Identity::Foreign {
            handle: caller_addr.to_string(),
            host: String::new(),
        });

        // Federation boundary: some RPCs never accept a foreign caller.
        if cfg.local_only && !identity.is_local() {
            return Err(CoreError::PermissionDenied("local_only"));
        }

        // Location resolution: confirm every id the policy names actually
        // exists, and nests correctly, before the handler sees it.
        let location = location_resolver.resolve(&location_inputs, cfg.location_required).await?;

        if cfg.location_required.contains(LocationRequirement::JOINED) {
            let guild_id = location.guild_id.ok_or_else(|| CoreError::invalid("guild_id required"))?;
            if let Some(user_id) = identity.local_user_id() {
                if !location_resolver.is_member(guild_id, user_id).await? {
                    return Err(CoreError::FailedPrecondition("not a member of this guild"));
                }
            }
        }

        if cfg.location_required.contains(LocationRequirement::AUTHOR) {
            let user_id = identity.local_user_id();
            if location.message_author_id != user_id {
                return Err(CoreError::PermissionDenied("not the message author"));
            }
        }

        // Permission check.
        if cfg.permission != crate::perms::PermissionRequirement::None {
            let guild_id = location.guild_id.ok_or_else(|| CoreError::invalid("guild_id required"))?;
            let user_id = identity
                .local_user_id()
                .ok_or(CoreError::PermissionDenied("foreign callers cannot hold permissions"))?;
            let allowed = self
                .perm_engine
                .check(perm_source, guild_id, location.channel_id, user_id, cfg.permission)
                .await?;
            if !allowed {
                return Err(CoreError::PermissionDenied("missing required permission"));
            }
        }

        let ctx = RequestContext { method, identity, location };

        // Panic recovery: run the handler on its own task so a panic inside
        // it surfaces as an `Internal` error instead of taking the whole
        // connection (or process, for a single-threaded runtime) down.
        run_with_panic_recovery(handler(ctx)).await
    }
}

/// Runs the handler on its own task so a panic inside it surfaces as an
/// `Internal` error — recovered via `JoinHandle`, the same mechanism tokio
/// itself uses to isolate a panicking task from the rest of the runtime —
/// rather than propagating into the caller's task.
async fn run_with_panic_recovery<Fut, Resp>(fut: Fut) -> CoreResult<Resp>
where
    Fut: Future<Output = CoreResult<Resp>> + Send + 'static,
    Resp: Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(result) => result,
        Err(join_err) => Err(CoreError::internal(anyhow::anyhow!("handler panicked: {join_err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NodeEffect, PermissionNode};
    use crate::perms::PermissionRequirement;
    use std::time::Duration;

    struct AllowAllPerms;

    #[async_trait::async_trait]
    impl PermissionSource for AllowAllPerms {
        async fn is_owner(&self, _guild: GuildId, _user: UserId) -> CoreResult<bool> {
            Ok(true)
        }
        async fn roles_for_user(&self, _guild: GuildId, _user: UserId) -> CoreResult<Vec<crate::ids::RoleId>> {
            Ok(vec![])
        }
        async fn channel_permissions(
            &self,
            _guild: GuildId,
            _channel: ChannelId,
            _role: crate::ids::RoleId,
        ) -> CoreResult<Option<Vec<PermissionNode>>> {
            Ok(None)
        }
        async fn guild_permissions(&self, _guild: GuildId, _role: crate::ids::RoleId) -> CoreResult<Vec<PermissionNode>> {
            Ok(vec![])
        }
    }

    struct StubLocation;

    #[async_trait::async_trait]
    impl LocationResolver for StubLocation {
        async fn resolve(&self, inputs: &LocationInputs, _required: LocationRequirement) -> CoreResult<ResolvedLocation> {
            Ok(ResolvedLocation {
                guild_id: inputs.guild_id,
                channel_id: inputs.channel_id,
                message_id: inputs.message_id,
                message_author_id: None,
            })
        }
        async fn is_member(&self, _guild: GuildId, _user: UserId) -> CoreResult<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn unauthenticated_call_to_auth_required_method_is_rejected() {
        let policy = crate::policy::PolicyRegistry::builder()
            .register("m", crate::policy::RpcConfig::builder().auth_required().build())
            .build();
        let pipeline = Pipeline::new(policy, "test");
        let perms = AllowAllPerms;
        let loc = StubLocation;

        let result = pipeline
            .dispatch_unary("m", None, "1.2.3.4", &(), LocationInputs::default(), &perms, &loc, |_ctx| async { Ok(()) })
            .await;

        assert!(matches!(result, Err(CoreError::Unauthenticated)));
    }

    #[tokio::test]
    async fn rate_limited_method_rejects_after_burst_exhausted() {
        let policy = crate::policy::PolicyRegistry::builder()
            .register("m", crate::policy::RpcConfig::builder().rate_limit(Duration::from_secs(60), 1).build())
            .build();
        let pipeline = Pipeline::new(policy, "test");
        let perms = AllowAllPerms;
        let loc = StubLocation;
        let identity = || Some(Identity::Local(UserId::from_raw(1)));

        let first = pipeline
            .dispatch_unary("m", identity(), "addr", &(), LocationInputs::default(), &perms, &loc, |_| async { Ok(()) })
            .await;
        assert!(first.is_ok());

        let second = pipeline
            .dispatch_unary("m", identity(), "addr", &(), LocationInputs::default(), &perms, &loc, |_| async { Ok(()) })
            .await;
        assert!(matches!(second, Err(CoreError::ResourceExhausted(_))));
    }

    #[tokio::test]
    async fn handler_panic_is_recovered_as_internal_error() {
        let policy = crate::policy::PolicyRegistry::builder().build();
        let pipeline = Pipeline::new(policy, "test");
        let perms = AllowAllPerms;
        let loc = StubLocation;

        let result: CoreResult<()> = pipeline
            .dispatch_unary("m", None, "addr", &(), LocationInputs::default(), &perms, &loc, |_ctx| async {
                panic!("boom")
            })
            .await;

        assert!(matches!(result, Err(CoreError::Internal(_))));
    }

    #[tokio::test]
    async fn missing_permission_is_denied() {
        struct DenyAll;
        #[async_trait::async_trait]
        impl PermissionSource for DenyAll {
            async fn is_owner(&self, _g: GuildId, _u: UserId) -> CoreResult<bool> {
                Ok(false)
            }
            async fn roles_for_user(&self, _g: GuildId, _u: UserId) -> CoreResult<Vec<crate::ids::RoleId>> {
                Ok(vec![])
            }
            async fn channel_permissions(
                &self,
                _g: GuildId,
                _c: ChannelId,
                _r: crate::ids::RoleId,
            ) -> CoreResult<Option<Vec<PermissionNode>>> {
                Ok(None)
            }
            async fn guild_permissions(&self, _g: GuildId, _r: crate::ids::RoleId) -> CoreResult<Vec<PermissionNode>> {
                Ok(vec![PermissionNode { path: "messages.send".into(), effect: NodeEffect::Deny }])
            }
        }

        let policy = crate::policy::PolicyRegistry::builder()
            .register(
                "m",
                crate::policy::RpcConfig::builder().permission(PermissionRequirement::Node("messages.send")).build(),
            )
            .build();
        let pipeline = Pipeline::new(policy, "test");
        let perms = DenyAll;
        let loc = StubLocation;

        let mut inputs = LocationInputs::default();
        inputs.guild_id = Some(GuildId::from_raw(1));

        let result = pipeline
            .dispatch_unary(
                "m",
                Some(Identity::Local(UserId::from_raw(1))),
                "addr",
                &(),
                inputs,
                &perms,
                &loc,
                |_ctx| async { Ok(()) },
            )
            .await;

        assert!(matches!(result, Err(CoreError::PermissionDenied(_))));
    }
}
