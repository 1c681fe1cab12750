//! Service handlers (C5): the business logic each RPC method runs once the
//! request pipeline has authenticated the caller, resolved its location, and
//! checked its permission. Handlers never touch the pipeline directly — the
//! transport layer calls `Pipeline::dispatch_unary` with a closure that
//! calls into one of these.

mod channels;
mod emotes;
mod guilds;
mod invites;
mod messages;
mod profile;
mod roles;
mod streams;

pub use channels::{CreateChannelRequest, UpdateChannelOrderRequest};
pub use emotes::CreateEmotePackRequest;
pub use guilds::{CreateGuildRequest, CreatedGuild};
pub use invites::{CreateInviteRequest, JoinGuildRequest};
pub use messages::{SendMessageRequest, UpdateMessageRequest};
pub use profile::StatusUpdateRequest;
pub use roles::{CreateRoleRequest, MoveRoleRequest, PermissionScope, SetPermissionsRequest};
pub use streams::{StreamEventsOut, StreamSession, SubscribeRequest};

use std::sync::Arc;

use crate::repo::StorageRepo;
use crate::snowflake::Snowflake;
use crate::subscriptions::SubscriptionManager;

/// Shared handle every service handler closes over. Cheap to clone: the
/// repository is behind an `Arc` and the subscription manager is itself a
/// cluster of `Arc`-backed planes.
pub struct CoreService<R: StorageRepo> {
    pub repo: Arc<R>,
    pub subs: SubscriptionManager,
    /// Allocates ids for entities a handler creates that the request itself
    /// doesn't name, such as a guild's default channel.
    pub ids: Arc<Snowflake>,
}

impl<R: StorageRepo> Clone for CoreService<R> {
    fn clone(&self) -> Self {
        Self { repo: self.repo.clone(), subs: self.subs.clone(), ids: self.ids.clone() }
    }
}

impl<R: StorageRepo> CoreService<R> {
    pub fn new(repo: Arc<R>, subs: SubscriptionManager, ids: Arc<Snowflake>) -> Self {
        Self { repo, subs, ids }
    }
}
