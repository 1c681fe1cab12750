use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::ids::{ChannelId, EmotePackId, GuildId, InviteId, MessageId, RoleId, UserId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    Online,
    Streaming,
    DoNotDisturb,
    Idle,
    Offline,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub avatar_url: Option<String>,
    pub status: UserStatus,
    pub is_local: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub owner_id: UserId,
    pub name: String,
    pub picture_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub is_category: bool,
    pub is_voice: bool,
    /// 0 means "none"; head of the order has prev_id == 0.
    pub prev_id: u64,
    /// 0 means "none"; tail of the order has next_id == 0.
    pub next_id: u64,
}

impl Channel {
    pub fn is_head(&self) -> bool {
        self.prev_id == 0
    }

    pub fn is_tail(&self) -> bool {
        self.next_id == 0
    }
}

/// Opaque, per-application action embedded in a message (e.g. a button the
/// client renders); the core only stores and forwards these, it never
/// interprets them.
pub type Action = Json;
pub type Embed = Json;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub attachments: Vec<String>,
    pub embeds: Vec<Embed>,
    pub actions: Vec<Action>,
    /// Opaque binary protocol-buffer payload; the core never decodes it.
    pub overrides: Option<Vec<u8>>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub reply_to_id: Option<MessageId>,
}

/// Which subset of a message a caller wants to mutate. At least one flag
/// must be set for `UpdateMessage` to be a valid request.
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageUpdateMask {
    pub update_content: bool,
    pub update_embeds: bool,
    pub update_actions: bool,
    pub update_overrides: bool,
}

impl MessageUpdateMask {
    pub fn is_empty(&self) -> bool {
        !(self.update_content || self.update_embeds || self.update_actions || self.update_overrides)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MessageUpdate {
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
    pub actions: Option<Vec<Action>>,
    pub overrides: Option<Option<Vec<u8>>>,
    pub mask: MessageUpdateMask,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Invite {
    pub id: InviteId,
    pub guild_id: GuildId,
    /// -1 means unlimited.
    pub possible_uses: i32,
    pub use_count: i32,
}

impl Invite {
    pub fn is_exhausted(&self) -> bool {
        self.possible_uses >= 0 && self.use_count >= self.possible_uses
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Role {
    pub guild_id: GuildId,
    pub id: RoleId,
    pub name: String,
    pub color: i32,
    pub hoist: bool,
    pub pingable: bool,
    /// Fractional sort key; new positions are inserted without renumbering siblings.
    pub position: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeEffect {
    Allow,
    Deny,
}

/// One entry in an ordered permission list for a (guild, channel?, role).
/// The first entry whose `path` matches the requested node wins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionNode {
    pub path: String,
    pub effect: NodeEffect,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmotePack {
    pub id: EmotePackId,
    pub owner_user_id: UserId,
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Emote {
    pub pack_id: EmotePackId,
    pub image_id: String,
    pub name: String,
}

/// A per-user entry tracking a guild, local or foreign, the user wants to see
/// in their guild list.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuildListEntry {
    pub user_id: UserId,
    pub guild_id: GuildId,
    /// `None` means this homeserver; `Some(host)` names a foreign homeserver.
    pub host: Option<String>,
}
