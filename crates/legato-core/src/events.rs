//! The `Event` tagged unions delivered to stream subscribers (§6), one per
//! fan-out plane.

use chrono::{DateTime, Utc};

use crate::ids::{ChannelId, GuildId, InviteId, MessageId, RoleId, UserId};
use crate::model::{Action, Channel, Embed, Guild, GuildListEntry, Message};

/// Events published on the guild fan-out plane.
#[derive(Clone, Debug)]
pub enum GuildEvent {
    MessageSent(Message),
    MessageUpdated {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
        content: Option<String>,
        embeds: Option<Vec<Embed>>,
        actions: Option<Vec<Action>>,
        overrides: Option<Option<Vec<u8>>>,
        edited_at: DateTime<Utc>,
    },
    MessageDeleted {
        guild_id: GuildId,
        channel_id: ChannelId,
        message_id: MessageId,
    },
    ChannelCreated(Channel),
    ChannelUpdated {
        channel: Channel,
        /// Set when this update changed the channel's position rather than
        /// its name or flags.
        update_order: bool,
    },
    ChannelDeleted {
        guild_id: GuildId,
        channel_id: ChannelId,
    },
    GuildUpdated(Guild),
    /// Terminal event for a guild; subscribers should expect their stream to
    /// close shortly after receiving it.
    GuildDeleted {
        guild_id: GuildId,
    },
    MemberJoined {
        guild_id: GuildId,
        user_id: UserId,
    },
    MemberLeft {
        guild_id: GuildId,
        user_id: UserId,
    },
    RoleMoved {
        role_id: RoleId,
        position: String,
    },
}

/// Events published on the per-user action plane: actions the user
/// themselves triggered (e.g. via a message action button), delivered back to
/// all of that user's live streams regardless of guild.
#[derive(Clone, Debug)]
pub struct ActionEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub action_id: String,
    pub triggered_by: UserId,
}

/// Events published on the per-homeserver-user plane: account-level changes
/// not scoped to any single guild.
#[derive(Clone, Debug)]
pub enum HomeserverEvent {
    GuildAddedToList(GuildListEntry),
    GuildRemovedFromList {
        user_id: UserId,
        guild_id: GuildId,
        host: Option<String>,
    },
    InviteRejected {
        invite_id: InviteId,
    },
}
