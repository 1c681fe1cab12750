//! Storage Interface (C6): the repository contract every service handler
//! goes through, and a concrete Postgres implementation via `sqlx`.
//!
//! Every method takes an open transaction rather than owning one itself —
//! handlers that need several writes to commit atomically (e.g. incrementing
//! an invite's use count and inserting the resulting membership row) borrow
//! the same `Transaction` across multiple repo calls.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::errors::CoreResult;
use crate::ids::{ChannelId, EmotePackId, GuildId, InviteId, MessageId, RoleId, UserId};
use crate::model::{
    Channel, Emote, EmotePack, Guild, GuildListEntry, Invite, Message, MessageUpdate,
    NodeEffect, PermissionNode, Role, User, UserStatus,
};

#[async_trait]
pub trait StorageRepo: Send + Sync {
    async fn begin(&self) -> CoreResult<Transaction<'_, Postgres>>;

    // Guilds
    async fn create_guild(&self, tx: &mut Transaction<'_, Postgres>, guild: &Guild) -> CoreResult<()>;
    async fn get_guild(&self, tx: &mut Transaction<'_, Postgres>, id: GuildId) -> CoreResult<Option<Guild>>;
    async fn update_guild(&self, tx: &mut Transaction<'_, Postgres>, guild: &Guild) -> CoreResult<()>;
    async fn delete_guild(&self, tx: &mut Transaction<'_, Postgres>, id: GuildId) -> CoreResult<()>;

    // Channels
    async fn create_channel(&self, tx: &mut Transaction<'_, Postgres>, channel: &Channel) -> CoreResult<()>;
    async fn get_channel(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, id: ChannelId) -> CoreResult<Option<Channel>>;
    async fn list_channels(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId) -> CoreResult<Vec<Channel>>;
    /// Rewrites the `prev_id`/`next_id` links for a channel splice; callers
    /// are responsible for computing a consistent set of link updates before
    /// calling this (see the channel ordering handler).
    async fn relink_channel(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        id: ChannelId,
        prev_id: u64,
        next_id: u64,
    ) -> CoreResult<()>;
    async fn delete_channel(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, id: ChannelId) -> CoreResult<()>;

    // Membership
    async fn add_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<()>;
    async fn remove_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<()>;
    async fn is_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<bool>;

    // Messages
    async fn insert_message(&self, tx: &mut Transaction<'_, Postgres>, msg: &Message) -> CoreResult<()>;
    async fn get_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        id: MessageId,
    ) -> CoreResult<Option<Message>>;
    async fn update_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        id: MessageId,
        update: &MessageUpdate,
    ) -> CoreResult<()>;
    async fn delete_message(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, channel: ChannelId, id: MessageId) -> CoreResult<()>;
    async fn list_messages_before(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: i64,
    ) -> CoreResult<Vec<Message>>;

    // Invites
    async fn create_invite(&self, tx: &mut Transaction<'_, Postgres>, invite: &Invite) -> CoreResult<()>;
    async fn get_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<Option<Invite>>;
    /// Atomically increments the invite's use count iff it isn't already
    /// exhausted; returns whether the increment happened. The `WHERE`
    /// clause does the exhaustion check so two concurrent joins on a
    /// single-use invite can't both succeed.
    async fn try_consume_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<bool>;
    async fn delete_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<()>;

    // Roles
    async fn create_role(&self, tx: &mut Transaction<'_, Postgres>, role: &Role) -> CoreResult<()>;
    async fn list_roles(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId) -> CoreResult<Vec<Role>>;
    async fn move_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, role: RoleId, new_position: &str) -> CoreResult<()>;
    async fn assign_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId, role: RoleId) -> CoreResult<()>;
    async fn unassign_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId, role: RoleId) -> CoreResult<()>;

    // Permission nodes
    async fn set_guild_permission_node(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, role: RoleId, node: &PermissionNode) -> CoreResult<()>;
    async fn set_channel_permission_node(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        role: RoleId,
        node: &PermissionNode,
    ) -> CoreResult<()>;

    // Emote packs
    async fn create_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: &EmotePack) -> CoreResult<()>;
    async fn is_pack_owner(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<bool>;
    async fn add_emote(&self, tx: &mut Transaction<'_, Postgres>, emote: &Emote) -> CoreResult<()>;
    async fn delete_emote_from_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, image_id: &str) -> CoreResult<()>;
    async fn delete_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId) -> CoreResult<()>;
    /// Packs `user` has acquired into their personal set, not packs they own.
    async fn list_emote_packs(&self, tx: &mut Transaction<'_, Postgres>, user: UserId) -> CoreResult<Vec<EmotePack>>;
    async fn list_pack_emotes(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId) -> CoreResult<Vec<Emote>>;
    async fn acquire_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<()>;
    async fn dequip_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<()>;

    // Profile & guild list
    async fn get_user(&self, tx: &mut Transaction<'_, Postgres>, id: UserId) -> CoreResult<Option<User>>;
    async fn update_user_status(&self, tx: &mut Transaction<'_, Postgres>, user: UserId, status: UserStatus) -> CoreResult<()>;
    async fn add_guild_list_entry(&self, tx: &mut Transaction<'_, Postgres>, entry: &GuildListEntry) -> CoreResult<()>;
    async fn remove_guild_list_entry(&self, tx: &mut Transaction<'_, Postgres>, user: UserId, guild: GuildId, host: Option<&str>) -> CoreResult<()>;
    async fn list_guild_list(&self, tx: &mut Transaction<'_, Postgres>, user: UserId) -> CoreResult<Vec<GuildListEntry>>;
}

#[derive(Clone)]
pub struct PgStorageRepo {
    pool: PgPool,
}

impl PgStorageRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn effect_str(effect: NodeEffect) -> &'static str {
    match effect {
        NodeEffect::Allow => "allow",
        NodeEffect::Deny => "deny",
    }
}

fn effect_from_str(s: &str) -> NodeEffect {
    match s {
        "allow" => NodeEffect::Allow,
        _ => NodeEffect::Deny,
    }
}

fn status_str(status: UserStatus) -> &'static str {
    match status {
        UserStatus::Online => "online",
        UserStatus::Streaming => "streaming",
        UserStatus::DoNotDisturb => "dnd",
        UserStatus::Idle => "idle",
        UserStatus::Offline => "offline",
    }
}

fn status_from_str(s: &str) -> UserStatus {
    match s {
        "online" => UserStatus::Online,
        "streaming" => UserStatus::Streaming,
        "dnd" => UserStatus::DoNotDisturb,
        "idle" => UserStatus::Idle,
        _ => UserStatus::Offline,
    }
}

#[async_trait]
impl StorageRepo for PgStorageRepo {
    async fn begin(&self) -> CoreResult<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    // -------------------------
    // Guilds
    // -------------------------

    async fn create_guild(&self, tx: &mut Transaction<'_, Postgres>, guild: &Guild) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO guilds (id, owner_id, name, picture_url)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(guild.id.raw() as i64)
        .bind(guild.owner_id.raw() as i64)
        .bind(&guild.name)
        .bind(&guild.picture_url)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_guild(&self, tx: &mut Transaction<'_, Postgres>, id: GuildId) -> CoreResult<Option<Guild>> {
        let row = sqlx::query(
            r#"SELECT id, owner_id, name, picture_url FROM guilds WHERE id = $1"#,
        )
        .bind(id.raw() as i64)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| Guild {
            id: GuildId::from_raw(r.get::<i64, _>("id") as u64),
            owner_id: UserId::from_raw(r.get::<i64, _>("owner_id") as u64),
            name: r.get("name"),
            picture_url: r.get("picture_url"),
        }))
    }

    async fn update_guild(&self, tx: &mut Transaction<'_, Postgres>, guild: &Guild) -> CoreResult<()> {
        sqlx::query(
            r#"UPDATE guilds SET owner_id = $2, name = $3, picture_url = $4 WHERE id = $1"#,
        )
        .bind(guild.id.raw() as i64)
        .bind(guild.owner_id.raw() as i64)
        .bind(&guild.name)
        .bind(&guild.picture_url)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn delete_guild(&self, tx: &mut Transaction<'_, Postgres>, id: GuildId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM guilds WHERE id = $1"#)
            .bind(id.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // -------------------------
    // Channels
    // -------------------------

    async fn create_channel(&self, tx: &mut Transaction<'_, Postgres>, channel: &Channel) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, guild_id, name, is_category, is_voice, prev_id, next_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(channel.id.raw() as i64)
        .bind(channel.guild_id.raw() as i64)
        .bind(&channel.name)
        .bind(channel.is_category)
        .bind(channel.is_voice)
        .bind(channel.prev_id as i64)
        .bind(channel.next_id as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_channel(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, id: ChannelId) -> CoreResult<Option<Channel>> {
        let row = sqlx::query(
            r#"
            SELECT id, guild_id, name, is_category, is_voice, prev_id, next_id
            FROM channels WHERE guild_id = $1 AND id = $2
            "#,
        )
        .bind(guild.raw() as i64)
        .bind(id.raw() as i64)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(row_to_channel))
    }

    async fn list_channels(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId) -> CoreResult<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, name, is_category, is_voice, prev_id, next_id
            FROM channels WHERE guild_id = $1
            "#,
        )
        .bind(guild.raw() as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(row_to_channel).collect())
    }

    async fn relink_channel(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        id: ChannelId,
        prev_id: u64,
        next_id: u64,
    ) -> CoreResult<()> {
        sqlx::query(r#"UPDATE channels SET prev_id = $3, next_id = $4 WHERE guild_id = $1 AND id = $2"#)
            .bind(guild.raw() as i64)
            .bind(id.raw() as i64)
            .bind(prev_id as i64)
            .bind(next_id as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn delete_channel(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, id: ChannelId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM channels WHERE guild_id = $1 AND id = $2"#)
            .bind(guild.raw() as i64)
            .bind(id.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // -------------------------
    // Membership
    // -------------------------

    async fn add_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO guild_members (guild_id, user_id, joined_at) VALUES ($1, $2, NOW())
               ON CONFLICT (guild_id, user_id) DO NOTHING"#,
        )
        .bind(guild.raw() as i64)
        .bind(user.raw() as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn remove_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM guild_members WHERE guild_id = $1 AND user_id = $2"#)
            .bind(guild.raw() as i64)
            .bind(user.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn is_member(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId) -> CoreResult<bool> {
        let row = sqlx::query(r#"SELECT 1 FROM guild_members WHERE guild_id = $1 AND user_id = $2"#)
            .bind(guild.raw() as i64)
            .bind(user.raw() as i64)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }

    // -------------------------
    // Messages
    // -------------------------

    async fn insert_message(&self, tx: &mut Transaction<'_, Postgres>, msg: &Message) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, guild_id, channel_id, author_id, content, attachments, embeds, actions, overrides, created_at, reply_to_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(msg.id.raw() as i64)
        .bind(msg.guild_id.raw() as i64)
        .bind(msg.channel_id.raw() as i64)
        .bind(msg.author_id.raw() as i64)
        .bind(&msg.content)
        .bind(&msg.attachments)
        .bind(sqlx::types::Json(&msg.embeds))
        .bind(sqlx::types::Json(&msg.actions))
        .bind(&msg.overrides)
        .bind(msg.created_at)
        .bind(msg.reply_to_id.map(|m| m.raw() as i64))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        id: MessageId,
    ) -> CoreResult<Option<Message>> {
        let row = sqlx::query(
            r#"
            SELECT id, guild_id, channel_id, author_id, content, attachments, embeds, actions,
                   overrides, created_at, edited_at, reply_to_id
            FROM messages WHERE guild_id = $1 AND channel_id = $2 AND id = $3
            "#,
        )
        .bind(guild.raw() as i64)
        .bind(channel.raw() as i64)
        .bind(id.raw() as i64)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(row_to_message))
    }

    async fn update_message(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        id: MessageId,
        update: &MessageUpdate,
    ) -> CoreResult<()> {
        if update.mask.update_content {
            sqlx::query(r#"UPDATE messages SET content = $4, edited_at = NOW() WHERE guild_id = $1 AND channel_id = $2 AND id = $3"#)
                .bind(guild.raw() as i64)
                .bind(channel.raw() as i64)
                .bind(id.raw() as i64)
                .bind(update.content.clone().unwrap_or_default())
                .execute(&mut **tx)
                .await?;
        }
        if update.mask.update_embeds {
            sqlx::query(r#"UPDATE messages SET embeds = $4, edited_at = NOW() WHERE guild_id = $1 AND channel_id = $2 AND id = $3"#)
                .bind(guild.raw() as i64)
                .bind(channel.raw() as i64)
                .bind(id.raw() as i64)
                .bind(sqlx::types::Json(update.embeds.clone().unwrap_or_default()))
                .execute(&mut **tx)
                .await?;
        }
        if update.mask.update_actions {
            sqlx::query(r#"UPDATE messages SET actions = $4, edited_at = NOW() WHERE guild_id = $1 AND channel_id = $2 AND id = $3"#)
                .bind(guild.raw() as i64)
                .bind(channel.raw() as i64)
                .bind(id.raw() as i64)
                .bind(sqlx::types::Json(update.actions.clone().unwrap_or_default()))
                .execute(&mut **tx)
                .await?;
        }
        if update.mask.update_overrides {
            sqlx::query(r#"UPDATE messages SET overrides = $4, edited_at = NOW() WHERE guild_id = $1 AND channel_id = $2 AND id = $3"#)
                .bind(guild.raw() as i64)
                .bind(channel.raw() as i64)
                .bind(id.raw() as i64)
                .bind(update.overrides.clone().flatten())
                .execute(&mut **tx)
                .await?;
        }
        Ok(())
    }

    async fn delete_message(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, channel: ChannelId, id: MessageId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM messages WHERE guild_id = $1 AND channel_id = $2 AND id = $3"#)
            .bind(guild.raw() as i64)
            .bind(channel.raw() as i64)
            .bind(id.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn list_messages_before(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        before: Option<MessageId>,
        limit: i64,
    ) -> CoreResult<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, guild_id, channel_id, author_id, content, attachments, embeds, actions,
                   overrides, created_at, edited_at, reply_to_id
            FROM messages
            WHERE guild_id = $1 AND channel_id = $2 AND ($3::bigint IS NULL OR id < $3)
            ORDER BY id DESC
            LIMIT $4
            "#,
        )
        .bind(guild.raw() as i64)
        .bind(channel.raw() as i64)
        .bind(before.map(|m| m.raw() as i64))
        .bind(limit)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows.into_iter().map(row_to_message).collect())
    }

    // -------------------------
    // Invites
    // -------------------------

    async fn create_invite(&self, tx: &mut Transaction<'_, Postgres>, invite: &Invite) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO invites (id, guild_id, possible_uses, use_count) VALUES ($1, $2, $3, 0)"#,
        )
        .bind(&invite.id.0)
        .bind(invite.guild_id.raw() as i64)
        .bind(invite.possible_uses)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn get_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<Option<Invite>> {
        let row = sqlx::query(r#"SELECT id, guild_id, possible_uses, use_count FROM invites WHERE id = $1"#)
            .bind(&id.0)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| Invite {
            id: InviteId(r.get("id")),
            guild_id: GuildId::from_raw(r.get::<i64, _>("guild_id") as u64),
            possible_uses: r.get("possible_uses"),
            use_count: r.get("use_count"),
        }))
    }

    async fn try_consume_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<bool> {
        let row = sqlx::query(
            r#"
            UPDATE invites
            SET use_count = use_count + 1
            WHERE id = $1 AND (possible_uses < 0 OR use_count < possible_uses)
            RETURNING id
            "#,
        )
        .bind(&id.0)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.is_some())
    }

    async fn delete_invite(&self, tx: &mut Transaction<'_, Postgres>, id: &InviteId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM invites WHERE id = $1"#)
            .bind(&id.0)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // -------------------------
    // Roles
    // -------------------------

    async fn create_role(&self, tx: &mut Transaction<'_, Postgres>, role: &Role) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO roles (id, guild_id, name, color, hoist, pingable, position)
               VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
        )
        .bind(role.id.raw() as i64)
        .bind(role.guild_id.raw() as i64)
        .bind(&role.name)
        .bind(role.color)
        .bind(role.hoist)
        .bind(role.pingable)
        .bind(&role.position)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn list_roles(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId) -> CoreResult<Vec<Role>> {
        let rows = sqlx::query(
            r#"SELECT id, guild_id, name, color, hoist, pingable, position FROM roles
               WHERE guild_id = $1 ORDER BY position ASC"#,
        )
        .bind(guild.raw() as i64)
        .fetch_all(&mut **tx)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| Role {
                id: RoleId::from_raw(r.get::<i64, _>("id") as u64),
                guild_id: GuildId::from_raw(r.get::<i64, _>("guild_id") as u64),
                name: r.get("name"),
                color: r.get("color"),
                hoist: r.get("hoist"),
                pingable: r.get("pingable"),
                position: r.get("position"),
            })
            .collect())
    }

    async fn move_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, role: RoleId, new_position: &str) -> CoreResult<()> {
        sqlx::query(r#"UPDATE roles SET position = $3 WHERE guild_id = $1 AND id = $2"#)
            .bind(guild.raw() as i64)
            .bind(role.raw() as i64)
            .bind(new_position)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn assign_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId, role: RoleId) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO user_roles (guild_id, user_id, role_id) VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(guild.raw() as i64)
        .bind(user.raw() as i64)
        .bind(role.raw() as i64)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn unassign_role(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, user: UserId, role: RoleId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM user_roles WHERE guild_id = $1 AND user_id = $2 AND role_id = $3"#)
            .bind(guild.raw() as i64)
            .bind(user.raw() as i64)
            .bind(role.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // -------------------------
    // Permission nodes
    // -------------------------

    async fn set_guild_permission_node(&self, tx: &mut Transaction<'_, Postgres>, guild: GuildId, role: RoleId, node: &PermissionNode) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO guild_permission_nodes (guild_id, role_id, path, effect, ordinal)
               VALUES ($1, $2, $3, $4, (SELECT COALESCE(MAX(ordinal), 0) + 1 FROM guild_permission_nodes WHERE guild_id = $1 AND role_id = $2))"#,
        )
        .bind(guild.raw() as i64)
        .bind(role.raw() as i64)
        .bind(&node.path)
        .bind(effect_str(node.effect))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn set_channel_permission_node(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        guild: GuildId,
        channel: ChannelId,
        role: RoleId,
        node: &PermissionNode,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO channel_permission_nodes (guild_id, channel_id, role_id, path, effect, ordinal)
               VALUES ($1, $2, $3, $4, $5,
                   (SELECT COALESCE(MAX(ordinal), 0) + 1 FROM channel_permission_nodes
                    WHERE guild_id = $1 AND channel_id = $2 AND role_id = $3))"#,
        )
        .bind(guild.raw() as i64)
        .bind(channel.raw() as i64)
        .bind(role.raw() as i64)
        .bind(&node.path)
        .bind(effect_str(node.effect))
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    // -------------------------
    // Emote packs
    // -------------------------

    async fn create_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: &EmotePack) -> CoreResult<()> {
        sqlx::query(r#"INSERT INTO emote_packs (id, owner_user_id, name) VALUES ($1, $2, $3)"#)
            .bind(pack.id.raw() as i64)
            .bind(pack.owner_user_id.raw() as i64)
            .bind(&pack.name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn is_pack_owner(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<bool> {
        let row = sqlx::query(r#"SELECT owner_user_id FROM emote_packs WHERE id = $1"#)
            .bind(pack.raw() as i64)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some_and(|r| r.get::<i64, _>("owner_user_id") as u64 == user.raw()))
    }

    async fn add_emote(&self, tx: &mut Transaction<'_, Postgres>, emote: &Emote) -> CoreResult<()> {
        sqlx::query(r#"INSERT INTO emotes (pack_id, image_id, name) VALUES ($1, $2, $3)"#)
            .bind(emote.pack_id.raw() as i64)
            .bind(&emote.image_id)
            .bind(&emote.name)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn delete_emote_from_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, image_id: &str) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM emotes WHERE pack_id = $1 AND image_id = $2"#)
            .bind(pack.raw() as i64)
            .bind(image_id)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn delete_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM emote_packs WHERE id = $1"#)
            .bind(pack.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn list_emote_packs(&self, tx: &mut Transaction<'_, Postgres>, user: UserId) -> CoreResult<Vec<EmotePack>> {
        let rows = sqlx::query(
            r#"SELECT emote_packs.id, emote_packs.owner_user_id, emote_packs.name
               FROM emote_packs
               INNER JOIN acquired_emote_packs ON acquired_emote_packs.pack_id = emote_packs.id
               WHERE acquired_emote_packs.user_id = $1"#,
        )
        .bind(user.raw() as i64)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| EmotePack {
                id: EmotePackId::from_raw(r.get::<i64, _>("id") as u64),
                owner_user_id: UserId::from_raw(r.get::<i64, _>("owner_user_id") as u64),
                name: r.get("name"),
            })
            .collect())
    }

    async fn list_pack_emotes(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId) -> CoreResult<Vec<Emote>> {
        let rows = sqlx::query(r#"SELECT pack_id, image_id, name FROM emotes WHERE pack_id = $1"#)
            .bind(pack.raw() as i64)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| Emote {
                pack_id: EmotePackId::from_raw(r.get::<i64, _>("pack_id") as u64),
                image_id: r.get("image_id"),
                name: r.get("name"),
            })
            .collect())
    }

    async fn acquire_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<()> {
        sqlx::query(r#"INSERT INTO acquired_emote_packs (pack_id, user_id) VALUES ($1, $2)"#)
            .bind(pack.raw() as i64)
            .bind(user.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn dequip_emote_pack(&self, tx: &mut Transaction<'_, Postgres>, pack: EmotePackId, user: UserId) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM acquired_emote_packs WHERE pack_id = $1 AND user_id = $2"#)
            .bind(pack.raw() as i64)
            .bind(user.raw() as i64)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    // -------------------------
    // Profile & guild list
    // -------------------------

    async fn get_user(&self, tx: &mut Transaction<'_, Postgres>, id: UserId) -> CoreResult<Option<User>> {
        let row = sqlx::query(r#"SELECT id, username, avatar_url, status, is_local FROM users WHERE id = $1"#)
            .bind(id.raw() as i64)
            .fetch_optional(&mut **tx)
            .await?;

        Ok(row.map(|r| User {
            id: UserId::from_raw(r.get::<i64, _>("id") as u64),
            username: r.get("username"),
            avatar_url: r.get("avatar_url"),
            status: status_from_str(r.get::<&str, _>("status")),
            is_local: r.get("is_local"),
        }))
    }

    async fn update_user_status(&self, tx: &mut Transaction<'_, Postgres>, user: UserId, status: UserStatus) -> CoreResult<()> {
        sqlx::query(r#"UPDATE users SET status = $2 WHERE id = $1"#)
            .bind(user.raw() as i64)
            .bind(status_str(status))
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn add_guild_list_entry(&self, tx: &mut Transaction<'_, Postgres>, entry: &GuildListEntry) -> CoreResult<()> {
        sqlx::query(
            r#"INSERT INTO guild_list (user_id, guild_id, host) VALUES ($1, $2, $3)
               ON CONFLICT (user_id, guild_id, host) DO NOTHING"#,
        )
        .bind(entry.user_id.raw() as i64)
        .bind(entry.guild_id.raw() as i64)
        .bind(&entry.host)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn remove_guild_list_entry(&self, tx: &mut Transaction<'_, Postgres>, user: UserId, guild: GuildId, host: Option<&str>) -> CoreResult<()> {
        sqlx::query(r#"DELETE FROM guild_list WHERE user_id = $1 AND guild_id = $2 AND host IS NOT DISTINCT FROM $3"#)
            .bind(user.raw() as i64)
            .bind(guild.raw() as i64)
            .bind(host)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    async fn list_guild_list(&self, tx: &mut Transaction<'_, Postgres>, user: UserId) -> CoreResult<Vec<GuildListEntry>> {
        let rows = sqlx::query(r#"SELECT user_id, guild_id, host FROM guild_list WHERE user_id = $1"#)
            .bind(user.raw() as i64)
            .fetch_all(&mut **tx)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| GuildListEntry {
                user_id: UserId::from_raw(r.get::<i64, _>("user_id") as u64),
                guild_id: GuildId::from_raw(r.get::<i64, _>("guild_id") as u64),
                host: r.get("host"),
            })
            .collect())
    }
}

fn row_to_channel(r: sqlx::postgres::PgRow) -> Channel {
    Channel {
        id: ChannelId::from_raw(r.get::<i64, _>("id") as u64),
        guild_id: GuildId::from_raw(r.get::<i64, _>("guild_id") as u64),
        name: r.get("name"),
        is_category: r.get("is_category"),
        is_voice: r.get("is_voice"),
        prev_id: r.get::<i64, _>("prev_id") as u64,
        next_id: r.get::<i64, _>("next_id") as u64,
    }
}

fn row_to_message(r: sqlx::postgres::PgRow) -> Message {
    Message {
        id: MessageId::from_raw(r.get::<i64, _>("id") as u64),
        guild_id: GuildId::from_raw(r.get::<i64, _>("guild_id") as u64),
        channel_id: ChannelId::from_raw(r.get::<i64, _>("channel_id") as u64),
        author_id: UserId::from_raw(r.get::<i64, _>("author_id") as u64),
        content: r.get("content"),
        attachments: r.get("attachments"),
        embeds: r.get::<sqlx::types::Json<_>, _>("embeds").0,
        actions: r.get::<sqlx::types::Json<_>, _>("actions").0,
        overrides: r.get("overrides"),
        created_at: r.get("created_at"),
        edited_at: r.get("edited_at"),
        reply_to_id: r.get::<Option<i64>, _>("reply_to_id").map(|v| MessageId::from_raw(v as u64)),
    }
}

use crate::perms::PermissionSource;
use crate::pipeline::{LocationInputs, LocationResolver, ResolvedLocation};
use crate::policy::LocationRequirement;

#[async_trait]
impl PermissionSource for PgStorageRepo {
    async fn is_owner(&self, guild: GuildId, user: UserId) -> CoreResult<bool> {
        let mut tx = self.begin().await?;
        let owner = self.get_guild(&mut tx, guild).await?.map(|g| g.owner_id);
        Ok(owner == Some(user))
    }

    async fn roles_for_user(&self, guild: GuildId, user: UserId) -> CoreResult<Vec<RoleId>> {
        let row = sqlx::query(
            r#"
            SELECT ur.role_id FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id AND r.guild_id = ur.guild_id
            WHERE ur.guild_id = $1 AND ur.user_id = $2
            ORDER BY r.position ASC
            "#,
        )
        .bind(guild.raw() as i64)
        .bind(user.raw() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(row.into_iter().map(|r| RoleId::from_raw(r.get::<i64, _>("role_id") as u64)).collect())
    }

    async fn channel_permissions(&self, guild: GuildId, channel: ChannelId, role: RoleId) -> CoreResult<Option<Vec<PermissionNode>>> {
        let rows = sqlx::query(
            r#"SELECT path, effect FROM channel_permission_nodes
               WHERE guild_id = $1 AND channel_id = $2 AND role_id = $3 ORDER BY ordinal ASC"#,
        )
        .bind(guild.raw() as i64)
        .bind(channel.raw() as i64)
        .bind(role.raw() as i64)
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            rows.into_iter()
                .map(|r| PermissionNode { path: r.get("path"), effect: effect_from_str(r.get("effect")) })
                .collect(),
        ))
    }

    async fn guild_permissions(&self, guild: GuildId, role: RoleId) -> CoreResult<Vec<PermissionNode>> {
        let rows = sqlx::query(
            r#"SELECT path, effect FROM guild_permission_nodes WHERE guild_id = $1 AND role_id = $2 ORDER BY ordinal ASC"#,
        )
        .bind(guild.raw() as i64)
        .bind(role.raw() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| PermissionNode { path: r.get("path"), effect: effect_from_str(r.get("effect")) })
            .collect())
    }
}

#[async_trait]
impl LocationResolver for PgStorageRepo {
    async fn resolve(&self, inputs: &LocationInputs, required: LocationRequirement) -> CoreResult<ResolvedLocation> {
        let mut tx = self.begin().await?;
        let mut resolved = ResolvedLocation {
            guild_id: inputs.guild_id,
            channel_id: inputs.channel_id,
            message_id: inputs.message_id,
            message_author_id: None,
        };

        if required.contains(LocationRequirement::GUILD) {
            let guild_id = inputs.guild_id.ok_or_else(|| crate::errors::CoreError::invalid("guild_id required"))?;
            self.get_guild(&mut tx, guild_id)
                .await?
                .ok_or(crate::errors::CoreError::NotFound("guild"))?;
        }

        if required.contains(LocationRequirement::CHANNEL) {
            let guild_id = inputs.guild_id.ok_or_else(|| crate::errors::CoreError::invalid("guild_id required"))?;
            let channel_id = inputs.channel_id.ok_or_else(|| crate::errors::CoreError::invalid("channel_id required"))?;
            self.get_channel(&mut tx, guild_id, channel_id)
                .await?
                .ok_or(crate::errors::CoreError::NotFound("channel"))?;
        }

        if required.contains(LocationRequirement::MESSAGE) {
            let guild_id = inputs.guild_id.ok_or_else(|| crate::errors::CoreError::invalid("guild_id required"))?;
            let channel_id = inputs.channel_id.ok_or_else(|| crate::errors::CoreError::invalid("channel_id required"))?;
            let message_id = inputs.message_id.ok_or_else(|| crate::errors::CoreError::invalid("message_id required"))?;
            let msg = self
                .get_message(&mut tx, guild_id, channel_id, message_id)
                .await?
                .ok_or(crate::errors::CoreError::NotFound("message"))?;
            resolved.message_author_id = Some(msg.author_id);
        }

        tx.commit().await.map_err(crate::errors::CoreError::from)?;
        Ok(resolved)
    }

    async fn is_member(&self, guild: GuildId, user: UserId) -> CoreResult<bool> {
        let mut tx = self.begin().await?;
        StorageRepo::is_member(self, &mut tx, guild, user).await
    }
}
