use crate::errors::{CoreError, CoreResult};
use crate::events::GuildEvent;
use crate::ids::{ChannelId, GuildId, UserId};
use crate::model::{Channel, Guild};
use crate::repo::StorageRepo;

use super::CoreService;

pub struct CreateGuildRequest {
    pub id: GuildId,
    pub owner_id: UserId,
    pub name: String,
    pub picture_url: Option<String>,
}

/// A newly created guild together with the default channel auto-created
/// alongside it.
pub struct CreatedGuild {
    pub guild: Guild,
    pub default_channel: Channel,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn create_guild(&self, req: CreateGuildRequest) -> CoreResult<CreatedGuild> {
        if req.name.trim().is_empty() {
            return Err(CoreError::invalid("guild name must not be empty"));
        }

        let guild = Guild { id: req.id, owner_id: req.owner_id, name: req.name, picture_url: req.picture_url };
        let default_channel = Channel {
            id: ChannelId::from_raw(self.ids.next_id()),
            guild_id: guild.id,
            name: "general".to_string(),
            is_category: false,
            is_voice: false,
            prev_id: 0,
            next_id: 0,
        };

        let mut tx = self.repo.begin().await?;
        self.repo.create_guild(&mut tx, &guild).await?;
        self.repo.add_member(&mut tx, guild.id, guild.owner_id).await?;
        self.repo.create_channel(&mut tx, &default_channel).await?;
        tx.commit().await.map_err(CoreError::from)?;

        Ok(CreatedGuild { guild, default_channel })
    }

    pub async fn get_guild(&self, id: GuildId) -> CoreResult<Guild> {
        let mut tx = self.repo.begin().await?;
        self.repo.get_guild(&mut tx, id).await?.ok_or(CoreError::NotFound("guild"))
    }

    pub async fn delete_guild(&self, id: GuildId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.get_guild(&mut tx, id).await?.ok_or(CoreError::NotFound("guild"))?;
        self.repo.delete_guild(&mut tx, id).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&id, GuildEvent::GuildDeleted { guild_id: id });
        Ok(())
    }

    pub async fn leave_guild(&self, guild_id: GuildId, user_id: UserId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        let guild = self.repo.get_guild(&mut tx, guild_id).await?.ok_or(CoreError::NotFound("guild"))?;
        if guild.owner_id == user_id {
            return Err(CoreError::FailedPrecondition("the owner cannot leave their own guild"));
        }
        self.repo.remove_member(&mut tx, guild_id, user_id).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&guild_id, GuildEvent::MemberLeft { guild_id, user_id });
        // Stop this user's guild-plane streams from receiving anything
        // further for a guild they're no longer in.
        self.subs.unsubscribe_user_from_guild(guild_id, user_id);
        Ok(())
    }
}
