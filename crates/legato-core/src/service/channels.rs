use crate::errors::{CoreError, CoreResult};
use crate::events::GuildEvent;
use crate::ids::{ChannelId, GuildId};
use crate::model::Channel;
use crate::repo::StorageRepo;

use super::CoreService;

/// `prev_id`/`next_id` place the new channel in the ordered list; `0` means
/// "no neighbor on this side" (list head / list tail). Both must name either
/// `0` or a channel that already exists in `guild_id`, and the two together
/// must describe a real gap in the current order — see `create_channel`.
pub struct CreateChannelRequest {
    pub id: ChannelId,
    pub guild_id: GuildId,
    pub name: String,
    pub is_category: bool,
    pub is_voice: bool,
    pub prev_id: u64,
    pub next_id: u64,
}

/// Splices a channel into the ordered list after `new_prev_id` (`0` means
/// "make it the new head").
pub struct UpdateChannelOrderRequest {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub new_prev_id: u64,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn create_channel(&self, req: CreateChannelRequest) -> CoreResult<Channel> {
        if req.name.trim().is_empty() {
            return Err(CoreError::invalid("channel name must not be empty"));
        }

        let mut tx = self.repo.begin().await?;
        let siblings = self.repo.list_channels(&mut tx, req.guild_id).await?;

        let prev = if req.prev_id != 0 {
            Some(siblings.iter().find(|c| c.id.raw() == req.prev_id).cloned().ok_or_else(|| CoreError::invalid("prev_id is not a channel in this guild"))?)
        } else {
            None
        };
        let next = if req.next_id != 0 {
            Some(siblings.iter().find(|c| c.id.raw() == req.next_id).cloned().ok_or_else(|| CoreError::invalid("next_id is not a channel in this guild"))?)
        } else {
            None
        };

        let current_head_id = siblings.iter().find(|c| c.prev_id == 0).map_or(0, |c| c.id.raw());
        let current_tail_id = siblings.iter().find(|c| c.next_id == 0).map_or(0, |c| c.id.raw());

        let expected_next_after_prev = prev.as_ref().map_or(current_head_id, |p| p.next_id);
        let expected_prev_before_next = next.as_ref().map_or(current_tail_id, |n| n.prev_id);

        if expected_next_after_prev != req.next_id || expected_prev_before_next != req.prev_id {
            return Err(CoreError::FailedPrecondition("prev_id/next_id are not adjacent in this guild's channel order"));
        }

        let channel = Channel {
            id: req.id,
            guild_id: req.guild_id,
            name: req.name,
            is_category: req.is_category,
            is_voice: req.is_voice,
            prev_id: req.prev_id,
            next_id: req.next_id,
        };
        self.repo.create_channel(&mut tx, &channel).await?;
        if let Some(prev) = &prev {
            self.repo.relink_channel(&mut tx, req.guild_id, prev.id, prev.prev_id, channel.id.raw()).await?;
        }
        if let Some(next) = &next {
            self.repo.relink_channel(&mut tx, req.guild_id, next.id, channel.id.raw(), next.next_id).await?;
        }
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&req.guild_id, GuildEvent::ChannelCreated(channel.clone()));
        Ok(channel)
    }

    pub async fn update_channel_order(&self, req: UpdateChannelOrderRequest) -> CoreResult<Channel> {
        let mut tx = self.repo.begin().await?;
        let channels = self.repo.list_channels(&mut tx, req.guild_id).await?;

        let moving = channels
            .iter()
            .find(|c| c.id.raw() == req.channel_id.raw())
            .cloned()
            .ok_or(CoreError::NotFound("channel"))?;

        if req.new_prev_id == req.channel_id.raw() {
            return Err(CoreError::invalid("a channel cannot be its own neighbor"));
        }
        if req.new_prev_id != 0 && !channels.iter().any(|c| c.id.raw() == req.new_prev_id) {
            return Err(CoreError::invalid("new_prev_id is not a channel in this guild"));
        }

        let old_prev = moving.prev_id;
        let old_next = moving.next_id;
        let new_next_id = channels
            .iter()
            .find(|c| c.prev_id == req.new_prev_id && c.id.raw() != req.channel_id.raw())
            .map(|c| c.id.raw())
            .unwrap_or(0);

        // Unlink the moving channel from its old position.
        if old_prev != 0 {
            let prev = find_channel(&channels, old_prev)?;
            self.repo.relink_channel(&mut tx, req.guild_id, ChannelId::from_raw(old_prev), prev.prev_id, old_next).await?;
        }
        if old_next != 0 {
            let next = find_channel(&channels, old_next)?;
            self.repo.relink_channel(&mut tx, req.guild_id, ChannelId::from_raw(old_next), old_prev, next.next_id).await?;
        }

        // Splice it into the new position.
        if req.new_prev_id != 0 {
            let prev = find_channel(&channels, req.new_prev_id)?;
            self.repo
                .relink_channel(&mut tx, req.guild_id, ChannelId::from_raw(req.new_prev_id), prev.prev_id, req.channel_id.raw())
                .await?;
        }
        if new_next_id != 0 {
            let next = find_channel(&channels, new_next_id)?;
            self.repo.relink_channel(&mut tx, req.guild_id, ChannelId::from_raw(new_next_id), req.channel_id.raw(), next.next_id).await?;
        }
        self.repo.relink_channel(&mut tx, req.guild_id, req.channel_id, req.new_prev_id, new_next_id).await?;

        tx.commit().await.map_err(CoreError::from)?;

        let updated = Channel { prev_id: req.new_prev_id, next_id: new_next_id, ..moving };
        self.subs.guild.broadcast(&req.guild_id, GuildEvent::ChannelUpdated { channel: updated.clone(), update_order: true });
        Ok(updated)
    }

    pub async fn delete_channel(&self, guild_id: GuildId, channel_id: ChannelId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        let channel = self.repo.get_channel(&mut tx, guild_id, channel_id).await?.ok_or(CoreError::NotFound("channel"))?;

        if channel.prev_id != 0 {
            let prev = self.repo.get_channel(&mut tx, guild_id, ChannelId::from_raw(channel.prev_id)).await?.ok_or(CoreError::NotFound("channel"))?;
            self.repo.relink_channel(&mut tx, guild_id, ChannelId::from_raw(channel.prev_id), prev.prev_id, channel.next_id).await?;
        }
        if channel.next_id != 0 {
            let next = self.repo.get_channel(&mut tx, guild_id, ChannelId::from_raw(channel.next_id)).await?.ok_or(CoreError::NotFound("channel"))?;
            self.repo.relink_channel(&mut tx, guild_id, ChannelId::from_raw(channel.next_id), channel.prev_id, next.next_id).await?;
        }
        self.repo.delete_channel(&mut tx, guild_id, channel_id).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&guild_id, GuildEvent::ChannelDeleted { guild_id, channel_id });
        Ok(())
    }
}

fn find_channel(channels: &[Channel], id: u64) -> CoreResult<Channel> {
    channels.iter().find(|c| c.id.raw() == id).cloned().ok_or(CoreError::NotFound("channel"))
}
