use chrono::Utc;

use crate::errors::{CoreError, CoreResult};
use crate::events::GuildEvent;
use crate::ids::{ChannelId, GuildId, MessageId, UserId};
use crate::model::{Action, Embed, Message, MessageUpdate, MessageUpdateMask};
use crate::repo::StorageRepo;

use super::CoreService;

pub struct SendMessageRequest {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
    pub attachments: Vec<String>,
    pub embeds: Vec<Embed>,
    pub actions: Vec<Action>,
    pub overrides: Option<Vec<u8>>,
    pub reply_to_id: Option<MessageId>,
}

pub struct UpdateMessageRequest {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
    pub actions: Option<Vec<Action>>,
    pub overrides: Option<Option<Vec<u8>>>,
    pub mask: MessageUpdateMask,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn send_message(&self, req: SendMessageRequest) -> CoreResult<Message> {
        if req.content.is_empty() && req.attachments.is_empty() {
            return Err(CoreError::invalid("message must have content or an attachment"));
        }

        let message = Message {
            id: req.id,
            guild_id: req.guild_id,
            channel_id: req.channel_id,
            author_id: req.author_id,
            content: req.content,
            attachments: req.attachments,
            embeds: req.embeds,
            actions: req.actions,
            overrides: req.overrides,
            created_at: Utc::now(),
            edited_at: None,
            reply_to_id: req.reply_to_id,
        };

        let mut tx = self.repo.begin().await?;
        if let Some(reply_to) = message.reply_to_id {
            self.repo
                .get_message(&mut tx, message.guild_id, message.channel_id, reply_to)
                .await?
                .ok_or(CoreError::NotFound("reply_to message"))?;
        }
        self.repo.insert_message(&mut tx, &message).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&message.guild_id, GuildEvent::MessageSent(message.clone()));
        Ok(message)
    }

    pub async fn update_message(&self, req: UpdateMessageRequest) -> CoreResult<()> {
        if req.mask.is_empty() {
            return Err(CoreError::invalid("update must set at least one field"));
        }

        let update = MessageUpdate {
            content: req.content.clone(),
            embeds: req.embeds.clone(),
            actions: req.actions.clone(),
            overrides: req.overrides.clone(),
            mask: req.mask,
        };

        let mut tx = self.repo.begin().await?;
        self.repo
            .get_message(&mut tx, req.guild_id, req.channel_id, req.message_id)
            .await?
            .ok_or(CoreError::NotFound("message"))?;
        self.repo.update_message(&mut tx, req.guild_id, req.channel_id, req.message_id, &update).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(
            &req.guild_id,
            GuildEvent::MessageUpdated {
                guild_id: req.guild_id,
                channel_id: req.channel_id,
                message_id: req.message_id,
                content: req.content,
                embeds: req.embeds,
                actions: req.actions,
                overrides: req.overrides,
                edited_at: Utc::now(),
            },
        );
        Ok(())
    }

    pub async fn delete_message(&self, guild_id: GuildId, channel_id: ChannelId, message_id: MessageId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.get_message(&mut tx, guild_id, channel_id, message_id).await?.ok_or(CoreError::NotFound("message"))?;
        self.repo.delete_message(&mut tx, guild_id, channel_id, message_id).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&guild_id, GuildEvent::MessageDeleted { guild_id, channel_id, message_id });
        Ok(())
    }
}
