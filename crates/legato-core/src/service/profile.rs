use crate::errors::CoreResult;
use crate::events::HomeserverEvent;
use crate::ids::{GuildId, UserId};
use crate::model::{GuildListEntry, UserStatus};
use crate::repo::StorageRepo;

use super::CoreService;

pub struct StatusUpdateRequest {
    pub user_id: UserId,
    pub status: UserStatus,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn update_status(&self, req: StatusUpdateRequest) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.update_user_status(&mut tx, req.user_id, req.status).await?;
        tx.commit().await.map_err(crate::errors::CoreError::from)?;
        Ok(())
    }

    pub async fn add_guild_to_guild_list(&self, user_id: UserId, guild_id: GuildId, host: Option<String>) -> CoreResult<()> {
        let entry = GuildListEntry { user_id, guild_id, host };
        let mut tx = self.repo.begin().await?;
        self.repo.add_guild_list_entry(&mut tx, &entry).await?;
        tx.commit().await.map_err(crate::errors::CoreError::from)?;

        self.subs.homeserver.broadcast(&user_id, HomeserverEvent::GuildAddedToList(entry));
        Ok(())
    }

    pub async fn remove_guild_from_guild_list(&self, user_id: UserId, guild_id: GuildId, host: Option<String>) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.remove_guild_list_entry(&mut tx, user_id, guild_id, host.as_deref()).await?;
        tx.commit().await.map_err(crate::errors::CoreError::from)?;

        self.subs.homeserver.broadcast(&user_id, HomeserverEvent::GuildRemovedFromList { user_id, guild_id, host });
        Ok(())
    }

    pub async fn get_guild_list(&self, user_id: UserId) -> CoreResult<Vec<GuildListEntry>> {
        let mut tx = self.repo.begin().await?;
        self.repo.list_guild_list(&mut tx, user_id).await
    }
}
