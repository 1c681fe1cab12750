use crate::errors::{CoreError, CoreResult};
use crate::ids::{EmotePackId, UserId};
use crate::model::{Emote, EmotePack};
use crate::repo::StorageRepo;

use super::CoreService;

pub struct CreateEmotePackRequest {
    pub id: EmotePackId,
    pub owner_user_id: UserId,
    pub name: String,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn create_emote_pack(&self, req: CreateEmotePackRequest) -> CoreResult<EmotePack> {
        if req.name.trim().is_empty() {
            return Err(CoreError::invalid("emote pack name must not be empty"));
        }
        let pack = EmotePack { id: req.id, owner_user_id: req.owner_user_id, name: req.name };

        let mut tx = self.repo.begin().await?;
        self.repo.create_emote_pack(&mut tx, &pack).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(pack)
    }

    pub async fn add_emote(&self, caller: UserId, pack_id: EmotePackId, image_id: String, name: String) -> CoreResult<Emote> {
        if name.trim().is_empty() {
            return Err(CoreError::invalid("emote name must not be empty"));
        }
        let emote = Emote { pack_id, image_id, name };

        let mut tx = self.repo.begin().await?;
        if !self.repo.is_pack_owner(&mut tx, pack_id, caller).await? {
            return Err(CoreError::PermissionDenied("not the owner of this emote pack"));
        }
        self.repo.add_emote(&mut tx, &emote).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(emote)
    }

    pub async fn delete_emote_from_pack(&self, caller: UserId, pack_id: EmotePackId, image_id: &str) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        if !self.repo.is_pack_owner(&mut tx, pack_id, caller).await? {
            return Err(CoreError::PermissionDenied("not the owner of this emote pack"));
        }
        self.repo.delete_emote_from_pack(&mut tx, pack_id, image_id).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn delete_emote_pack(&self, caller: UserId, pack_id: EmotePackId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        if !self.repo.is_pack_owner(&mut tx, pack_id, caller).await? {
            return Err(CoreError::PermissionDenied("not the owner of this emote pack"));
        }
        self.repo.delete_emote_pack(&mut tx, pack_id).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    /// Packs `user` has acquired into their personal set.
    pub async fn list_emote_packs(&self, user: UserId) -> CoreResult<Vec<EmotePack>> {
        let mut tx = self.repo.begin().await?;
        self.repo.list_emote_packs(&mut tx, user).await
    }

    pub async fn list_pack_emotes(&self, pack_id: EmotePackId) -> CoreResult<Vec<Emote>> {
        let mut tx = self.repo.begin().await?;
        self.repo.list_pack_emotes(&mut tx, pack_id).await
    }

    pub async fn acquire_emote_pack(&self, user: UserId, pack_id: EmotePackId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.acquire_emote_pack(&mut tx, pack_id, user).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn dequip_emote_pack(&self, user: UserId, pack_id: EmotePackId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.dequip_emote_pack(&mut tx, pack_id, user).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }
}
