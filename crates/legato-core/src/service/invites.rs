use crate::errors::{CoreError, CoreResult};
use crate::events::GuildEvent;
use crate::ids::{GuildId, InviteId, UserId};
use crate::model::Invite;
use crate::repo::StorageRepo;

use super::CoreService;

pub struct CreateInviteRequest {
    pub id: InviteId,
    pub guild_id: GuildId,
    /// `-1` means unlimited.
    pub possible_uses: i32,
}

pub struct JoinGuildRequest {
    pub invite_id: InviteId,
    pub user_id: UserId,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn create_invite(&self, req: CreateInviteRequest) -> CoreResult<Invite> {
        if req.possible_uses < -1 || req.possible_uses == 0 {
            return Err(CoreError::invalid("possible_uses must be -1 (unlimited) or a positive integer"));
        }

        let invite = Invite { id: req.id, guild_id: req.guild_id, possible_uses: req.possible_uses, use_count: 0 };

        let mut tx = self.repo.begin().await?;
        self.repo.get_guild(&mut tx, req.guild_id).await?.ok_or(CoreError::NotFound("guild"))?;
        self.repo.create_invite(&mut tx, &invite).await?;
        tx.commit().await.map_err(CoreError::from)?;

        Ok(invite)
    }

    /// Joining is the one place the quota check and the membership write
    /// must commit together: two callers racing on the last use of a
    /// single-use invite must not both succeed.
    pub async fn join_guild(&self, req: JoinGuildRequest) -> CoreResult<GuildId> {
        let mut tx = self.repo.begin().await?;
        let invite = self.repo.get_invite(&mut tx, &req.invite_id).await?.ok_or(CoreError::NotFound("invite"))?;

        if !self.repo.try_consume_invite(&mut tx, &req.invite_id).await? {
            return Err(CoreError::FailedPrecondition("invite has no uses remaining"));
        }
        self.repo.add_member(&mut tx, invite.guild_id, req.user_id).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&invite.guild_id, GuildEvent::MemberJoined { guild_id: invite.guild_id, user_id: req.user_id });
        Ok(invite.guild_id)
    }

    pub async fn delete_invite(&self, guild_id: GuildId, invite_id: InviteId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        let invite = self.repo.get_invite(&mut tx, &invite_id).await?.ok_or(CoreError::NotFound("invite"))?;
        if invite.guild_id != guild_id {
            return Err(CoreError::NotFound("invite"));
        }
        self.repo.delete_invite(&mut tx, &invite_id).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }
}
