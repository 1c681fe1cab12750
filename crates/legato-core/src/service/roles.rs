use crate::errors::{CoreError, CoreResult};
use crate::events::GuildEvent;
use crate::ids::{ChannelId, GuildId, RoleId, UserId};
use crate::model::{NodeEffect, PermissionNode, Role};
use crate::repo::StorageRepo;

use super::CoreService;

pub struct CreateRoleRequest {
    pub id: RoleId,
    pub guild_id: GuildId,
    pub name: String,
    pub color: i32,
    pub hoist: bool,
    pub pingable: bool,
    /// Fractional position key; the caller (not this handler) is
    /// responsible for picking a key that sorts where it wants the role to
    /// land among existing siblings.
    pub position: String,
}

pub struct MoveRoleRequest {
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub new_position: String,
}

pub enum PermissionScope {
    Guild,
    Channel(ChannelId),
}

pub struct SetPermissionsRequest {
    pub guild_id: GuildId,
    pub role_id: RoleId,
    pub scope: PermissionScope,
    pub path: String,
    pub effect: NodeEffect,
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn create_role(&self, req: CreateRoleRequest) -> CoreResult<Role> {
        if req.name.trim().is_empty() {
            return Err(CoreError::invalid("role name must not be empty"));
        }

        let role = Role {
            id: req.id,
            guild_id: req.guild_id,
            name: req.name,
            color: req.color,
            hoist: req.hoist,
            pingable: req.pingable,
            position: req.position,
        };

        let mut tx = self.repo.begin().await?;
        self.repo.create_role(&mut tx, &role).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(role)
    }

    pub async fn move_role(&self, req: MoveRoleRequest) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.move_role(&mut tx, req.guild_id, req.role_id, &req.new_position).await?;
        tx.commit().await.map_err(CoreError::from)?;

        self.subs.guild.broadcast(&req.guild_id, GuildEvent::RoleMoved { role_id: req.role_id, position: req.new_position });
        Ok(())
    }

    pub async fn assign_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.assign_role(&mut tx, guild_id, user_id, role_id).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    pub async fn unassign_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> CoreResult<()> {
        let mut tx = self.repo.begin().await?;
        self.repo.unassign_role(&mut tx, guild_id, user_id, role_id).await?;
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }

    /// Appends a permission node to the end of the relevant ordered list.
    /// Nodes are evaluated in insertion order, so earlier calls take
    /// precedence over later ones for overlapping paths.
    pub async fn set_permissions(&self, req: SetPermissionsRequest) -> CoreResult<()> {
        let node = PermissionNode { path: req.path, effect: req.effect };
        let mut tx = self.repo.begin().await?;
        match req.scope {
            PermissionScope::Guild => {
                self.repo.set_guild_permission_node(&mut tx, req.guild_id, req.role_id, &node).await?;
            }
            PermissionScope::Channel(channel_id) => {
                self.repo.set_channel_permission_node(&mut tx, req.guild_id, channel_id, req.role_id, &node).await?;
            }
        }
        tx.commit().await.map_err(CoreError::from)?;
        Ok(())
    }
}
