use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{CoreError, CoreResult};
use crate::events::{ActionEvent, GuildEvent, HomeserverEvent};
use crate::identity::Identity;
use crate::ids::GuildId;
use crate::repo::StorageRepo;
use crate::subscriptions::DoneSignal;

use super::CoreService;

/// Which plane a `StreamEvents` call wants to subscribe to. A caller may ask
/// for exactly one of these per open stream.
pub enum SubscribeRequest {
    Guild(GuildId),
    Action,
    Homeserver,
}

pub enum StreamEventsOut {
    Guild(mpsc::Receiver<GuildEvent>),
    Action(mpsc::Receiver<ActionEvent>),
    Homeserver(mpsc::Receiver<HomeserverEvent>),
}

/// Tracks whether a single open `StreamEvents` call has already subscribed
/// to a plane. A stream may only carry one active subscription at a time —
/// a second `SubscribeTo*` on the same stream is a caller error, not an
/// implicit re-subscribe, so the stream's semantics stay simple to reason
/// about from either end.
#[derive(Default)]
pub struct StreamSession {
    subscribed: AtomicBool,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<R: StorageRepo> CoreService<R> {
    pub async fn subscribe_to_stream(
        &self,
        session: &StreamSession,
        identity: &Identity,
        peer_cancel: CancellationToken,
        req: SubscribeRequest,
    ) -> CoreResult<(StreamEventsOut, DoneSignal)> {
        if session.subscribed.swap(true, Ordering::AcqRel) {
            return Err(CoreError::invalid("this stream already has an active subscription"));
        }

        let user_id = identity
            .local_user_id()
            .ok_or(CoreError::PermissionDenied("foreign callers cannot open a stream"))?;

        Ok(match req {
            SubscribeRequest::Guild(guild_id) => {
                let mut tx = self.repo.begin().await?;
                let joined = self.repo.is_member(&mut tx, guild_id, user_id).await?;
                if !joined {
                    return Err(CoreError::FailedPrecondition("not a member of this guild"));
                }
                let (rx, done) = self.subs.guild.subscribe(guild_id, user_id, peer_cancel);
                (StreamEventsOut::Guild(rx), done)
            }
            SubscribeRequest::Action => {
                let (rx, done) = self.subs.action.subscribe(user_id, user_id, peer_cancel);
                (StreamEventsOut::Action(rx), done)
            }
            SubscribeRequest::Homeserver => {
                if !identity.is_local() {
                    return Err(CoreError::PermissionDenied("local_only"));
                }
                let (rx, done) = self.subs.homeserver.subscribe(user_id, user_id, peer_cancel);
                (StreamEventsOut::Homeserver(rx), done)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_subscribe_on_same_stream_is_rejected() {
        let session = StreamSession::new();
        assert!(!session.subscribed.swap(true, Ordering::AcqRel));
        assert!(session.subscribed.load(Ordering::Acquire));
    }
}
