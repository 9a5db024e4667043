//! Answers to every request an open session can carry.

use std::sync::{Arc, PoisonError};

use dfi_shared::constants::{BUCKET_SIZE, MAX_SEARCH_LENGTH};
use dfi_shared::protocol::{RequestPiece, SearchQuery};
use dfi_shared::{Address, DatastoreError, Entry, Message, Tag};
use tracing::{debug, trace};

use crate::dht::UpdateOutcome;
use crate::error::{NetError, Result};
use crate::local_peer::LocalPeer;

/// Per-session facts handlers may rely on.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// The authenticated remote.
    pub peer: Address,
}

impl LocalPeer {
    /// Produce the single reply to `msg`. Failures become a `no` carrying
    /// the error text.
    pub async fn handle(self: &Arc<Self>, ctx: &SessionContext, msg: Message) -> Message {
        let Some(tag) = msg.tag().filter(Tag::is_request) else {
            return Message::no(&format!("unexpected message {}", msg.header));
        };
        trace!(peer = %ctx.peer.short(), %tag, "request");

        let result = match tag {
            Tag::DhtQuery => self.handle_query(ctx, &msg).await,
            Tag::DhtFindClosest => self.handle_find_closest(ctx, &msg).await,
            Tag::DhtAnnounce => self.handle_announce(ctx, &msg).await,
            Tag::Search => self.handle_search(&msg),
            Tag::Recent => self.handle_recent(&msg),
            Tag::Popular => self.handle_popular(&msg),
            Tag::RequestHashList => self.handle_hash_list(&msg),
            Tag::RequestPiece => self.handle_piece(&msg),
            Tag::RequestAddPeer => self.handle_add_peer(ctx, &msg),
            other => Err(NetError::Rejected(format!("unsupported request {other}"))),
        };

        result.unwrap_or_else(|e| {
            debug!(peer = %ctx.peer.short(), %tag, "request failed: {e}");
            Message::no(&e.to_string())
        })
    }

    async fn handle_query(&self, ctx: &SessionContext, msg: &Message) -> Result<Message> {
        self.limiters()
            .query
            .acquire(&ctx.peer, self.config().rate_limit_wait)
            .await?;
        let target: Address = msg.read()?;

        let entries = if target == self.address() {
            vec![self.entry()]
        } else {
            self.dht().find_closest(&target, BUCKET_SIZE)?
        };
        Ok(Message::with_content(Tag::DhtEntries, &entries)?)
    }

    async fn handle_find_closest(&self, ctx: &SessionContext, msg: &Message) -> Result<Message> {
        self.limiters()
            .query
            .acquire(&ctx.peer, self.config().rate_limit_wait)
            .await?;
        let target: Address = msg.read()?;

        let entries = self.dht().find_closest(&target, BUCKET_SIZE)?;
        Ok(Message::with_content(Tag::DhtEntries, &entries)?)
    }

    async fn handle_announce(self: &Arc<Self>, ctx: &SessionContext, msg: &Message) -> Result<Message> {
        self.limiters()
            .announce
            .acquire(&ctx.peer, self.config().rate_limit_wait)
            .await?;
        let entry: Entry = msg.read()?;

        match self.dht().update(&entry)? {
            UpdateOutcome::Stale => Err(NetError::StaleEntry),
            UpdateOutcome::Unchanged => Ok(Message::ok()),
            outcome => {
                debug!(peer = %ctx.peer.short(), entry = %entry.address.short(), ?outcome, "announce accepted");
                self.forward_announce(entry, ctx.peer.clone());
                Ok(Message::ok())
            }
        }
    }

    fn handle_search(&self, msg: &Message) -> Result<Message> {
        // checked on the raw content, before anything is decoded
        if msg.content.len() > MAX_SEARCH_LENGTH {
            return Err(NetError::SearchTooLong(msg.content.len()));
        }
        let query: SearchQuery = msg.read()?;
        let posts = self.datastore().search(&query.query, query.page)?;
        Ok(Message::with_content(Tag::Posts, &posts)?)
    }

    fn handle_recent(&self, msg: &Message) -> Result<Message> {
        let page: u32 = msg.read()?;
        let posts = self.datastore().query_recent(page)?;
        Ok(Message::with_content(Tag::Posts, &posts)?)
    }

    fn handle_popular(&self, msg: &Message) -> Result<Message> {
        let page: u32 = msg.read()?;
        let posts = self.datastore().query_popular(page)?;
        Ok(Message::with_content(Tag::Posts, &posts)?)
    }

    fn handle_hash_list(&self, msg: &Message) -> Result<Message> {
        let address: Address = msg.read()?;

        let hash_list = if address == self.address() {
            self.collection()?.to_message(self.identity())
        } else {
            self.mirror_hash_list(&address)
                .ok_or(NetError::Datastore(DatastoreError::NotFound))?
        };
        Ok(Message::with_content(Tag::HashList, &hash_list)?)
    }

    fn handle_piece(&self, msg: &Message) -> Result<Message> {
        let req: RequestPiece = msg.read()?;
        let datastore = self
            .datastore_for(&req.address)
            .ok_or(NetError::Datastore(DatastoreError::NotFound))?;

        let piece = datastore.query_piece(req.id, true)?;
        Ok(Message::with_content(Tag::Piece, &piece)?)
    }

    /// The requester claims to seed `address`. Accept only if its own entry
    /// says so, then record it as a seed of that address.
    fn handle_add_peer(&self, ctx: &SessionContext, msg: &Message) -> Result<Message> {
        let target: Address = msg.read()?;
        let requester = self.dht().query(&ctx.peer)?;
        if !requester.is_seeding(&target) {
            return Err(NetError::Rejected(format!(
                "{} is not seeding {}",
                ctx.peer.short(),
                target.short()
            )));
        }

        if target == self.address() {
            let added = {
                let mut local = self.entry_lock().write().unwrap_or_else(PoisonError::into_inner);
                local.merge_seeds([&ctx.peer])
            };
            debug!(seed = %ctx.peer.short(), added, "new local seed");
        } else {
            let mut entry = self.dht().query(&target)?;
            if entry.merge_seeds([&ctx.peer]) > 0 {
                self.dht().insert(&entry)?;
            }
        }
        Ok(Message::ok())
    }
}
