//! Redis pub/sub transport.
//!
//! Per resume: `resume:{id}:events` carries [`CollaborationEvent`]s,
//! `resume:{id}:presence` carries the full roster, and the hash
//! `resume:{id}:members` holds one presence entry per user. The hash expires
//! after [`MEMBERS_TTL_SECS`] without a join, so entries left by a crashed
//! process do not linger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::collab::presence::Collaborator;
use crate::collab::{
    CollaborationEvent, ConnectionState, RealtimeTransport, TransportError, TransportEvent,
};

pub const MEMBERS_TTL_SECS: i64 = 6 * 60 * 60;

fn events_channel(resume_id: Uuid) -> String {
    format!("resume:{resume_id}:events")
}

fn presence_channel(resume_id: Uuid) -> String {
    format!("resume:{resume_id}:presence")
}

fn members_key(resume_id: Uuid) -> String {
    format!("resume:{resume_id}:members")
}

/// Queued publish, drained in order by the writer task.
struct Outbound {
    channel: String,
    payload: String,
}

struct Link {
    user_id: Uuid,
    events: mpsc::Sender<TransportEvent>,
    conn: MultiplexedConnection,
    outbound: mpsc::UnboundedSender<Outbound>,
    writer: JoinHandle<()>,
    reader: Option<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        self.writer.abort();
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// One instance per session; `connect` may be called again to re-establish the link.
pub struct RedisTransport {
    client: redis::Client,
    link: Mutex<Option<Link>>,
    /// Set by `leave_room`; a closed transport never reconnects or rejoins.
    closed: AtomicBool,
}

impl RedisTransport {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            link: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Connection and identity of the current link, cloned out so no lock is held across awaits.
    fn current(&self) -> Result<(MultiplexedConnection, Uuid, mpsc::Sender<TransportEvent>), TransportError> {
        let guard = self.link.lock().map_err(|_| TransportError::Closed)?;
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        Ok((link.conn.clone(), link.user_id, link.events.clone()))
    }

    async fn publish_roster(
        conn: &mut MultiplexedConnection,
        resume_id: Uuid,
    ) -> Result<(), TransportError> {
        let entries: HashMap<String, String> = conn.hgetall(members_key(resume_id)).await?;
        let mut roster: Vec<Collaborator> = entries
            .values()
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect();
        roster.sort_by_key(|c| c.joined_at);

        let payload = serde_json::to_string(&roster)?;
        let _: i64 = conn.publish(presence_channel(resume_id), payload).await?;
        Ok(())
    }
}

#[async_trait]
impl RealtimeTransport for RedisTransport {
    async fn connect(
        &self,
        user_id: Uuid,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let conn = self.client.get_multiplexed_async_connection().await?;

        let (outbound, mut queue) = mpsc::unbounded_channel::<Outbound>();
        let mut writer_conn = conn.clone();
        let writer_events = events.clone();
        let writer = tokio::spawn(async move {
            while let Some(Outbound { channel, payload }) = queue.recv().await {
                let published: Result<i64, _> = writer_conn.publish(&channel, payload).await;
                if let Err(e) = published {
                    warn!("Publish to {channel} failed: {e}");
                    let _ = writer_events
                        .send(TransportEvent::Fault(format!("Broadcast failed: {e}")))
                        .await;
                }
            }
        });

        let link = Link {
            user_id,
            events,
            conn,
            outbound,
            writer,
            reader: None,
        };
        let previous = {
            let mut guard = self.link.lock().map_err(|_| TransportError::Closed)?;
            // Left while the connection was being opened; the new link is dropped here.
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            guard.replace(link)
        };
        drop(previous);

        info!(%user_id, "Redis transport connected");
        Ok(())
    }

    async fn join_room(&self, resume_id: Uuid, presence: &Collaborator) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let (mut conn, user_id, events) = self.current()?;

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(events_channel(resume_id)).await?;
        pubsub.subscribe(presence_channel(resume_id)).await?;

        let reader_events = events.clone();
        let reader = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let channel = msg.get_channel_name().to_string();
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("Unreadable message on {channel}: {e}");
                        continue;
                    }
                };

                let event = if channel.ends_with(":presence") {
                    serde_json::from_str::<Vec<Collaborator>>(&payload).map(TransportEvent::Roster)
                } else {
                    serde_json::from_str::<CollaborationEvent>(&payload).map(TransportEvent::Remote)
                };
                let event = event.unwrap_or_else(|e| {
                    TransportEvent::Fault(format!("Malformed message on {channel}: {e}"))
                });

                if reader_events.send(event).await.is_err() {
                    return;
                }
            }
            debug!(%resume_id, "Pub/sub stream ended");
            let _ = reader_events
                .send(TransportEvent::Connection(ConnectionState::Disconnected))
                .await;
        });

        // Either the reader it replaces, or this one if the link is already gone.
        let stale = match self.link.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(link) => link.reader.replace(reader),
                None => Some(reader),
            },
            Err(_) => Some(reader),
        };
        if let Some(task) = stale {
            task.abort();
        }

        let entry = serde_json::to_string(presence)?;
        let _: i64 = conn
            .hset(members_key(resume_id), user_id.to_string(), entry)
            .await?;
        let _: i64 = conn.expire(members_key(resume_id), MEMBERS_TTL_SECS).await?;

        // `leave_room` ran while this join was in flight; undo the entry we just wrote.
        if self.is_closed() {
            let _: i64 = conn
                .hdel(members_key(resume_id), user_id.to_string())
                .await?;
            return Err(TransportError::Closed);
        }
        Self::publish_roster(&mut conn, resume_id).await?;

        info!(%resume_id, %user_id, "Joined collaboration room");
        Ok(())
    }

    async fn leave_room(&self, resume_id: Uuid, user_id: Uuid) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::SeqCst);

        // Dropping the link stops both background tasks.
        let link = self.link.lock().map_err(|_| TransportError::Closed)?.take();
        let existing = link.as_ref().map(|l| l.conn.clone());
        drop(link);

        // The link may never have come up, or may be gone after a drop.
        let mut conn = match existing {
            Some(conn) => conn,
            None => self.client.get_multiplexed_async_connection().await?,
        };
        let _: i64 = conn
            .hdel(members_key(resume_id), user_id.to_string())
            .await?;
        Self::publish_roster(&mut conn, resume_id).await?;

        info!(%resume_id, %user_id, "Left collaboration room");
        Ok(())
    }

    fn send(&self, event: &CollaborationEvent) -> Result<(), TransportError> {
        let payload = serde_json::to_string(event)?;
        let guard = self.link.lock().map_err(|_| TransportError::Closed)?;
        let link = guard.as_ref().ok_or(TransportError::NotConnected)?;
        link.outbound
            .send(Outbound {
                channel: events_channel(event.resume_id),
                payload,
            })
            .map_err(|_| TransportError::Closed)
    }
}
