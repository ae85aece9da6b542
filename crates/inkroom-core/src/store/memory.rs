//! In-memory Room Store for tests and single-process rooms.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::mpsc::{Sender, channel};

use super::{BoxFuture, RoomEvent, RoomEventReceiver, RoomStore, StoreError, StoreResult};
use crate::presence::UserPresence;
use crate::stroke::{Stroke, StrokePatch};

#[derive(Default)]
struct RoomData {
    strokes: Vec<Stroke>,
    presence: HashMap<String, UserPresence>,
    subscribers: Vec<Sender<RoomEvent>>,
}

impl RoomData {
    /// Push an event to every live subscriber, pruning closed channels.
    fn broadcast(&mut self, event: RoomEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// In-memory store. Everything lives behind one lock; subscriptions are
/// plain mpsc channels, so a dropped receiver unsubscribes itself on the
/// next broadcast.
#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: RwLock<HashMap<String, RoomData>>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_rooms<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, RoomData>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut rooms = self
            .rooms
            .write()
            .map_err(|e| StoreError::Other(format!("Lock error: {e}")))?;
        f(&mut rooms)
    }

    fn with_room<T>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut RoomData) -> StoreResult<T>,
    ) -> StoreResult<T> {
        self.with_rooms(|rooms| {
            let room = rooms
                .get_mut(room_id)
                .ok_or_else(|| StoreError::RoomNotFound(room_id.to_string()))?;
            f(room)
        })
    }
}

impl RoomStore for MemoryRoomStore {
    fn ensure_room(&self, room_id: &str) -> BoxFuture<'_, StoreResult<()>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_rooms(|rooms| {
                rooms.entry(room_id).or_default();
                Ok(())
            })
        })
    }

    fn fetch_strokes(&self, room_id: &str) -> BoxFuture<'_, StoreResult<Vec<Stroke>>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_room(&room_id, |room| {
                let mut strokes = room.strokes.clone();
                strokes.sort_by_key(|s| s.timestamp);
                Ok(strokes)
            })
        })
    }

    fn insert_stroke(&self, room_id: &str, stroke: Stroke) -> BoxFuture<'_, StoreResult<()>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_room(&room_id, |room| {
                room.strokes.push(stroke.clone());
                room.broadcast(RoomEvent::StrokeInserted(stroke));
                Ok(())
            })
        })
    }

    fn update_stroke(&self, stroke_id: &str, patch: StrokePatch) -> BoxFuture<'_, StoreResult<()>> {
        let stroke_id = stroke_id.to_string();
        Box::pin(async move {
            self.with_rooms(|rooms| {
                for room in rooms.values_mut() {
                    if let Some(stroke) = room.strokes.iter_mut().find(|s| s.id == stroke_id) {
                        stroke.apply_patch(&patch);
                        room.broadcast(RoomEvent::StrokeUpdated {
                            id: stroke_id,
                            patch,
                        });
                        return Ok(());
                    }
                }
                Err(StoreError::StrokeNotFound(stroke_id))
            })
        })
    }

    fn delete_stroke(&self, stroke_id: &str) -> BoxFuture<'_, StoreResult<()>> {
        let stroke_id = stroke_id.to_string();
        Box::pin(async move {
            self.with_rooms(|rooms| {
                for room in rooms.values_mut() {
                    let before = room.strokes.len();
                    room.strokes.retain(|s| s.id != stroke_id);
                    if room.strokes.len() != before {
                        room.broadcast(RoomEvent::StrokeDeleted(stroke_id));
                        return Ok(());
                    }
                }
                Err(StoreError::StrokeNotFound(stroke_id))
            })
        })
    }

    fn delete_all_strokes(&self, room_id: &str) -> BoxFuture<'_, StoreResult<()>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_room(&room_id, |room| {
                let ids: Vec<_> = room.strokes.drain(..).map(|s| s.id).collect();
                for id in ids {
                    room.broadcast(RoomEvent::StrokeDeleted(id));
                }
                Ok(())
            })
        })
    }

    fn subscribe(&self, room_id: &str) -> BoxFuture<'_, StoreResult<RoomEventReceiver>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_rooms(|rooms| {
                let room = rooms.entry(room_id).or_default();
                let (tx, rx) = channel();
                room.subscribers.push(tx);
                Ok(rx)
            })
        })
    }

    fn upsert_presence(
        &self,
        room_id: &str,
        presence: UserPresence,
    ) -> BoxFuture<'_, StoreResult<()>> {
        let room_id = room_id.to_string();
        Box::pin(async move {
            self.with_room(&room_id, |room| {
                room.presence.insert(presence.id.clone(), presence.clone());
                room.broadcast(RoomEvent::PresenceUpserted(presence));
                Ok(())
            })
        })
    }

    fn fetch_presence(
        &self,
        room_id: &str,
        excluding_user_id: &str,
    ) -> BoxFuture<'_, StoreResult<Vec<UserPresence>>> {
        let room_id = room_id.to_string();
        let excluding = excluding_user_id.to_string();
        Box::pin(async move {
            self.with_room(&room_id, |room| {
                Ok(room
                    .presence
                    .values()
                    .filter(|p| p.id != excluding)
                    .cloned()
                    .collect())
            })
        })
    }

    fn delete_presence(&self, user_id: &str) -> BoxFuture<'_, StoreResult<()>> {
        let user_id = user_id.to_string();
        Box::pin(async move {
            self.with_rooms(|rooms| {
                for room in rooms.values_mut() {
                    if room.presence.remove(&user_id).is_some() {
                        room.broadcast(RoomEvent::PresenceRemoved(user_id.clone()));
                    }
                }
                Ok(())
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::SessionIdentity;
    use crate::stroke::StrokeKind;
    use kurbo::Point;

    fn block_on<F: std::future::Future>(f: F) -> F::Output {
        // Simple blocking executor for tests
        use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

        fn dummy_raw_waker() -> RawWaker {
            fn no_op(_: *const ()) {}
            fn clone(_: *const ()) -> RawWaker {
                dummy_raw_waker()
            }
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, no_op, no_op, no_op);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(dummy_raw_waker()) };
        let mut cx = Context::from_waker(&waker);
        let mut f = std::pin::pin!(f);

        loop {
            match f.as_mut().poll(&mut cx) {
                Poll::Ready(result) => return result,
                Poll::Pending => {}
            }
        }
    }

    fn pen(timestamp: i64) -> Stroke {
        Stroke::new(
            StrokeKind::Pen,
            "#000000",
            2.0,
            vec![Point::ZERO],
            timestamp,
        )
    }

    #[test]
    fn test_ensure_room_is_idempotent() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();
        block_on(store.ensure_room("r")).unwrap();
        assert!(block_on(store.fetch_strokes("r")).unwrap().is_empty());
    }

    #[test]
    fn test_fetch_orders_by_timestamp() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();
        block_on(store.insert_stroke("r", pen(30))).unwrap();
        block_on(store.insert_stroke("r", pen(10))).unwrap();
        block_on(store.insert_stroke("r", pen(20))).unwrap();

        let strokes = block_on(store.fetch_strokes("r")).unwrap();
        let times: Vec<_> = strokes.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![10, 20, 30]);
    }

    #[test]
    fn test_unknown_room_errors() {
        let store = MemoryRoomStore::new();
        assert!(matches!(
            block_on(store.fetch_strokes("missing")),
            Err(StoreError::RoomNotFound(_))
        ));
    }

    #[test]
    fn test_subscription_receives_crud_events() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();
        let rx = block_on(store.subscribe("r")).unwrap();

        let stroke = pen(1);
        let id = stroke.id.clone();
        block_on(store.insert_stroke("r", stroke)).unwrap();
        block_on(store.update_stroke(&id, StrokePatch::color("#FF0000".to_string()))).unwrap();
        block_on(store.delete_stroke(&id)).unwrap();

        assert!(matches!(rx.try_recv(), Ok(RoomEvent::StrokeInserted(_))));
        assert!(matches!(rx.try_recv(), Ok(RoomEvent::StrokeUpdated { .. })));
        assert!(matches!(rx.try_recv(), Ok(RoomEvent::StrokeDeleted(_))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_pruned() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();
        let rx = block_on(store.subscribe("r")).unwrap();
        drop(rx);
        // Should not error even though the only subscriber is gone.
        block_on(store.insert_stroke("r", pen(1))).unwrap();
    }

    #[test]
    fn test_delete_all_strokes() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();
        block_on(store.insert_stroke("r", pen(1))).unwrap();
        block_on(store.insert_stroke("r", pen(2))).unwrap();
        block_on(store.delete_all_strokes("r")).unwrap();
        assert!(block_on(store.fetch_strokes("r")).unwrap().is_empty());
    }

    #[test]
    fn test_presence_excludes_self() {
        let store = MemoryRoomStore::new();
        block_on(store.ensure_room("r")).unwrap();

        let me = SessionIdentity::generate("me");
        let peer = SessionIdentity::generate("peer");
        block_on(store.upsert_presence("r", UserPresence::new(&me, 0))).unwrap();
        block_on(store.upsert_presence("r", UserPresence::new(&peer, 0))).unwrap();

        let others = block_on(store.fetch_presence("r", &me.user_id)).unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].id, peer.user_id);

        block_on(store.delete_presence(&peer.user_id)).unwrap();
        let others = block_on(store.fetch_presence("r", &me.user_id)).unwrap();
        assert!(others.is_empty());
    }
}
