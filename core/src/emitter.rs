//! Listener registry shared by the chunker and the orchestrator.
//!
//! An [`Emitter`] maps each event kind to an ordered list of listener
//! handles. Emitting clones the list for the event's kind first and calls the
//! snapshot, so listeners may register or remove listeners (including
//! themselves) while an event is being delivered; such changes take effect on
//! the next emission.
//!
//! # Example
//!
//! ```ignore
//! let emitter = Emitter::<ChunkEvent>::new();
//! let id = emitter.on(ChunkEventKind::BlockEnd, |event| {
//!     println!("block ended: {:?}", event.block_id());
//! });
//! emitter.off(ChunkEventKind::BlockEnd, id);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

/// An event that can be dispatched through an [`Emitter`].
pub trait Event {
    /// Discriminant used as the subscription key.
    type Kind: Copy + Eq + Hash + fmt::Debug;

    /// The kind of this event.
    fn kind(&self) -> Self::Kind;
}

/// Handle returned by [`Emitter::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A subscribed callback.
pub type Listener<E> = Rc<dyn Fn(&E)>;

/// Ordered listener lists keyed by event kind.
pub struct Emitter<E: Event> {
    next_id: Cell<u64>,
    listeners: RefCell<HashMap<E::Kind, Vec<(ListenerId, Listener<E>)>>>,
}

impl<E: Event> Emitter<E> {
    /// Create an emitter with no listeners.
    pub fn new() -> Self {
        Self {
            next_id: Cell::new(0),
            listeners: RefCell::new(HashMap::new()),
        }
    }

    /// Subscribe `listener` to events of `kind`.
    ///
    /// Listeners for one kind are called in registration order.
    pub fn on(&self, kind: E::Kind, listener: impl Fn(&E) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.listeners
            .borrow_mut()
            .entry(kind)
            .or_default()
            .push((id, Rc::new(listener)));
        id
    }

    /// Remove a listener. Returns `false` if it was not subscribed to `kind`.
    pub fn off(&self, kind: E::Kind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let Some(list) = listeners.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(listener_id, _)| *listener_id != id);
        before != list.len()
    }

    /// Number of listeners subscribed to `kind`.
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.listeners.borrow().get(&kind).map_or(0, Vec::len)
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Deliver `event` to a snapshot of the listeners for its kind.
    pub fn emit(&self, event: &E) {
        let snapshot: Vec<Listener<E>> = match self.listeners.borrow().get(&event.kind()) {
            Some(list) => list.iter().map(|(_, listener)| Rc::clone(listener)).collect(),
            None => return,
        };

        for listener in snapshot {
            listener(event);
        }
    }
}

impl<E: Event> Default for Emitter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Event> fmt::Debug for Emitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.borrow();
        let mut map = f.debug_map();
        for (kind, list) in listeners.iter() {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Kind {
        Ping,
        Pong,
    }

    #[derive(Debug)]
    struct Msg(Kind, u32);

    impl Event for Msg {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.0
        }
    }

    #[test]
    fn test_emit_in_registration_order() {
        let emitter = Emitter::<Msg>::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = Rc::clone(&seen);
            emitter.on(Kind::Ping, move |msg| seen.borrow_mut().push((tag, msg.1)));
        }
        let pong_seen = Rc::clone(&seen);
        emitter.on(Kind::Pong, move |msg| pong_seen.borrow_mut().push(("pong", msg.1)));

        emitter.emit(&Msg(Kind::Ping, 1));
        emitter.emit(&Msg(Kind::Pong, 2));

        assert_eq!(
            *seen.borrow(),
            vec![("first", 1), ("second", 1), ("pong", 2)]
        );
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let emitter = Emitter::<Msg>::new();
        let count = Rc::new(Cell::new(0));

        let c = Rc::clone(&count);
        let id = emitter.on(Kind::Ping, move |_| c.set(c.get() + 1));
        let c = Rc::clone(&count);
        emitter.on(Kind::Ping, move |_| c.set(c.get() + 10));

        assert!(!emitter.off(Kind::Pong, id));
        assert!(emitter.off(Kind::Ping, id));
        assert!(!emitter.off(Kind::Ping, id));
        assert_eq!(emitter.listener_count(Kind::Ping), 1);

        emitter.emit(&Msg(Kind::Ping, 0));
        assert_eq!(count.get(), 10);
    }

    #[test]
    fn test_changes_during_emit_apply_next_time() {
        let emitter = Rc::new(Emitter::<Msg>::new());
        let calls = Rc::new(RefCell::new(Vec::new()));

        let weak = Rc::downgrade(&emitter);
        let c = Rc::clone(&calls);
        let self_id = Rc::new(Cell::new(None));
        let self_id_inner = Rc::clone(&self_id);
        let id = emitter.on(Kind::Ping, move |msg| {
            c.borrow_mut().push(("once", msg.1));
            if let (Some(emitter), Some(id)) = (weak.upgrade(), self_id_inner.get()) {
                emitter.off(Kind::Ping, id);
                let c = Rc::clone(&c);
                emitter.on(Kind::Ping, move |msg| c.borrow_mut().push(("late", msg.1)));
            }
        });
        self_id.set(Some(id));

        let c = Rc::clone(&calls);
        emitter.on(Kind::Ping, move |msg| c.borrow_mut().push(("stable", msg.1)));

        emitter.emit(&Msg(Kind::Ping, 1));
        emitter.emit(&Msg(Kind::Ping, 2));

        assert_eq!(
            *calls.borrow(),
            vec![("once", 1), ("stable", 1), ("stable", 2), ("late", 2)]
        );
    }

    #[test]
    fn test_clear() {
        let emitter = Emitter::<Msg>::new();
        emitter.on(Kind::Ping, |_| {});
        emitter.on(Kind::Pong, |_| {});
        emitter.clear();
        assert_eq!(emitter.listener_count(Kind::Ping), 0);
        assert_eq!(emitter.listener_count(Kind::Pong), 0);
    }
}
