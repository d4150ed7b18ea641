//! Per-object lifecycle state machine (spec §4.5).
//!
//! ```text
//!  —  --construct-->            NEW
//!  NEW --user free-->           destroyed immediately
//!  NEW --commit ack-->          OK
//!  OK  --observable mutation--> RENEW
//!  OK  --user free-->           DELETE
//!  RENEW --commit ack-->        OK
//!  RENEW --decommit ack-->      NEW (then recommitted same cycle)
//!  RENEW --user free-->         DELETE
//!  DELETE --decommit ack-->     destroyed
//! ```
//! `DELETE` is terminal and is never propagated from parent to child —
//! children only ever inherit `RENEW` (§4.5 invariant).

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectState {
    New,
    Ok,
    Renew,
    Delete,
}

impl ObjectState {
    /// Move from `OK` to `RENEW`. A no-op on `NEW`/`RENEW`/`DELETE` — in
    /// particular this is what makes no-op attribute assignments not dirty
    /// an already-dirty or not-yet-committed object (§4.3, §8 invariant 10).
    pub fn renew(&mut self) {
        if *self == ObjectState::Ok {
            *self = ObjectState::Renew;
        }
    }

    /// Propagate a parent's `RENEW` down to a child that is still `OK`.
    /// Monotone: never turns `OK` into anything but `RENEW`, and never
    /// touches `DELETE` (deletion is only ever set by explicit user free).
    pub fn propagate(from: ObjectState, to: &mut ObjectState) {
        if from == ObjectState::Renew && *to == ObjectState::Ok {
            *to = ObjectState::Renew;
        }
    }

    pub fn should_be_validated(self) -> bool {
        matches!(self, ObjectState::New | ObjectState::Renew)
    }

    pub fn will_be_deleted(self) -> bool {
        self == ObjectState::Delete
    }

    /// Commit-ack: `NEW`/`RENEW` settle into `OK`. Leaves `DELETE` objects
    /// alone (they are freed by the decommit sweep before ack ever runs).
    pub fn ack(&mut self) {
        if matches!(*self, ObjectState::New | ObjectState::Renew) {
            *self = ObjectState::Ok;
        }
    }

    /// Decommit-ack: returns `true` if this object needs a decommit
    /// callback this cycle. `DELETE` objects stay marked (the caller frees
    /// them after decommitting); `RENEW` objects reset to `NEW` so the
    /// recommit phase re-creates them from scratch.
    pub fn ack_uncommit(&mut self) -> bool {
        match *self {
            ObjectState::Delete => true,
            ObjectState::Renew => {
                *self = ObjectState::New;
                true
            }
            _ => false,
        }
    }

    /// `free()` semantics: `NEW` objects (never committed) are destroyed
    /// immediately by the caller; everything else is marked `DELETE` and
    /// deferred to the next commit's decommit sweep.
    pub fn mark_for_free(&mut self) -> bool {
        if *self == ObjectState::New {
            true
        } else {
            *self = ObjectState::Delete;
            false
        }
    }
}
