//! The per-thread pending-failure slot.
//!
//! Native routines cannot unwind through generated code, so they report
//! failures by parking them here and returning normally. Callers check the
//! slot once the native call is back.

use std::cell::RefCell;

use hotcall_diag::Failure;

thread_local! {
    static PENDING: RefCell<Option<Failure>> = const { RefCell::new(None) };
}

/// Report `failure` from a native routine. The first failure raised wins;
/// later ones are dropped until the slot is taken.
pub fn raise(failure: Failure) {
    PENDING.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_none() {
            *slot = Some(failure);
        }
    });
}

pub fn take_pending() -> Option<Failure> {
    PENDING.with(|slot| slot.borrow_mut().take())
}

pub fn has_pending() -> bool {
    PENDING.with(|slot| slot.borrow().is_some())
}
