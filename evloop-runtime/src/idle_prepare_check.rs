//! Idle, prepare, and check handles: three handle kinds that share the same
//! shape (no arguments beyond the handle, callback fires once per armed
//! iteration) and differ only in which phase of the driver runs them.

use crate::{
    error::{Error, Result},
    handle::{HandleId, HandleKind, PhaseState},
    loop_core::Loop,
};

macro_rules! phase_handle_api {
    ($init:ident, $start:ident, $stop:ident, $variant:ident, $run:ident) => {
        impl Loop {
            #[doc = concat!("Register a new, inactive ", stringify!($variant), " handle.")]
            pub fn $init(&self) -> HandleId {
                self.inner
                    .borrow_mut()
                    .registry
                    .init(HandleKind::$variant(PhaseState::default()))
            }

            #[doc = concat!("Arm `handle`'s ", stringify!($variant), " callback.")]
            pub fn $start(&self, handle: HandleId, callback: impl FnMut(HandleId) + 'static) -> Result<()> {
                {
                    let mut inner = self.inner.borrow_mut();
                    let rec = inner.registry.get_mut(handle).ok_or(Error::InvalidArgument)?;
                    match &mut rec.kind {
                        HandleKind::$variant(state) => state.callback = Some(Box::new(callback)),
                        _ => return Err(Error::InvalidArgument),
                    }
                }
                self.inner.borrow_mut().registry.start(handle)
            }

            #[doc = concat!("Disarm `handle`'s ", stringify!($variant), " callback.")]
            pub fn $stop(&self, handle: HandleId) -> Result<()> {
                self.inner.borrow_mut().registry.stop(handle)
            }

            pub(crate) fn $run(&self) {
                let ids: Vec<HandleId> = {
                    let inner = self.inner.borrow();
                    inner
                        .registry
                        .slab
                        .iter()
                        .filter_map(|(id, rec)| match &rec.kind {
                            HandleKind::$variant(_) if rec.flags.is_active() => Some(id),
                            _ => None,
                        })
                        .collect()
                };
                for id in ids {
                    let mut cb = {
                        let mut inner = self.inner.borrow_mut();
                        match inner.registry.get_mut(id) {
                            Some(rec) => match &mut rec.kind {
                                HandleKind::$variant(state) => state.callback.take(),
                                _ => None,
                            },
                            None => None,
                        }
                    };
                    if let Some(cb) = &mut cb {
                        cb(id);
                    }
                    let mut inner = self.inner.borrow_mut();
                    if let Some(rec) = inner.registry.get_mut(id) {
                        if let HandleKind::$variant(state) = &mut rec.kind {
                            if state.callback.is_none() {
                                state.callback = cb;
                            }
                        }
                    }
                }
            }
        }
    };
}

phase_handle_api!(idle_init, idle_start, idle_stop, Idle, run_idle_phase);
phase_handle_api!(prepare_init, prepare_start, prepare_stop, Prepare, run_prepare_phase);
phase_handle_api!(check_init, check_start, check_stop, Check, run_check_phase);
