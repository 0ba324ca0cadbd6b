//! The phase engine: APPLY once, then rounds of READ (with the
//! class-request fixpoint) and WRITE, with phase and gate state scoped
//! around every step.

use crate::{
    capture::PendingRef,
    error::Error,
    schedule,
    transformer::{ClassView, Cx, Queued, Transformer, WriteOp},
    Processor,
};
use std::{
    cell::RefCell,
    collections::HashMap,
    mem,
    sync::Arc,
    thread,
};
use tracing::{debug, instrument, trace};

/// Processing phase. Every transformer-facing operation is legal in exactly
/// one of these.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Between runs; only driver operations are legal.
    Idle,
    /// Transformers declare dependencies, single-threaded.
    Apply,
    /// Transformers observe trees and schedule work, gate closed.
    Read,
    /// The engine applies writes, gate open, sharded by class.
    Write,
}

thread_local! {
    /// The class whose writes this worker is applying. Mutations refuse
    /// targets rooted anywhere else.
    static WRITING_CLASS: RefCell<Option<String>> = RefCell::new(None);
}

impl Processor {
    #[instrument(level = "info", skip(self), fields(transformers = self.transformers.len(), classes = self.classes.len()))]
    pub(crate) fn run(&mut self) -> crate::Result<()> {
        self.run_apply()?;

        let transformer_ids: Vec<String> =
            self.transformers.iter().map(|t| t.id().to_string()).collect();
        let rounds = schedule::rounds(
            &transformer_ids,
            &self.anchors,
            &self.round_dependents.lock(),
        )?;
        let write_ranks =
            schedule::layer_depths(&transformer_ids, &self.write_dependents.lock())?;

        for (index, round) in rounds.iter().enumerate() {
            debug!(index, members = ?round, "running round");
            self.run_read(round)?;
            self.run_write(&write_ranks)?;
        }
        Ok(())
    }

    pub(crate) fn phase(&self) -> Phase {
        *self.current_phase.lock()
    }

    fn enter_phase(&self, next: Phase) -> impl Drop + '_ {
        trace!(?next, "phase transition");
        let previous = mem::replace(&mut *self.current_phase.lock(), next);
        scopeguard::guard(self, move |p| *p.current_phase.lock() = previous)
    }

    /// Every transformer's `apply` runs once, sequentially, before any
    /// round.
    fn run_apply(&self) -> crate::Result<()> {
        let _phase = self.enter_phase(Phase::Apply);
        for transformer in &self.transformers {
            let cx = Cx::new(self, transformer.id());
            transformer.apply(&cx)?;
        }
        Ok(())
    }

    /// Fans the round's transformers out in parallel, then drains queued
    /// class requests in waves until a whole wave requests nothing new.
    fn run_read(&self, round: &[String]) -> crate::Result<()> {
        let _phase = self.enter_phase(Phase::Read);

        let by_id: HashMap<&str, &Arc<dyn Transformer>> =
            self.transformers.iter().map(|t| (t.id(), t)).collect();
        let members: Vec<&Arc<dyn Transformer>> =
            round.iter().filter_map(|id| by_id.get(id.as_str()).copied()).collect();
        self.fan_out(members, |transformer| {
            let cx = Cx::new(self, transformer.id());
            transformer.read(&cx)
        })?;

        loop {
            let wave = mem::take(&mut *self.requested.lock());
            if wave.is_empty() {
                break;
            }
            trace!(classes = wave.len(), "draining requested classes");
            let shards: Vec<(String, Vec<Queued>)> = wave.into_iter().collect();
            self.fan_out(shards, |(name, callbacks)| self.read_class(&name, callbacks))?;
        }
        Ok(())
    }

    /// Runs one class's queued callbacks in submission order on the
    /// provider's current tree.
    fn read_class(&self, name: &str, callbacks: Vec<Queued>) -> crate::Result<()> {
        let provider = self
            .classes
            .get(name)
            .ok_or_else(|| Error::UnknownClass(name.to_string()))?;
        let tree = provider.lock().get(self.frontend.as_ref(), &self.gate)?;
        let tree = tree.lock();
        for Queued { transformer, run } in callbacks {
            let cx = Cx::new(self, &transformer);
            let view = ClassView::new(name, &tree, &cx);
            run(&view)?;
        }
        Ok(())
    }

    /// Applies the scheduled writes, sharded by class, with the gate open.
    /// Reference captures resolve before any write executes; within a class
    /// writes apply in submission order refined by the write-dependency
    /// layers.
    fn run_write(&self, ranks: &HashMap<String, usize>) -> crate::Result<()> {
        let _phase = self.enter_phase(Phase::Write);
        let _open = self.gate.open_scope();

        let writes = mem::take(&mut *self.writes.lock());
        let mut captures = mem::take(&mut *self.ref_captures.lock());
        if writes.is_empty() {
            return Ok(());
        }

        let shards: Vec<(String, Vec<WriteOp>, Vec<PendingRef>)> = writes
            .into_iter()
            .map(|(name, mut ops)| {
                ops.sort_by_key(|op| ranks.get(op.transformer()).copied().unwrap_or(0));
                let refs = captures.remove(&name).unwrap_or_default();
                (name, ops, refs)
            })
            .collect();
        let written: Vec<String> = shards.iter().map(|(name, ..)| name.clone()).collect();

        self.fan_out(shards, |(name, ops, refs)| self.write_class(&name, ops, refs))?;

        let mut modified = self.modified.lock();
        let mut info_cache = self.info_cache.lock();
        for name in written {
            debug!(class = %name, "modified");
            info_cache.remove(&name);
            modified.insert(name);
        }
        Ok(())
    }

    fn write_class(
        &self,
        name: &str,
        ops: Vec<WriteOp>,
        refs: Vec<PendingRef>,
    ) -> crate::Result<()> {
        let provider = self
            .classes
            .get(name)
            .ok_or_else(|| Error::UnknownClass(name.to_string()))?;
        let tree = provider.lock().promote(self.frontend.as_ref(), &self.gate)?;
        let mut tree = tree.lock();

        WRITING_CLASS.with(|current| *current.borrow_mut() = Some(name.to_string()));
        let _clear = scopeguard::guard((), |()| {
            WRITING_CLASS.with(|current| current.borrow_mut().take());
        });

        for pending in &refs {
            pending.resolve(&tree)?;
        }
        for op in ops {
            let target_class = op.class_name().to_string();
            let writing = WRITING_CLASS.with(|current| current.borrow().clone());
            if writing.as_deref() != Some(target_class.as_str()) {
                return Err(Error::WrongClass {
                    target: target_class,
                    current: writing.unwrap_or_default(),
                });
            }
            match op {
                WriteOp::Node { target, supply, .. } => {
                    let node = target.resolve(&tree)?;
                    let replacement = supply();
                    tree.copy_from(node, &replacement)?;
                }
                WriteOp::Slice { target, supply, .. } => {
                    let (list, start, end) = target.resolve(&tree)?;
                    let replacement = supply();
                    tree.remove(list, start, end)?;
                    tree.insert_copy(list, start, &replacement)?;
                }
            }
        }
        Ok(())
    }

    /// Runs one closure per item on its own worker and surfaces the first
    /// error after every worker has finished.
    fn fan_out<T: Send>(
        &self,
        items: Vec<T>,
        run: impl Fn(T) -> crate::Result<()> + Sync,
    ) -> crate::Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let (errors_tx, errors) = crossbeam_channel::unbounded();
        let run = &run;
        thread::scope(|scope| {
            for item in items {
                let errors_tx = errors_tx.clone();
                scope.spawn(move || {
                    if let Err(error) = run(item) {
                        let _ = errors_tx.send(error);
                    }
                });
            }
        });
        drop(errors_tx);
        match errors.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }
}
