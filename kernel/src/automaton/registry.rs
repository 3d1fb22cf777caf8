//! The automaton registry: a single id-keyed table owning every live
//! automaton. Grounded on the global automaton table in
//! `automaton_manager.hpp`, using the same `GlobalState`/`spin::Mutex`
//! pattern as [`crate::mm::frame::manager`] and
//! [`crate::log_service`]'s `LOG_SERVICE`.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use super::action::{ActionKind, Caction, ParameterMode};
use super::automaton::Automaton;
use super::AutomatonId;
use crate::error::{KernelError, KernelResult};

struct RegistryInner {
    automata: BTreeMap<u32, Automaton>,
    next_id: u32,
}

impl RegistryInner {
    const fn new() -> Self {
        Self {
            automata: BTreeMap::new(),
            next_id: 1,
        }
    }
}

pub struct AutomatonRegistry {
    inner: Mutex<RegistryInner>,
}

impl AutomatonRegistry {
    const fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner::new()),
        }
    }

    pub fn create(&self, automaton: impl FnOnce(AutomatonId) -> Automaton) -> AutomatonId {
        let mut inner = self.inner.lock();
        let id = AutomatonId(inner.next_id);
        inner.next_id = inner.next_id.wrapping_add(1).max(1);
        let a = automaton(id);
        inner.automata.insert(id.0, a);
        id
    }

    pub fn exists(&self, id: AutomatonId) -> bool {
        self.inner.lock().automata.contains_key(&id.0)
    }

    pub fn with<R>(&self, id: AutomatonId, f: impl FnOnce(&Automaton) -> R) -> Option<R> {
        self.inner.lock().automata.get(&id.0).map(f)
    }

    pub fn with_mut<R>(&self, id: AutomatonId, f: impl FnOnce(&mut Automaton) -> R) -> Option<R> {
        self.inner.lock().automata.get_mut(&id.0).map(f)
    }

    /// Register a binding between an output action of one automaton and
    /// an input action of another, requested on behalf of `owner`.
    /// Implements the invariants from `SPEC_FULL.md` §4.4: cross-
    /// automaton, matching parameter-mode descriptors, at most one output
    /// per input, no duplicate output-to-same-automaton binding.
    pub fn bind(&self, owner: AutomatonId, output: Caction, input: Caction) -> KernelResult<()> {
        if output.automaton == input.automaton {
            return Err(KernelError::BindingRejected);
        }
        if output.paction.kind != ActionKind::Output {
            return Err(KernelError::BindingRejected);
        }
        if input.paction.kind != ActionKind::Input {
            return Err(KernelError::BindingRejected);
        }
        if output.paction.parameter_mode != input.paction.parameter_mode {
            return Err(KernelError::BindingRejected);
        }

        let mut inner = self.inner.lock();

        {
            let out_automaton = inner
                .automata
                .get(&output.automaton.0)
                .ok_or(KernelError::AutomatonNotFound { id: output.automaton.0 })?;
            if out_automaton.action_by_entry(output.paction.entry_point).is_none() {
                return Err(KernelError::BindingRejected);
            }
            if out_automaton.output_already_bound_to(&output, input.automaton) {
                return Err(KernelError::BindingRejected);
            }
        }
        {
            let in_automaton = inner
                .automata
                .get(&input.automaton.0)
                .ok_or(KernelError::AutomatonNotFound { id: input.automaton.0 })?;
            if in_automaton.action_by_entry(input.paction.entry_point).is_none() {
                return Err(KernelError::BindingRejected);
            }
            if in_automaton.input_is_bound(&input) {
                return Err(KernelError::BindingRejected);
            }
        }

        let mode = output.paction.parameter_mode;
        let mut bound_output = output.clone();
        bound_output.parameter = mode.adjust(bound_output.parameter, input.automaton);
        let mut bound_input = input.clone();
        bound_input.parameter = mode.adjust(bound_input.parameter, output.automaton);

        if let Some(out_automaton) = inner.automata.get_mut(&output.automaton.0) {
            out_automaton.add_bound_output(&bound_output, bound_input.clone());
        }
        if let Some(in_automaton) = inner.automata.get_mut(&input.automaton.0) {
            in_automaton.add_bound_input(&bound_input, bound_output.clone());
        }
        if let Some(owner_automaton) = inner.automata.get_mut(&owner.0) {
            owner_automaton.record_owned_binding(bound_output, bound_input);
        }

        Ok(())
    }

    /// Destroy an automaton: release every binding it owns or appears in,
    /// unmap and decref its memory map, destroy its buffers, and remove
    /// it from the table. Never fails once the id is found — per
    /// `SPEC_FULL.md` §9's resolved Open Question, this always succeeds,
    /// no assertion.
    pub fn destroy(&self, id: AutomatonId) -> KernelResult<()> {
        let mut inner = self.inner.lock();
        let mut victim = inner
            .automata
            .remove(&id.0)
            .ok_or(KernelError::AutomatonNotFound { id: id.0 })?;

        // Bindings the victim owns but isn't itself an endpoint of must be
        // released here too, since both endpoints survive and neither one
        // will ever hear about this otherwise.
        let third_party: Vec<(Caction, Caction)> =
            victim.owned_bindings().iter().filter(|(o, i)| o.automaton != id && i.automaton != id).cloned().collect();
        for (output, input) in &third_party {
            if let Some(out_automaton) = inner.automata.get_mut(&output.automaton.0) {
                out_automaton.remove_output_binding(&super::automaton::key_of(output), input.automaton);
            }
            if let Some(in_automaton) = inner.automata.get_mut(&input.automaton.0) {
                in_automaton.remove_input_binding(&super::automaton::key_of(input));
            }
        }

        for other in inner.automata.values_mut() {
            other.drain_references_to(id);
        }

        let _ = victim.teardown();
        Ok(())
    }

    pub fn automaton_count(&self) -> usize {
        self.inner.lock().automata.len()
    }
}

static REGISTRY: AutomatonRegistry = AutomatonRegistry::new();

pub fn registry() -> &'static AutomatonRegistry {
    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::action::Paction;
    use crate::mm::{FrameNumber, VirtualAddress};

    fn paction(kind: ActionKind, entry: usize) -> Paction {
        Paction::new(kind, ParameterMode::AutoIdentity, entry, 0, alloc::format!("a{entry}"), "")
    }

    fn make(reg: &AutomatonRegistry) -> AutomatonId {
        reg.create(|id| Automaton::new(id, FrameNumber(0), false, VirtualAddress::new(0x8000_0000)))
    }

    #[test]
    fn bind_rejects_self_binding() {
        let reg = AutomatonRegistry::new();
        let a = make(&reg);
        reg.with_mut(a, |au| au.register_action(paction(ActionKind::Output, 0x1000)).unwrap());
        reg.with_mut(a, |au| au.register_action(paction(ActionKind::Input, 0x2000)).unwrap());
        let out = Caction::new(a, paction(ActionKind::Output, 0x1000), 0);
        let inp = Caction::new(a, paction(ActionKind::Input, 0x2000), 0);
        assert!(matches!(reg.bind(a, out, inp), Err(KernelError::BindingRejected)));
    }

    #[test]
    fn bind_succeeds_cross_automaton_and_updates_both_tables() {
        let reg = AutomatonRegistry::new();
        let a = make(&reg);
        let b = make(&reg);
        reg.with_mut(a, |au| au.register_action(paction(ActionKind::Output, 0x1000)).unwrap());
        reg.with_mut(b, |au| au.register_action(paction(ActionKind::Input, 0x2000)).unwrap());
        let out = Caction::new(a, paction(ActionKind::Output, 0x1000), 0);
        let inp = Caction::new(b, paction(ActionKind::Input, 0x2000), 0);
        reg.bind(a, out, inp).unwrap();
        assert_eq!(reg.with(a, |au| au.binding_count()).unwrap(), 1);
        assert_eq!(reg.with(b, |au| au.binding_count()).unwrap(), 1);
    }

    #[test]
    fn bind_rejects_input_already_bound_to_another_output() {
        let reg = AutomatonRegistry::new();
        let a = make(&reg);
        let b = make(&reg);
        let c = make(&reg);
        reg.with_mut(a, |au| au.register_action(paction(ActionKind::Output, 0x1000)).unwrap());
        reg.with_mut(b, |au| au.register_action(paction(ActionKind::Output, 0x1000)).unwrap());
        reg.with_mut(c, |au| au.register_action(paction(ActionKind::Input, 0x2000)).unwrap());

        let out_a = Caction::new(a, paction(ActionKind::Output, 0x1000), 0);
        let out_b = Caction::new(b, paction(ActionKind::Output, 0x1000), 0);
        let inp = Caction::new(c, paction(ActionKind::Input, 0x2000), 0);

        reg.bind(a, out_a, inp.clone()).unwrap();
        let before = reg.with(c, |au| au.binding_count()).unwrap();

        let result = reg.bind(b, out_b, inp);
        assert!(matches!(result, Err(KernelError::BindingRejected)));
        assert_eq!(reg.with(c, |au| au.binding_count()).unwrap(), before);
        assert_eq!(reg.with(a, |au| au.binding_count()).unwrap(), 1);
        assert_eq!(reg.with(b, |au| au.binding_count()).unwrap(), 0);
    }

    #[test]
    fn destroy_purges_bindings_from_the_other_side() {
        let reg = AutomatonRegistry::new();
        let a = make(&reg);
        let b = make(&reg);
        reg.with_mut(a, |au| au.register_action(paction(ActionKind::Output, 0x1000)).unwrap());
        reg.with_mut(b, |au| au.register_action(paction(ActionKind::Input, 0x2000)).unwrap());
        let out = Caction::new(a, paction(ActionKind::Output, 0x1000), 0);
        let inp = Caction::new(b, paction(ActionKind::Input, 0x2000), 0);
        reg.bind(a, out, inp).unwrap();
        reg.destroy(a).unwrap();
        assert_eq!(reg.with(b, |au| au.binding_count()).unwrap(), 0);
        assert!(!reg.exists(a));
    }
}
