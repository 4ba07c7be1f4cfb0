//! Property tests for token issue and queued handler mutation

use orrery_host::{
    CallbackId, ContextId, EventHandlerTable, HandlerFilter, HandlerId, HandlerState, TokenIssuer,
};
use proptest::prelude::*;
use std::collections::HashSet;

#[derive(Debug, Clone)]
enum Op {
    Add,
    Remove(usize),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Add), (0usize..16).prop_map(Op::Remove)]
}

proptest! {
    #[test]
    fn issued_tokens_are_unique_and_never_first(start in any::<u64>(), count in 1usize..256) {
        let mut issuer = TokenIssuer::starting_at(start);
        let mut seen = HashSet::new();
        for _ in 0..count {
            let token = issuer.issue();
            prop_assert!(!token.is_first());
            prop_assert!(seen.insert(token));
        }
    }

    #[test]
    fn flush_applies_adds_before_deletes(
        initial in 0usize..6,
        ops in prop::collection::vec(op(), 0..24),
    ) {
        let mut table = EventHandlerTable::new();
        let mut known: Vec<HandlerId> = (0..initial)
            .map(|n| table.register(HandlerFilter::any(), CallbackId(n as u64), ContextId::ROOT))
            .collect();
        let mut removed = HashSet::new();

        table.begin_pass();
        for (step, op) in ops.iter().enumerate() {
            match op {
                Op::Add => known.push(table.register(
                    HandlerFilter::any(),
                    CallbackId(100 + step as u64),
                    ContextId::ROOT,
                )),
                Op::Remove(index) => {
                    if known.is_empty() {
                        continue;
                    }
                    let id = known[index % known.len()];
                    prop_assert_eq!(table.request_remove(id), removed.insert(id));
                }
            }
        }
        prop_assert_eq!(table.queued_deletes(), removed.len());
        table.end_pass();
        table.flush();

        let live: HashSet<HandlerId> = table.handlers().map(|handler| handler.id()).collect();
        let expected: HashSet<HandlerId> = known
            .iter()
            .copied()
            .filter(|id| !removed.contains(id))
            .collect();
        prop_assert_eq!(live, expected);
        prop_assert_eq!(table.take_released().len(), removed.len());
        for id in &removed {
            prop_assert_eq!(table.state(*id), HandlerState::Cleared);
        }
        prop_assert_eq!(table.queued_adds(), 0);
        prop_assert_eq!(table.queued_deletes(), 0);
    }
}
