
use std::collections::{BTreeMap, BTreeSet};

use echoes_core::log::LogView;
use echoes_core::{EventIdentifier, EventLog, SequenceNumber, SiteIdentifier};
use generators::*;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Insert(EventIdentifier, Vec<u8>),
    Remove(EventIdentifier),
    Acknowledge(EventIdentifier),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (arb_id(), arb_payload()).prop_map(|(id, payload)| Op::Insert(id, payload)),
        2 => arb_id().prop_map(Op::Remove),
        1 => arb_id().prop_map(Op::Acknowledge),
    ]
}

/// Reference model: a sorted map plus the expected sequence number of
/// every site ever seen.
#[derive(Debug, Default)]
struct Model {
    events: BTreeMap<EventIdentifier, Vec<u8>>,
    expected: BTreeMap<SiteIdentifier, SequenceNumber>,
}

impl Model {
    fn observe(&mut self, id: EventIdentifier) {
        let expected = self.expected.entry(id.site()).or_insert(SequenceNumber::MIN);
        *expected = (*expected).max(id.seqno().inc());
    }
}

fn apply(log: &mut EventLog, model: &mut Model, op: Op) -> Result<(), TestCaseError> {
    match op {
        Op::Insert(id, payload) => {
            let inserted = log.insert(id.seqno(), id.site(), &payload).unwrap();
            let fresh = !model.events.contains_key(&id);
            prop_assert_eq!(inserted, fresh);
            if fresh {
                model.events.insert(id, payload);
            }
            model.observe(id);
        }
        Op::Remove(id) => {
            let removed = log.remove(id.seqno(), id.site()).unwrap();
            prop_assert_eq!(removed, model.events.remove(&id).is_some());
        }
        Op::Acknowledge(id) => {
            log.acknowledge(id.seqno(), id.site());
            model.observe(id);
        }
    }
    Ok(())
}

fn check(log: &EventLog, model: &Model) -> Result<(), TestCaseError> {
    prop_assert_eq!(log.len(), model.events.len());
    prop_assert_eq!(
        log.payload_bytes(),
        model.events.values().map(Vec::len).sum::<usize>()
    );

    let global: Vec<(EventIdentifier, Vec<u8>)> = log
        .events()
        .map(|event| (event.id, event.payload().into_owned()))
        .collect();
    let expected: Vec<(EventIdentifier, Vec<u8>)> = model
        .events
        .iter()
        .map(|(id, payload)| (*id, payload.clone()))
        .collect();
    prop_assert_eq!(&global, &expected);
    prop_assert_eq!(log.last_id(), model.events.keys().next_back().copied());

    let sites: BTreeSet<SiteIdentifier> = log.sites().collect();
    for site in &sites {
        let of_site: Vec<EventIdentifier> = log.events_of(*site).map(|event| event.id).collect();
        let expected: Vec<EventIdentifier> = model
            .events
            .keys()
            .filter(|id| id.site() == *site)
            .copied()
            .collect();
        prop_assert_eq!(of_site, expected);
        prop_assert_eq!(
            log.expected(*site),
            model.expected.get(site).copied().unwrap_or(SequenceNumber::MIN)
        );
    }
    for site in model.expected.keys() {
        prop_assert!(sites.contains(site));
    }
    prop_assert_eq!(
        log.expected_any(),
        model.expected.values().copied().max().unwrap_or(SequenceNumber::MIN)
    );

    for (id, payload) in &model.events {
        prop_assert!(log.contains(id.seqno(), id.site()));
        let got = log.get(id.seqno(), id.site());
        prop_assert_eq!(got.as_ref(), Some(payload));
    }
    Ok(())
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(1000))]

    #[test]
    fn log_matches_sorted_map(ops in prop::collection::vec(arb_op(), 0..60)) {
        let mut log = EventLog::new();
        let mut model = Model::default();
        for op in ops {
            apply(&mut log, &mut model, op)?;
            check(&log, &model)?;
        }
    }

    #[test]
    fn insertion_order_does_not_matter((first, second) in arb_event_permutations()) {
        let mut a = EventLog::new();
        let mut b = EventLog::new();
        for (id, payload) in &first {
            a.insert(id.seqno(), id.site(), payload).unwrap();
        }
        for (id, payload) in &second {
            b.insert(id.seqno(), id.site(), payload).unwrap();
        }
        prop_assert_eq!(&a, &b);
    }

    #[test]
    fn reverse_iteration_mirrors_forward(events in arb_events()) {
        let mut log = EventLog::new();
        for (id, payload) in &events {
            log.insert(id.seqno(), id.site(), payload).unwrap();
        }
        let forward: Vec<EventIdentifier> = log.events().map(|event| event.id).collect();
        let mut backward: Vec<EventIdentifier> = log.events().rev().map(|event| event.id).collect();
        backward.reverse();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn global_cursor_walks_the_global_view(events in arb_events()) {
        let mut log = EventLog::new();
        for (id, payload) in &events {
            log.insert(id.seqno(), id.site(), payload).unwrap();
        }
        let mut cursor = log.cursor_at_start(LogView::Global);
        let mut walked = Vec::new();
        while log.has_next(&cursor).unwrap() {
            walked.push(log.move_next(&mut cursor).unwrap());
        }
        let iterated: Vec<_> = log.events().map(|event| event.to_record()).collect();
        prop_assert_eq!(walked, iterated);
    }

    #[test]
    fn merge_is_union(left in arb_events(), right in arb_events()) {
        let mut a = EventLog::new();
        for (id, payload) in &left {
            a.insert(id.seqno(), id.site(), payload).unwrap();
        }
        let mut b = EventLog::new();
        for (id, payload) in &right {
            b.insert(id.seqno(), id.site(), payload).unwrap();
        }

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        let ids = |log: &EventLog| log.events().map(|event| event.id).collect::<BTreeSet<_>>();
        prop_assert_eq!(ids(&ab), ids(&ba));
        let union: BTreeSet<EventIdentifier> = ids(&a).union(&ids(&b)).copied().collect();
        prop_assert_eq!(ids(&ab), union);

        let before = ab.len();
        ab.merge(&b).unwrap();
        prop_assert_eq!(ab.len(), before);
    }
}

#[test]
fn site_cursor_removes_through_the_cursor() {
    let site = SiteIdentifier::new(7).unwrap();
    let other = SiteIdentifier::new(8).unwrap();
    let mut log = EventLog::new();
    for seqno in 0..4 {
        let seqno = SequenceNumber::new(seqno).unwrap();
        log.insert(seqno, site, b"s").unwrap();
        log.insert(seqno, other, b"o").unwrap();
    }

    let mut cursor = log.cursor_at_start(LogView::Site(site));
    log.move_next(&mut cursor).unwrap();
    let removed = log.remove_at(&mut cursor).unwrap();
    assert_eq!(removed.id.seqno(), SequenceNumber::new(1).unwrap());
    let left: Vec<u32> = log.events_of(site).map(|event| event.id.seqno().get()).collect();
    assert_eq!(left, vec![0, 2, 3]);
    assert_eq!(log.events_of(other).len(), 4);
    assert_eq!(log.len(), 7);

    // The cursor survives its own edit.
    assert!(log.has_next(&cursor).unwrap());
}
