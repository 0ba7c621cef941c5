//! A total order on events adequate for cutoff detection: when two events
//! carry the same state fingerprint, the smaller one in this order is kept
//! and the larger one is marked cutoff. The order refines causality, so a
//! cutoff can never be a cause of its representative.
//!
//! The order compares, in turn: local-configuration size, the sorted
//! multiset of events (Parikh vector), and the Foata normal form (layers of
//! causally minimal events).

use std::cmp::Ordering;

use crate::comb::Comb;
use crate::event::EventId;
use crate::unfolding::Unfolding;

/// `true` iff `a` precedes `b` in the adequate total order.
pub fn adequate_less(unfolding: &Unfolding, a: EventId, b: EventId) -> bool {
    let asize = unfolding.local_configuration_size(a);
    let bsize = unfolding.local_configuration_size(b);
    if asize != bsize {
        return asize < bsize;
    }

    let apv = parikh_vector(unfolding, a);
    let bpv = parikh_vector(unfolding, b);
    match compare_parikh(unfolding, &apv, &bpv) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => foata_less(unfolding, &apv, &bpv),
    }
}

/// A total order on single events: depth, kind, lock id, cond id, thread,
/// predecessor count, then predecessors lexicographically, with the arena
/// index as the final tie breaker.
pub(crate) fn event_total_cmp(unfolding: &Unfolding, a: EventId, b: EventId) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let ea = &unfolding[a];
    let eb = &unfolding[b];

    ea.depth()
        .cmp(&eb.depth())
        .then_with(|| ea.kind().cmp(&eb.kind()))
        .then_with(|| {
            let la = ea.lid().map_or(0, |l| l.0);
            let lb = eb.lid().map_or(0, |l| l.0);
            la.cmp(&lb)
        })
        .then_with(|| {
            let ca = ea.cid().map_or(0, |c| c.0);
            let cb = eb.cid().map_or(0, |c| c.0);
            ca.cmp(&cb)
        })
        .then_with(|| ea.tid().cmp(eb.tid()))
        .then_with(|| {
            let pa = ea.immediate_predecessors();
            let pb = eb.immediate_predecessors();
            pa.len().cmp(&pb.len()).then_with(|| {
                for (&x, &y) in pa.iter().zip(&pb) {
                    match event_total_cmp(unfolding, x, y) {
                        Ordering::Equal => continue,
                        other => return other,
                    }
                }
                Ordering::Equal
            })
        })
        .then_with(|| a.cmp(&b))
}

fn parikh_vector(unfolding: &Unfolding, event: EventId) -> Vec<EventId> {
    let mut events: Vec<EventId> = unfolding.local_configuration(event, true).collect();
    events.sort_by(|&x, &y| event_total_cmp(unfolding, x, y));
    events
}

fn compare_parikh(unfolding: &Unfolding, a: &[EventId], b: &[EventId]) -> Ordering {
    for (&x, &y) in a.iter().zip(b) {
        match event_total_cmp(unfolding, x, y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    a.len().cmp(&b.len())
}

/// Compares the Foata normal forms layer by layer. Each layer is the set of
/// causally minimal events remaining, itself compared as a Parikh vector.
fn foata_less(unfolding: &Unfolding, a: &[EventId], b: &[EventId]) -> bool {
    let mut layers_a = foata_layers(unfolding, a);
    let mut layers_b = foata_layers(unfolding, b);

    for (la, lb) in layers_a.iter_mut().zip(&mut layers_b) {
        la.sort_by(|&x, &y| event_total_cmp(unfolding, x, y));
        lb.sort_by(|&x, &y| event_total_cmp(unfolding, x, y));
        match compare_parikh(unfolding, la, lb) {
            Ordering::Less => return true,
            Ordering::Greater => return false,
            Ordering::Equal => continue,
        }
    }
    false
}

fn foata_layers(unfolding: &Unfolding, events: &[EventId]) -> Vec<Vec<EventId>> {
    let mut comb = Comb::new();
    for &event in events {
        comb.insert(unfolding, event);
    }

    let mut layers = Vec::new();
    while !comb.is_empty() {
        let layer = comb.min(unfolding);
        comb.remove_all(unfolding, layer.iter().copied());
        layers.push(layer);
    }
    layers
}
