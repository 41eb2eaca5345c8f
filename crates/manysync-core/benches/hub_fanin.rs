use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use manysync_core::hub::Hub;
use manysync_core::memory::{MemoryChange, MemoryDoc, MemoryEngine};
use manysync_core::{DocumentEngine, Incoming, Message, MessageSink, PeerSink, VectorClock};
use serde_json::json;

type Msg = Message<MemoryChange>;

const PEER_COUNTS: [usize; 3] = [8, 64, 256];

fn fresh_hub() -> Hub<MemoryEngine, impl PeerSink<Msg>, impl MessageSink<Msg>> {
    Hub::new(
        MemoryEngine::new("hub"),
        |_peer: &str, msg: Msg| {
            black_box(msg);
        },
        |msg: Msg| {
            black_box(msg);
        },
    )
}

/// One first-edit message per peer, as a hub sees them after a burst.
fn burst(peers: usize) -> Vec<Incoming<MemoryChange>> {
    let engine = MemoryEngine::default();
    (0..peers)
        .map(|idx| {
            let id = format!("peer-{idx}");
            let doc = MemoryDoc::new(id.clone()).set(format!("k{}", idx % 16), json!(idx));
            let changes = engine.changes_since(&doc, &VectorClock::new());
            Incoming::new(id, Message::from_parts(doc.clock().clone(), changes))
        })
        .collect()
}

fn bench_fanin(c: &mut Criterion) {
    let mut group = c.benchmark_group("hub.fanin");

    for peers in PEER_COUNTS {
        let batch = burst(peers);
        group.throughput(Throughput::Elements(peers as u64));

        group.bench_with_input(BenchmarkId::new("buffered", peers), &batch, |b, batch| {
            b.iter(|| {
                let mut hub = fresh_hub();
                black_box(hub.apply_message_buffered(batch.clone(), &MemoryDoc::new("hub")))
            });
        });

        group.bench_with_input(BenchmarkId::new("per_message", peers), &batch, |b, batch| {
            b.iter(|| {
                let mut hub = fresh_hub();
                let mut doc = MemoryDoc::new("hub");
                for Incoming { peer_id, message } in batch.clone() {
                    if let Some(next) = hub.apply_message(&peer_id, message, &doc) {
                        doc = next;
                    }
                }
                black_box(doc)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fanin);
criterion_main!(benches);
