use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use wa_web_protocol::protocol::handshake::{decrypt_frame, encrypt_frame, SessionKeys};
use wa_web_protocol::{Node, NodeContent, NodeReader, NodeWriter};

fn chat_batch(messages: usize, blob: usize) -> Node {
    let children = (0..messages)
        .map(|i| {
            Node::new("message")
                .with_attr("jid", format!("57301231{i:04}@c.us"))
                .with_attr("type", "relay")
                .with_content(NodeContent::Bytes(vec![0x42; blob]))
        })
        .collect();
    Node::new("action")
        .with_attr("add", "last")
        .with_children(children)
}

#[allow(clippy::unwrap_used)]
fn bench_node_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("node_encode_decode");

    for &(messages, blob) in &[(1usize, 64usize), (20, 512), (200, 4096)] {
        let node = chat_batch(messages, blob);
        let encoded = NodeWriter::encode(&node).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));

        group.bench_function(format!("encode_{messages}x{blob}b"), |b| {
            b.iter(|| NodeWriter::encode(&node).unwrap())
        });
        group.bench_function(format!("decode_{messages}x{blob}b"), |b| {
            b.iter(|| {
                let decoded = NodeReader::decode(&encoded);
                assert!(decoded.is_ok());
            })
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_frame_seal_open(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_seal_open");
    let keys = SessionKeys::new([0x40; 32], [0x60; 32]);
    let iv = [7u8; 16];

    for &size in &[64usize, 4096, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("seal_{size}b"), |b| {
            b.iter_batched(
                || vec![0u8; size],
                |plaintext| encrypt_frame(&keys, &iv, &plaintext).unwrap(),
                BatchSize::SmallInput,
            )
        });
        let sealed = encrypt_frame(&keys, &iv, &vec![0u8; size]).unwrap();
        group.bench_function(format!("open_{size}b"), |b| {
            b.iter(|| decrypt_frame(&keys, &sealed).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_node_encode_decode, bench_frame_seal_open);
criterion_main!(benches);
