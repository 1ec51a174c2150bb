//! 프레이밍 / 검증 / 재조립 처리량 벤치마크

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use hopnet::{FrameCounting, FrameValidator, Framer, PeerTag, Reassembler, MAX_PAYLOAD};

const STREAM_LEN: usize = 1500;

fn stream() -> Vec<u8> {
    (0..STREAM_LEN).map(|i| (i * 31 % 251) as u8).collect()
}

fn bench_split(c: &mut Criterion) {
    let framer = Framer::new(MAX_PAYLOAD, FrameCounting::Legacy).unwrap();
    let data = stream();

    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(STREAM_LEN as u64));
    group.bench_function("split_and_encode", |b| {
        b.iter(|| {
            let frames = framer.split_into_frames(PeerTag::C, black_box(&data)).unwrap();
            frames.iter().map(|f| f.encode()).collect::<Vec<Bytes>>()
        })
    });
    group.finish();
}

fn bench_validate_and_reassemble(c: &mut Criterion) {
    let framer = Framer::new(MAX_PAYLOAD, FrameCounting::Legacy).unwrap();
    let validator = FrameValidator::new(PeerTag::C, hopnet::DEFAULT_FRAME_SIZE);
    let wire: Vec<Bytes> = framer
        .split_into_frames(PeerTag::C, &stream())
        .unwrap()
        .iter()
        .map(|f| f.encode())
        .collect();

    let mut group = c.benchmark_group("receive");
    group.throughput(Throughput::Bytes(STREAM_LEN as u64));
    group.bench_function("validate_and_reassemble", |b| {
        b.iter(|| {
            let mut reassembler = Reassembler::new();
            // 역순 도착
            for raw in wire.iter().rev() {
                let parsed = validator
                    .validate(black_box(raw), reassembler.session(PeerTag::A))
                    .unwrap();
                reassembler.on_parsed(PeerTag::A, parsed);
            }
            assert!(reassembler.is_completed(PeerTag::A));
        })
    });
    group.finish();
}

criterion_group!(benches, bench_split, bench_validate_and_reassemble);
criterion_main!(benches);
