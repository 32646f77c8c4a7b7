use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use roomrtc_core::media::{MediaStream, MediaTrack, TrackKind};
use roomrtc_core::stream::{DraftStream, Stream, StreamDescriptor, StreamOrigin, StreamRegistry, StreamSource};

fn populated(streams: usize) -> StreamRegistry {
    let mut registry = StreamRegistry::new();
    for i in 0..streams {
        let media = MediaStream::new(
            format!("stream-{}", i),
            vec![
                MediaTrack::new(format!("audio-{}", i), TrackKind::Audio),
                MediaTrack::new(format!("video-{}", i), TrackKind::Video),
            ],
        );
        registry.add_stream(Stream::new(
            format!("stream-{}", i),
            StreamDescriptor {
                client_id: format!("client-{}", i),
                name: String::new(),
                origin: StreamOrigin::Remote,
                source: StreamSource::Media,
                media,
            },
        ));
    }
    registry
}

fn bench_track_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("get_stream_by_track_id");
    for streams in [4usize, 32, 256] {
        let registry = populated(streams);
        let last = format!("video-{}", streams - 1);
        group.bench_with_input(BenchmarkId::from_parameter(streams), &last, |b, track_id| {
            b.iter(|| registry.get_stream_by_track_id(track_id).is_some())
        });
    }
    group.finish();
}

fn bench_draft_promotion(c: &mut Criterion) {
    c.bench_function("draft_merge_and_promote", |b| {
        b.iter(|| {
            let mut registry = StreamRegistry::new();
            let _ = registry.add_draft(
                "s1",
                DraftStream {
                    client_id: Some("c1".into()),
                    name: Some("cam".into()),
                    source: Some(StreamSource::Media),
                    ..Default::default()
                },
            );
            let _ = registry.add_draft(
                "s1",
                DraftStream {
                    origin: Some(StreamOrigin::Remote),
                    media: Some(MediaStream::new(
                        "s1",
                        vec![MediaTrack::new("t1", TrackKind::Video)],
                    )),
                    ..Default::default()
                },
            );
            registry.promote("s1")
        })
    });
}

criterion_group!(benches, bench_track_lookup, bench_draft_promotion);
criterion_main!(benches);
