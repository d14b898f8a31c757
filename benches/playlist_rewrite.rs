use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use hls_relay::decode::decompress;
use hls_relay::hls::PlaylistRewriter;
use std::io::Write;
use url::Url;

fn media_playlist(segments: usize) -> String {
    let mut out = String::from(
        "#EXTM3U\n#EXT-X-VERSION:6\n#EXT-X-TARGETDURATION:6\n#EXT-X-MEDIA-SEQUENCE:0\n\
         #EXT-X-MAP:URI=\"init.mp4\"\n",
    );
    for i in 0..segments {
        if i % 50 == 0 {
            out.push_str(&format!(
                "#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k{}\",IV=0x{:032x}\n",
                i / 50,
                i
            ));
        }
        out.push_str(&format!("#EXTINF:6.000,\nsegment_{:05}.m4s\n", i));
    }
    out.push_str("#EXT-X-ENDLIST\n");
    out
}

fn master_playlist() -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-INDEPENDENT-SEGMENTS\n");
    for (bw, res) in [(800_000, "640x360"), (2_400_000, "1280x720"), (6_000_000, "1920x1080")] {
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={}\n{}/index.m3u8\n",
            bw, res, res
        ));
        out.push_str(&format!(
            "#EXT-X-I-FRAME-STREAM-INF:BANDWIDTH={},URI=\"{}/iframes.m3u8\"\n",
            bw / 10,
            res
        ));
    }
    out
}

fn bench_rewrite(c: &mut Criterion) {
    let rewriter = PlaylistRewriter::new("/proxy");
    let base = Url::parse("https://cdn.example.com/live/stream/index.m3u8").unwrap();

    let master = master_playlist();
    c.bench_function("rewrite_master", |b| {
        b.iter(|| rewriter.rewrite(black_box(&master), black_box(&base)))
    });

    let mut group = c.benchmark_group("rewrite_media");
    for segments in [100, 1_000, 10_000] {
        let playlist = media_playlist(segments);
        group.bench_with_input(BenchmarkId::from_parameter(segments), &playlist, |b, pl| {
            b.iter(|| rewriter.rewrite(black_box(pl), black_box(&base)))
        });
    }
    group.finish();

    // Second pass over an already-rewritten playlist hits the skip path only
    let rewritten = rewriter.rewrite(&media_playlist(1_000), &base).body;
    c.bench_function("rewrite_already_proxied", |b| {
        b.iter(|| rewriter.rewrite(black_box(&rewritten), black_box(&base)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let playlist = media_playlist(1_000);
    let mut enc = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(playlist.as_bytes()).unwrap();
    let gz = enc.finish().unwrap();

    c.bench_function("decompress_gzip_playlist", |b| {
        b.iter(|| decompress(black_box(&gz), "gzip").unwrap())
    });
}

criterion_group!(benches, bench_rewrite, bench_decode);
criterion_main!(benches);
