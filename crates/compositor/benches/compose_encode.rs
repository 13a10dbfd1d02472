use compositor::{ComposeOptions, compose, encode_jpeg};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use image::{GrayImage, Luma, Rgb, RgbImage};

/// Gradient frame with a checkerboard mask over half of it
fn inputs(width: u32, height: u32) -> (RgbImage, GrayImage) {
    let frame = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            ((x * 255) / width) as u8,
            ((y * 255) / height) as u8,
            (((x + y) * 127) / (width + height)) as u8,
        ])
    });
    let mask = GrayImage::from_fn(width, height, |x, y| {
        Luma([if x < width / 2 && (x / 8 + y / 8) % 2 == 0 { 255 } else { 0 }])
    });
    (frame, mask)
}

fn benchmark_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    let options = ComposeOptions::default();

    for (width, height, label) in [(640, 480, "VGA"), (1280, 720, "HD")] {
        let (frame, mask) = inputs(width, height);
        group.throughput(Throughput::Elements((width * height) as u64));

        group.bench_with_input(BenchmarkId::new("blend", label), &(), |b, _| {
            b.iter(|| compose(black_box(&frame), Some(black_box(&mask)), &options));
        });

        group.bench_with_input(BenchmarkId::new("blend_jpeg", label), &(), |b, _| {
            b.iter(|| {
                let composed = compose(black_box(&frame), Some(black_box(&mask)), &options);
                encode_jpeg(&composed, 80)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_compose);
criterion_main!(benches);
