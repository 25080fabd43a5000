use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use relief_core::{Color, EncodeConfig, ErrorKind, ExportFormat, FrameBuffer, ReliefResult};
use relief_encode::{encode_stream, Artifact, Codec, EncodeSettings};

fn frames(n: usize, w: u32, h: u32) -> impl Iterator<Item = ReliefResult<FrameBuffer>> {
    (0..n).map(move |i| {
        let shade = i as f32 / n.max(1) as f32;
        Ok(FrameBuffer::solid(w, h, &Color::rgb(shade, 0.5, 1.0 - shade)))
    })
}

#[test]
fn test_duration_is_frame_count_over_fps() {
    let cases = [
        (ExportFormat::Video, 36usize, 12.0),
        (ExportFormat::Video, 10, 24.0),
        (ExportFormat::Video, 7, 7.5),
        (ExportFormat::LoopImage, 36, 12.5),
        (ExportFormat::LoopImage, 10, 25.0),
        (ExportFormat::LoopImage, 7, 10.0),
    ];
    for (format, n, fps) in cases {
        let settings = EncodeSettings::from_config(&EncodeConfig::default(), format, 16, 16, fps);
        let artifact = encode_stream(&settings, frames(n, 16, 16)).unwrap();
        assert_eq!(artifact.metadata.frame_count, n as u64);
        assert!((artifact.duration_seconds() - n as f64 / fps).abs() < 1e-9);
        for (i, ts) in artifact.metadata.timestamps.iter().enumerate() {
            assert!((ts - i as f64 / fps).abs() < 1e-12);
        }
    }
}

#[test]
fn test_container_round_trip_preserves_payload() {
    let settings =
        EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::Video, 8, 8, 10.0);
    let artifact = encode_stream(&settings, frames(4, 8, 8)).unwrap();
    let parsed = Artifact::from_bytes(&artifact.to_bytes().unwrap()).unwrap();
    assert_eq!(parsed.metadata.codec, Codec::Mjpeg);
    assert_eq!(parsed.mjpeg_frames().unwrap().len(), 4);
    assert_eq!(parsed, artifact);
}

#[test]
fn test_frame_size_mismatch_is_encoding_error() {
    let settings =
        EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::LoopImage, 8, 8, 10.0);
    let err = encode_stream(&settings, frames(2, 9, 8)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Encoding);
}

#[test]
fn test_empty_stream_is_encoding_error() {
    let settings =
        EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::LoopImage, 8, 8, 10.0);
    assert!(encode_stream(&settings, frames(0, 8, 8)).is_err());
}

#[test]
fn test_gif_playback_matches_declared_duration() {
    for (n, fps) in [(60usize, 10.0), (60, 25.0), (60, 50.0), (30, 100.0 / 3.0)] {
        let settings =
            EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::LoopImage, 8, 8, fps);
        let artifact = encode_stream(&settings, frames(n, 8, 8)).unwrap();
        let decoder = GifDecoder::new(std::io::Cursor::new(&artifact.payload)).unwrap();
        let mut decoded = 0;
        let mut playback_ms = 0.0;
        for frame in decoder.into_frames() {
            let (numer, denom) = frame.unwrap().delay().numer_denom_ms();
            playback_ms += numer as f64 / denom as f64;
            decoded += 1;
        }
        assert_eq!(decoded, n);
        assert!(
            (playback_ms / 1000.0 - artifact.metadata.duration_seconds).abs() < 1e-6,
            "fps {}: plays {}ms, declares {}s",
            fps,
            playback_ms,
            artifact.metadata.duration_seconds
        );
    }
}

#[test]
fn test_gif_rejects_rates_without_exact_delay() {
    for fps in [12.0, 30.0, 60.0] {
        let settings =
            EncodeSettings::from_config(&EncodeConfig::default(), ExportFormat::LoopImage, 8, 8, fps);
        let err = encode_stream(&settings, frames(3, 8, 8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }
}
