//! Engine tick benchmarks

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use mc_audio::{
    AudioEngine, EngineConfig, LayerTiming, LoopLayerDescriptor, PlaybackSettingsOverride, PlaylistDescriptor,
    PlaylistPlaySettings, SoundDescriptor, SoundLoopPlaySettings, SoundLoopSetDescriptor, TrackConfig,
    WeightedSound,
};
use mc_core::SampleDuration;

const SAMPLE_RATE: u32 = 48000;

/// Engine with busy sfx, music and loop tracks
fn busy_engine() -> AudioEngine {
    let mut engine = AudioEngine::new(EngineConfig::default().with_sample_rate(SAMPLE_RATE).with_seed(1))
        .expect("engine");
    engine
        .create_track("sfx", "standard", TrackConfig::default().with_simultaneous_sounds(16))
        .expect("sfx");
    engine
        .create_track("music", "playlist", TrackConfig::default())
        .expect("music");
    engine
        .create_track("loops", "sound_loop", TrackConfig::default())
        .expect("loops");

    let second = SampleDuration::from_seconds(1.0, SAMPLE_RATE);
    for i in 0..32 {
        engine
            .register_sound(SoundDescriptor::new(format!("sfx{i}"), "sfx", second).with_loops(-1))
            .expect("sfx sound");
    }
    for name in ["song1", "song2"] {
        engine
            .register_sound(SoundDescriptor::new(name, "music", SampleDuration(second.0 * 30)))
            .expect("song");
    }
    for name in ["drums", "bass", "pad"] {
        engine
            .register_sound(SoundDescriptor::new(name, "loops", SampleDuration(second.0 * 4)))
            .expect("loop sound");
    }
    engine
        .register_playlist(
            PlaylistDescriptor::new(
                "attract",
                "music",
                vec![WeightedSound::new("song1", 1), WeightedSound::new("song2", 1)],
            )
            .with_repeat(true),
        )
        .expect("playlist");
    engine
        .register_sound_loop_set(
            SoundLoopSetDescriptor::new("groove", "loops", "drums")
                .with_layer(LoopLayerDescriptor::new("bass"))
                .with_layer(LoopLayerDescriptor::new("pad")),
        )
        .expect("loop set");

    for i in 0..32 {
        let _ = engine.play_sound(&format!("sfx{i}"), None, PlaybackSettingsOverride::default());
    }
    let _ = engine.play_playlist("attract", None, None, PlaylistPlaySettings::default());
    let _ = engine.play_sound_loop_set("groove", None, None, SoundLoopPlaySettings::default());
    let _ = engine.play_layer("loops", 1, None, LayerTiming::Immediate, None);
    let _ = engine.play_layer("loops", 2, None, LayerTiming::Quantized, None);
    engine
}

fn bench_process_tick(c: &mut Criterion) {
    let mut engine = busy_engine();
    // Keep the mixer queue drained like a live mixer would
    let mut mixer = engine.take_mixer_endpoint().expect("endpoint");
    let mut commands = Vec::with_capacity(256);

    c.bench_function("process_tick_busy_10ms", |b| {
        b.iter(|| {
            let events = engine.process_tick(black_box(0.01));
            mixer.drain_into(&mut commands);
            commands.clear();
            black_box(events);
        })
    });
}

fn bench_play_and_stop(c: &mut Criterion) {
    let mut engine = busy_engine();
    let _mixer = engine.take_mixer_endpoint();

    c.bench_function("play_stop_sound", |b| {
        b.iter(|| {
            let _ = engine.play_sound(black_box("sfx0"), None, PlaybackSettingsOverride::default());
            engine.stop_sound("sfx0", Some(0.0));
            engine.process_tick(0.001);
        })
    });
}

criterion_group!(benches, bench_process_tick, bench_play_and_stop);
criterion_main!(benches);
