//! Sound Loop Integration Tests
//!
//! Beat-quantized layers and loop-end switching driven through the engine
//! at 120 BPM (beat grid 0.5 s).

use mc_audio::sound_loop::{LayerStatus, LoopSetState};
use mc_audio::{
    AudioEngine, EngineConfig, LayerTiming, LoopLayerDescriptor, MixerCommand, SoundDescriptor,
    SoundLoopPlaySettings, SoundLoopSetDescriptor, TrackConfig,
};
use mc_core::SampleDuration;

const TEST_SAMPLE_RATE: u32 = 1000;

fn create_test_engine() -> AudioEngine {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut engine = AudioEngine::new(EngineConfig::default().with_sample_rate(TEST_SAMPLE_RATE))
        .expect("engine");
    engine
        .create_track("loops", "sound_loop", TrackConfig::default())
        .expect("track");
    for name in ["drums", "drums_alt", "hihat"] {
        engine
            .register_sound(SoundDescriptor::new(name, "loops", SampleDuration(2000)))
            .expect("sound");
    }
    for (set, base) in [("groove", "drums"), ("groove_alt", "drums_alt")] {
        engine
            .register_sound_loop_set(
                SoundLoopSetDescriptor::new(set, "loops", base)
                    .with_tempo(120.0)
                    .with_layer(LoopLayerDescriptor::new("hihat")),
            )
            .expect("loop set");
    }
    engine
}

#[test]
fn test_quantized_layer_starts_on_next_beat() {
    let mut engine = create_test_engine();
    let mut mixer = engine.take_mixer_endpoint().unwrap();

    engine
        .play_sound_loop_set("groove", None, None, SoundLoopPlaySettings::default())
        .unwrap();
    assert_eq!(engine.sound_loop_controller("loops").unwrap().beat_grid(), Some(500));

    engine.process_tick(0.2);
    engine
        .play_layer("loops", 1, Some(0.0), LayerTiming::Quantized, None)
        .unwrap();

    engine.process_tick(0.2);
    let controller = engine.sound_loop_controller("loops").unwrap();
    assert_eq!(controller.layer_status(1), Some(LayerStatus::Queued));

    engine.process_tick(0.2);
    let controller = engine.sound_loop_controller("loops").unwrap();
    assert_eq!(controller.layer_status(1), Some(LayerStatus::Playing));
    assert_eq!(controller.layer_position(1), controller.base_position());

    let mut commands = Vec::new();
    mixer.drain_into(&mut commands);
    let layer_start = commands.iter().find_map(|command| match command {
        MixerCommand::Play { sound, start_position, .. } if sound.name == "hihat" => Some(*start_position),
        _ => None,
    });
    assert_eq!(layer_start, Some(500));
}

#[test]
fn test_next_set_waits_for_loop_end() {
    let mut engine = create_test_engine();
    engine
        .play_sound_loop_set("groove", None, None, SoundLoopPlaySettings::default())
        .unwrap();
    engine.process_tick(0.5);

    let deferred = engine
        .play_sound_loop_set("groove_alt", None, None, SoundLoopPlaySettings::default())
        .unwrap();
    assert_eq!(deferred, None);

    let status = engine.sound_loop_controller("loops").unwrap().get_status();
    assert_eq!(status[0].status, LoopSetState::Delayed);
    assert_eq!(status[0].start_delay_samples_remaining, Some(1500));
    assert_eq!(status[1].status, LoopSetState::Playing);

    let events = engine.process_tick(1.6);
    let names: Vec<_> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["groove_stopped", "groove_alt_played"]);
    assert_eq!(
        engine.sound_loop_controller("loops").unwrap().current_set(),
        Some("groove_alt")
    );
}

#[test]
fn test_jump_keeps_layers_aligned() {
    let mut engine = create_test_engine();
    engine
        .play_sound_loop_set("groove", None, None, SoundLoopPlaySettings::default())
        .unwrap();
    engine
        .play_layer("loops", 1, None, LayerTiming::Immediate, Some(0.7))
        .unwrap();
    engine.process_tick(0.3);

    engine.jump_to_time("loops", 1.25).unwrap();
    let controller = engine.sound_loop_controller("loops").unwrap();
    assert_eq!(controller.base_position(), Some(1250));
    assert_eq!(controller.layer_position(1), Some(1250));
}
