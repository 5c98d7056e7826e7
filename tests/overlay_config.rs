use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use pose_overlay::config::OverlayConfig;
use pose_overlay::{CameraFacing, MirrorPolicy, ModelVariant, Orientation, Platform};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "POSE_OVERLAY_CONFIG",
        "POSE_OVERLAY_PLATFORM",
        "POSE_OVERLAY_SCREEN_WIDTH",
        "POSE_OVERLAY_MIN_SCORE",
        "POSE_OVERLAY_TARGET_FPS",
        "POSE_OVERLAY_MIRROR",
        "POSE_OVERLAY_MODEL_PATH",
        "POSE_OVERLAY_SOURCE",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r##"{
        "display": {
            "platform": "android",
            "screen_width": 720,
            "orientation": "portrait"
        },
        "overlay": {
            "min_score": 0.6,
            "mirror": "front",
            "marker": { "radius": 6.0, "fill": "#FF0000" }
        },
        "model": {
            "variant": "thunder",
            "enable_smoothing": false
        },
        "pump": {
            "target_fps": 15,
            "slow_inference_ms": 400
        },
        "source": {
            "uri": "stub://demo",
            "initial_facing": "front"
        }
    }"##;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("POSE_OVERLAY_CONFIG", file.path());
    std::env::set_var("POSE_OVERLAY_PLATFORM", "ios");
    std::env::set_var("POSE_OVERLAY_TARGET_FPS", "24");

    let cfg = OverlayConfig::load().expect("load config");

    assert_eq!(cfg.display.platform, Platform::Ios);
    assert_eq!(cfg.display.screen_width, 720.0);
    assert_eq!(cfg.display.orientation, Orientation::Portrait);
    assert_eq!(cfg.overlay.min_score, 0.6);
    assert_eq!(cfg.overlay.mirror, MirrorPolicy::FrontCamera);
    assert_eq!(cfg.overlay.marker.radius, 6.0);
    assert_eq!(cfg.overlay.marker.fill, "#FF0000");
    assert_eq!(cfg.overlay.marker.stroke, "white");
    assert_eq!(cfg.model.variant, ModelVariant::SinglePoseThunder);
    assert!(!cfg.model.enable_smoothing);
    assert_eq!(cfg.pump.target_fps, 24);
    assert_eq!(cfg.pump.slow_inference, Duration::from_millis(400));
    assert_eq!(cfg.source.uri, "stub://demo");
    assert_eq!(cfg.source.initial_facing, CameraFacing::Front);

    let geometry = cfg.geometry().expect("geometry");
    assert_eq!(geometry.display_width, 720.0);
    assert_eq!(geometry.display_height, 1280.0);
    assert_eq!(geometry.tensor_dims(), (180, 320));

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
[display]
platform = "ios"
screen_width = 900.0
orientation = "landscape"

[overlay]
mirror = "never"

[source]
uri = "stub://toml"
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = OverlayConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.overlay.mirror, MirrorPolicy::Never);
    assert_eq!(cfg.source.uri, "stub://toml");

    let geometry = cfg.geometry().expect("geometry");
    assert_eq!(geometry.display_width, 1600.0);
    assert_eq!(geometry.display_height, 900.0);
    assert_eq!(geometry.tensor_dims(), (320, 180));

    clear_env();
}

#[test]
fn rejects_out_of_range_min_score() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POSE_OVERLAY_MIN_SCORE", "1.5");
    assert!(OverlayConfig::load_from(None).is_err());

    std::env::set_var("POSE_OVERLAY_MIN_SCORE", "not-a-number");
    assert!(OverlayConfig::load_from(None).is_err());

    clear_env();
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = OverlayConfig::load().expect("defaults");
    assert_eq!(cfg.display.platform, Platform::Android);
    assert_eq!(cfg.overlay.mirror, MirrorPolicy::Always);
    assert!(cfg.model.model_path.is_none());
    assert!(cfg.source.uri.starts_with("stub://"));

    let geometry = cfg.geometry().expect("geometry");
    assert_eq!(geometry.display_width, 1080.0);
    assert_eq!(geometry.display_height, 1440.0);
    assert_eq!(geometry.tensor_dims(), (180, 240));

    clear_env();
}

#[test]
fn unknown_platform_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("POSE_OVERLAY_PLATFORM", "palmos");
    assert!(OverlayConfig::load_from(None).is_err());

    clear_env();
}
