//! Profile negotiation and encoding profile construction

use tracing::debug;

use crate::config::CaptureConfig;
use crate::platform::{
    AudioEncodingProperties, DeviceInfo, EncodingProfile, InitSettings, MediaCategory,
    MediaDescription, PhotoCaptureSource, StreamingCaptureMode, VideoEncodingProperties,
    VideoProfile,
};

/// The profile and record format chosen for a device
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileSelection {
    pub profile_id: String,
    pub description: MediaDescription,
}

/// Pick the first record description the config accepts, in catalog order
pub fn select_profile(profiles: &[VideoProfile], config: &CaptureConfig) -> Option<ProfileSelection> {
    profiles.iter().find_map(|profile| {
        profile
            .record_descriptions
            .iter()
            .find(|description| config.accepts(description))
            .map(|description| {
                debug!("Selected profile {} at {}", profile.id, description);
                ProfileSelection {
                    profile_id: profile.id.clone(),
                    description: *description,
                }
            })
    })
}

/// Build the settings a capture resource is created with
pub fn init_settings(
    video: &DeviceInfo,
    audio: Option<&DeviceInfo>,
    selection: Option<&ProfileSelection>,
) -> InitSettings {
    InitSettings {
        video_device_id: video.id.clone(),
        audio_device_id: audio.map(|device| device.id.clone()),
        streaming_mode: if audio.is_some() {
            StreamingCaptureMode::AudioAndVideo
        } else {
            StreamingCaptureMode::Video
        },
        photo_source: PhotoCaptureSource::VideoPreview,
        media_category: MediaCategory::Communications,
        video_profile: selection.map(|s| s.profile_id.clone()),
        preview_description: selection.map(|s| s.description),
        record_description: selection.map(|s| s.description),
    }
}

impl EncodingProfile {
    /// MP4 HD720p baseline resized to the negotiated record dimensions
    ///
    /// The container is dropped since samples go straight to a sink.
    pub fn for_capture(width: u32, height: u32, include_audio: bool) -> Self {
        let audio = include_audio.then(|| AudioEncodingProperties {
            subtype: "AAC".to_string(),
            sample_rate: 48_000,
            channels: 2,
            bits_per_sample: 16,
            bitrate: 192_000,
        });

        Self {
            video: VideoEncodingProperties {
                subtype: "H264".to_string(),
                width,
                height,
                frame_rate_numerator: 30,
                frame_rate_denominator: 1,
                bitrate: 5_000_000,
            },
            audio,
            container: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DeviceClass;

    fn desc(width: u32, height: u32, frame_rate: f64) -> MediaDescription {
        MediaDescription {
            width,
            height,
            frame_rate,
        }
    }

    fn device(id: &str, class: DeviceClass) -> DeviceInfo {
        DeviceInfo {
            id: id.to_string(),
            name: id.to_string(),
            class,
        }
    }

    #[test]
    fn test_first_qualifying_description_wins() {
        let profiles = vec![
            VideoProfile {
                id: "low".to_string(),
                record_descriptions: vec![desc(640, 480, 30.0), desc(1280, 720, 15.0)],
            },
            VideoProfile {
                id: "hd".to_string(),
                record_descriptions: vec![desc(1920, 1080, 30.0), desc(1280, 720, 30.0)],
            },
        ];
        let selection = select_profile(&profiles, &CaptureConfig::default()).unwrap();
        assert_eq!(selection.profile_id, "hd");
        assert_eq!(selection.description, desc(1920, 1080, 30.0));
    }

    #[test]
    fn test_no_qualifying_profile() {
        let profiles = vec![VideoProfile {
            id: "slow".to_string(),
            record_descriptions: vec![desc(1920, 1080, 15.0)],
        }];
        assert!(select_profile(&profiles, &CaptureConfig::default()).is_none());
    }

    #[test]
    fn test_init_settings_modes() {
        let video = device("cam", DeviceClass::VideoCapture);
        let mic = device("mic", DeviceClass::AudioCapture);

        let video_only = init_settings(&video, None, None);
        assert_eq!(video_only.streaming_mode, StreamingCaptureMode::Video);
        assert_eq!(video_only.photo_source, PhotoCaptureSource::VideoPreview);
        assert_eq!(video_only.media_category, MediaCategory::Communications);
        assert!(video_only.video_profile.is_none());

        let with_audio = init_settings(&video, Some(&mic), None);
        assert_eq!(with_audio.streaming_mode, StreamingCaptureMode::AudioAndVideo);
        assert_eq!(with_audio.audio_device_id.as_deref(), Some("mic"));
    }

    #[test]
    fn test_encoding_profile_matches_capture() {
        let profile = EncodingProfile::for_capture(1920, 1080, false);
        assert_eq!((profile.video.width, profile.video.height), (1920, 1080));
        assert!(profile.audio.is_none());
        assert!(profile.container.is_none());
        assert!(EncodingProfile::for_capture(1280, 720, true).audio.is_some());
    }
}
