//! Mixed-reality compositing effects

use std::time::Duration;
use tracing::{debug, warn};

use crate::async_op::{AsyncOperation, sync_get};
use crate::config::{EffectFailurePolicy, MrcSettings};
use crate::error::{Result, ResultExt};
use crate::platform::{AudioEffectDefinition, AudioMixerMode, StreamKind, VideoEffectDefinition};

/// Video effect applied to the record stream
pub fn video_effect(mrc: &MrcSettings) -> VideoEffectDefinition {
    VideoEffectDefinition {
        stream: StreamKind::VideoRecord,
        hologram_composition: mrc.hologram_composition,
        video_stabilization: mrc.video_stabilization,
        global_opacity_coefficient: mrc.global_opacity,
        recording_indicator_enabled: mrc.recording_indicator,
    }
}

/// Audio effect mixing `mode` into the record stream
pub fn audio_effect(mode: AudioMixerMode) -> AudioEffectDefinition {
    AudioEffectDefinition { mixer_mode: mode }
}

/// Block until an attachment resolves
///
/// Returns whether the effect is now attached. Under `Continue` a failure
/// is logged and reported as not attached; under `Abort` it is returned.
pub(crate) fn attach(
    name: &str,
    issued: Result<AsyncOperation<()>>,
    timeout: Option<Duration>,
    policy: EffectFailurePolicy,
) -> Result<bool> {
    let outcome = issued.and_then(|operation| sync_get(&operation, timeout));
    match (outcome, policy) {
        (Ok(()), _) => {
            debug!("{} effect attached", name);
            Ok(true)
        }
        (Err(e), EffectFailurePolicy::Continue) => {
            warn!("Failed to attach {} effect, continuing without it: {}", name, e);
            Ok(false)
        }
        (Err(e), EffectFailurePolicy::Abort) => {
            Err(e).context(format!("attaching {} effect", name))
        }
    }
}
