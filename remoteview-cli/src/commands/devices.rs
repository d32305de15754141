//! Devices command - list capture devices and profiles

use anyhow::{Context, Result};
use remoteview_core::config::CaptureConfig;
use remoteview_core::platform::DeviceClass;
use remoteview_core::session::select_profile;
use remoteview_core::sim::SimPlatform;

/// List capture devices and mark the profile a session would negotiate
pub async fn devices(config: CaptureConfig) -> Result<()> {
    println!("RemoteView - Capture Devices\n");

    let platform = SimPlatform::default().platform();

    let video = platform
        .discovery
        .find_all(DeviceClass::VideoCapture)?
        .join()
        .await
        .context("Failed to enumerate video devices")?;
    let audio = platform
        .discovery
        .find_all(DeviceClass::AudioCapture)?
        .join()
        .await
        .context("Failed to enumerate audio devices")?;

    if video.is_empty() && audio.is_empty() {
        println!("No devices found.");
        return Ok(());
    }

    println!("{:<20} {:<30} {:<15}", "ID", "Name", "Class");
    println!("{}", "-".repeat(65));
    for device in video.iter().chain(audio.iter()) {
        println!(
            "{:<20} {:<30} {:<15}",
            device.id,
            truncate(&device.name, 28),
            device.class
        );
    }

    println!("\nRequired: {}", requirement(&config));

    for device in &video {
        let profiles = platform
            .profiles
            .video_profiles(&device.id)
            .with_context(|| format!("Failed to list profiles of {}", device.id))?;
        let selected = select_profile(&profiles, &config);

        println!("\nProfiles of {}:", device.name);
        if profiles.is_empty() {
            println!("  (none)");
        }
        for profile in &profiles {
            println!("  {}", profile.id);
            for description in &profile.record_descriptions {
                let marker = match &selected {
                    Some(s) if s.profile_id == profile.id && s.description == *description => "*",
                    _ => " ",
                };
                println!("    {} {}", marker, description);
            }
        }

        if selected.is_none() {
            let fallback = if config.require_profile {
                "a session would fail to initialize"
            } else {
                "the device default will be used"
            };
            println!("  No profile qualifies; {}.", fallback);
        }
    }

    println!("\n* = profile a capture session would select");

    Ok(())
}

/// The format rule profile selection applies
fn requirement(config: &CaptureConfig) -> String {
    format!(
        "at least {}x{} @ {} fps (frame rate must round to exactly {})",
        config.min_width, config.min_height, config.frame_rate, config.frame_rate
    )
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max - 3])
    }
}
